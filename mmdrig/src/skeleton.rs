use crate::rig::Rig;
use glam::{Quat, Vec3};
use std::sync::Arc;

/// Posed instance of a [`RigBone`](crate::RigBone).
#[derive(Clone, Debug)]
pub struct PoseBone {
    data_index: usize,
    parent: Option<usize>,

    /// Parent-relative position.
    pub position: Vec3,
    /// Parent-relative rotation.
    pub rotation: Quat,

    pub world_position: Vec3,
    pub world_rotation: Quat,
}

impl PoseBone {
    pub fn data_index(&self) -> usize {
        self.data_index
    }

    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }
}

/// Mutable pose of a [`Rig`].
#[derive(Clone, Debug)]
pub struct Skeleton {
    pub rig: Arc<Rig>,
    pub bones: Vec<PoseBone>,
    bone_children: Vec<Vec<usize>>,
    update_order: Vec<usize>,
}

impl Skeleton {
    pub fn new(rig: Arc<Rig>) -> Self {
        let bones: Vec<PoseBone> = rig
            .bones
            .iter()
            .enumerate()
            .map(|(i, b)| PoseBone {
                data_index: i,
                parent: b.parent.filter(|&p| p < rig.bones.len() && p != i),
                position: b.offset,
                rotation: Quat::IDENTITY,
                world_position: b.rest_position,
                world_rotation: Quat::IDENTITY,
            })
            .collect();
        let mut bone_children = vec![Vec::new(); bones.len()];
        for (i, bone) in bones.iter().enumerate() {
            if let Some(p) = bone.parent {
                bone_children[p].push(i);
            }
        }
        let update_order = rig.update_order();
        let mut skeleton = Self {
            rig,
            bones,
            bone_children,
            update_order,
        };
        skeleton.update_world_transform();
        skeleton
    }

    pub fn set_to_setup_pose(&mut self) {
        for (bone, data) in self.bones.iter_mut().zip(self.rig.bones.iter()) {
            bone.position = data.offset;
            bone.rotation = Quat::IDENTITY;
        }
    }

    pub fn children(&self, index: usize) -> &[usize] {
        self.bone_children
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn update_world_transform(&mut self) {
        let order = std::mem::take(&mut self.update_order);
        for &i in &order {
            self.update_bone_world_transform(i);
        }
        self.update_order = order;
    }

    fn update_bone_world_transform(&mut self, index: usize) {
        let (parent_position, parent_rotation) = match self.bones[index].parent {
            Some(p) => (self.bones[p].world_position, self.bones[p].world_rotation),
            None => (Vec3::ZERO, Quat::IDENTITY),
        };
        let bone = &mut self.bones[index];
        bone.world_position = parent_position + parent_rotation * bone.position;
        bone.world_rotation = (parent_rotation * bone.rotation).normalize();
    }

    /// Recomputes the world transform of `index` and everything below it.
    pub fn update_bone_and_descendants(&mut self, index: usize) {
        if index >= self.bones.len() {
            return;
        }
        let mut visited = vec![false; self.bones.len()];
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut visited[i], true) {
                continue;
            }
            self.update_bone_world_transform(i);
            stack.extend(self.bone_children[i].iter().copied());
        }
    }

    /// Expresses a world-space point in the bone's own local frame.
    pub fn world_to_local(&self, index: usize, point: Vec3) -> Vec3 {
        let bone = &self.bones[index];
        bone.world_rotation.inverse() * (point - bone.world_position)
    }
}
