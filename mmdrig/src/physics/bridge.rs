//! Keeps simulated rigid bodies and skeleton bones in step.
//!
//! Each body is attached to a bone through a fixed offset transform. Before the
//! engine steps, bone-driven bodies are moved to follow their bones; afterwards,
//! simulated bodies write their pose back into the skeleton.

use super::config::PhysicsConfig;
use super::world::{BodyHandle, ConstraintDesc, ConstraintHandle, PhysicsWorld, RigidBodyDesc};
use crate::Error;
use crate::math::{ScratchArena, Transform};
use crate::model::{BodyKind, Document, ModelFormat};
use crate::skeleton::Skeleton;
use glam::{Quat, Vec3};

#[derive(Copy, Clone, Debug)]
struct BridgeBody {
    handle: BodyHandle,
    bone: Option<usize>,
    kind: BodyKind,
    /// Body pose in its bone's space.
    offset: Transform,
    offset_inverse: Transform,
}

pub struct PhysicsBridge<W: PhysicsWorld> {
    world: W,
    config: PhysicsConfig,
    bodies: Vec<BridgeBody>,
    constraints: Vec<ConstraintHandle>,
    scratch: ScratchArena,
}

impl<W: PhysicsWorld> PhysicsBridge<W> {
    /// Creates every rigid body, then every constraint, then snaps the bodies to
    /// their bones.
    pub fn new(
        mut world: W,
        doc: &Document,
        skeleton: &Skeleton,
        config: PhysicsConfig,
    ) -> Result<Self, Error> {
        world.set_gravity(config.gravity);
        let mut bridge = Self {
            world,
            config,
            bodies: Vec::with_capacity(doc.rigid_bodies.len()),
            constraints: Vec::with_capacity(doc.constraints.len()),
            scratch: ScratchArena::new(),
        };
        bridge.init_rigid_bodies(doc, skeleton)?;
        bridge.init_constraints(doc, skeleton)?;
        bridge.reset(skeleton);
        log::debug!(
            "physics bridge: {} bodies, {} constraints",
            bridge.bodies.len(),
            bridge.constraints.len()
        );
        Ok(bridge)
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn into_world(self) -> W {
        self.world
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Drive kind after constraint promotion.
    pub fn body_kind(&self, index: usize) -> Option<BodyKind> {
        self.bodies.get(index).map(|b| b.kind)
    }

    pub fn body_handle(&self, index: usize) -> Option<BodyHandle> {
        self.bodies.get(index).map(|b| b.handle)
    }

    pub fn constraint_handles(&self) -> &[ConstraintHandle] {
        &self.constraints
    }

    #[cfg(test)]
    pub(super) fn scratch_outstanding(&self) -> usize {
        self.scratch.outstanding()
    }

    fn init_rigid_bodies(&mut self, doc: &Document, skeleton: &Skeleton) -> Result<(), Error> {
        for (index, body) in doc.rigid_bodies.iter().enumerate() {
            let bone_world = match body.bone {
                Some(b) => {
                    skeleton
                        .bones
                        .get(b)
                        .ok_or(Error::ReferentialIntegrity {
                            field: "rigid body bone",
                            index: b as i64,
                            len: skeleton.bones.len(),
                        })?
                        .world_position
                }
                None => Vec3::ZERO,
            };

            // PMX stores model-space positions; PMD stores them relative to the bone.
            let position = match (doc.format(), body.bone.and_then(|b| doc.bones.get(b))) {
                (ModelFormat::Pmx, Some(bone)) => body.position - bone.position,
                _ => body.position,
            };
            let offset = Transform::from_euler_zyx(body.rotation, position);

            let kinematic = body.kind == BodyKind::Kinematic;
            let mass = if kinematic { 0.0 } else { body.mass };
            let shape = body.shape();
            let local_inertia = if mass != 0.0 {
                shape.local_inertia(mass)
            } else {
                Vec3::ZERO
            };
            let group = 1u16.checked_shl(body.group as u32).ok_or_else(|| {
                Error::invalid(format!(
                    "rigid body {index} collision group {} out of range",
                    body.group
                ))
            })?;

            let bone_form = self.scratch.acquire_transform();
            *self.scratch.transform_mut(bone_form) = Transform::from_origin(bone_world);
            let offset_form = self.scratch.acquire_transform();
            *self.scratch.transform_mut(offset_form) = offset;
            let form = self.scratch.compose(bone_form, offset_form);

            let handle = self.world.add_rigid_body(&RigidBodyDesc {
                shape,
                mass,
                local_inertia,
                transform: *self.scratch.transform(form),
                friction: body.friction,
                restitution: body.restitution,
                linear_damping: body.linear_damping,
                angular_damping: body.angular_damping,
                group,
                mask: body.mask,
                kinematic,
            });

            let inverse = self.scratch.invert(offset_form);
            let offset_inverse = *self.scratch.transform(inverse);
            for h in [bone_form, offset_form, form, inverse] {
                self.scratch.release_transform(h);
            }

            log::trace!(
                "body {index} {:?}: {:?} on bone {:?}",
                body.name.as_str(),
                body.kind,
                body.bone
            );
            self.bodies.push(BridgeBody {
                handle,
                bone: body.bone,
                kind: body.kind,
                offset,
                offset_inverse,
            });
        }
        Ok(())
    }

    fn init_constraints(&mut self, doc: &Document, skeleton: &Skeleton) -> Result<(), Error> {
        let count = self.bodies.len();
        let lookup = |i: usize| {
            if i < count {
                Ok(i)
            } else {
                Err(Error::ReferentialIntegrity {
                    field: "constraint body",
                    index: i as i64,
                    len: count,
                })
            }
        };

        for c in &doc.constraints {
            let ia = lookup(c.bodies[0])?;
            let ib = lookup(c.bodies[1])?;

            let (a, b) = (self.bodies[ia], self.bodies[ib]);
            if a.kind != BodyKind::Kinematic && b.kind == BodyKind::Aligned {
                if let (Some(bone_a), Some(bone_b)) = (a.bone, b.bone) {
                    let parent = skeleton.bones.get(bone_b).and_then(|bone| bone.parent_index());
                    if parent == Some(bone_a) {
                        log::debug!("promoting body {ib} to dynamic under body {ia}");
                        self.bodies[ib].kind = BodyKind::Dynamic;
                    }
                }
            }

            let form = Transform::from_euler_zyx(c.rotation, c.position);
            let frame_a = self
                .world
                .world_transform(self.bodies[ia].handle)
                .inverse()
                .compose(&form);
            let frame_b = self
                .world
                .world_transform(self.bodies[ib].handle)
                .inverse()
                .compose(&form);

            let mut springs = [None; 6];
            for axis in 0..3 {
                if c.linear_spring[axis] != 0.0 {
                    springs[axis] = Some(c.linear_spring[axis]);
                }
                if c.angular_spring[axis] != 0.0 {
                    springs[axis + 3] = Some(c.angular_spring[axis]);
                }
            }

            // Limits were mirrored once by `convert_model`; they pass through as
            // stored so a converted document is not flipped a second time.
            let handle = self.world.add_constraint(&ConstraintDesc {
                body_a: self.bodies[ia].handle,
                body_b: self.bodies[ib].handle,
                frame_a,
                frame_b,
                linear_lower: c.linear_lower,
                linear_upper: c.linear_upper,
                angular_lower: c.angular_lower,
                angular_upper: c.angular_upper,
                springs,
            });
            self.constraints.push(handle);
        }
        Ok(())
    }

    /// Advances the simulation by `delta` seconds and writes simulated poses back
    /// into `skeleton`.
    pub fn update(&mut self, skeleton: &mut Skeleton, delta: f32) {
        let reference = self.config.reference_step;
        let frames = (delta / reference + 1.0e-4).floor().max(0.0) as u32;
        let step_time = frames as f32 * reference;
        let spike = frames >= self.config.spike_threshold;

        let (max_sub_steps, fixed_step, saved_gravity) = if spike {
            let gravity = self.world.gravity();
            self.world
                .set_gravity(Vec3::new(gravity.x, gravity.y * 0.5, gravity.z));
            let sub_steps = self.config.spike_sub_steps;
            (sub_steps, reference * sub_steps as f32, Some(gravity))
        } else {
            (frames, reference, None)
        };

        self.pre_simulation(skeleton);
        self.world
            .step_simulation(step_time, max_sub_steps, fixed_step);
        self.post_simulation(skeleton);

        if let Some(gravity) = saved_gravity {
            self.world.set_gravity(gravity);
        }
        debug_assert_eq!(self.scratch.outstanding(), 0);
    }

    /// Runs `steps` updates of the configured warm-up delta.
    pub fn warmup(&mut self, skeleton: &mut Skeleton, steps: usize) {
        for _ in 0..steps {
            self.update(skeleton, self.config.warmup_delta);
        }
    }

    /// Moves every body to where its bone currently puts it.
    pub fn reset(&mut self, skeleton: &Skeleton) {
        for i in 0..self.bodies.len() {
            self.set_transform_from_bone(i, skeleton);
        }
    }

    fn bone_transform(&self, body: usize, skeleton: &Skeleton) -> Transform {
        match self.bodies[body].bone.and_then(|b| skeleton.bones.get(b)) {
            Some(bone) => Transform::new(bone.world_rotation, bone.world_position),
            None => Transform::IDENTITY,
        }
    }

    /// Acquires a scratch transform holding the bone-driven pose of `body`.
    fn body_form(&mut self, body: usize, skeleton: &Skeleton) -> crate::math::TransformHandle {
        let bone = self.bone_transform(body, skeleton);
        let tr = self.scratch.acquire_transform();
        *self.scratch.transform_mut(tr) = bone;
        let offset = self.scratch.acquire_transform();
        *self.scratch.transform_mut(offset) = self.bodies[body].offset;
        let form = self.scratch.compose(tr, offset);
        self.scratch.release_transform(tr);
        self.scratch.release_transform(offset);
        form
    }

    fn set_transform_from_bone(&mut self, body: usize, skeleton: &Skeleton) {
        let form = self.body_form(body, skeleton);
        self.world
            .set_world_transform(self.bodies[body].handle, *self.scratch.transform(form));
        self.scratch.release_transform(form);
    }

    fn set_position_from_bone(&mut self, body: usize, skeleton: &Skeleton) {
        let form = self.body_form(body, skeleton);
        let origin = self.scratch.acquire_vec();
        *self.scratch.vec_mut(origin) = self.scratch.transform(form).origin;
        self.scratch.release_transform(form);

        let handle = self.bodies[body].handle;
        let mut current = self.world.world_transform(handle);
        current.origin = self.scratch.vec(origin);
        self.world.set_world_transform(handle, current);
        self.scratch.release_vec(origin);
    }

    fn pre_simulation(&mut self, skeleton: &Skeleton) {
        for i in 0..self.bodies.len() {
            if self.bodies[i].bone.is_none() {
                continue;
            }
            match self.bodies[i].kind {
                BodyKind::Kinematic => self.set_transform_from_bone(i, skeleton),
                BodyKind::Aligned => self.set_position_from_bone(i, skeleton),
                BodyKind::Dynamic => {}
            }
        }
    }

    fn post_simulation(&mut self, skeleton: &mut Skeleton) {
        for i in 0..self.bodies.len() {
            let BridgeBody {
                handle,
                bone,
                kind,
                offset_inverse,
                ..
            } = self.bodies[i];
            let Some(bone) = bone.filter(|&b| b < skeleton.bones.len()) else {
                continue;
            };
            if kind == BodyKind::Kinematic {
                continue;
            }

            let tr = self.scratch.acquire_transform();
            *self.scratch.transform_mut(tr) = self.world.world_transform(handle);
            let inv = self.scratch.acquire_transform();
            *self.scratch.transform_mut(inv) = offset_inverse;
            let tr2 = self.scratch.compose(tr, inv);
            let q = self.scratch.acquire_quat();
            *self.scratch.quat_mut(q) = self.scratch.transform(tr2).rotation;

            let world_rotation: Quat = skeleton.bones[bone].world_rotation;
            let rotation = world_rotation.conjugate() * self.scratch.quat(q);
            if kind == BodyKind::Dynamic {
                let delta = self.scratch.acquire_vec();
                *self.scratch.vec_mut(delta) =
                    skeleton.world_to_local(bone, self.scratch.transform(tr2).origin);
                skeleton.bones[bone].position += self.scratch.vec(delta);
                self.scratch.release_vec(delta);
            }
            skeleton.bones[bone].rotation = rotation;
            skeleton.update_bone_and_descendants(bone);

            self.scratch.release_quat(q);
            for h in [tr, inv, tr2] {
                self.scratch.release_transform(h);
            }
        }
    }
}
