//! Animation-ready rig built from a decoded model.

use crate::Error;
use crate::model::{Document, ModelFormat, MorphData, SkinBinding, VertexOffset};
use crate::text::Text;
use glam::Vec3;
use std::collections::HashMap;

/// Marker found in the Japanese name of PMD knee bones.
pub const KNEE_MARKER: &str = "ひざ";

/// Decides which PMD IK links rotate only around their local X axis.
///
/// PMD files carry no per-link limits, so knees are recognised by name. PMX links
/// declare their limits and ignore this policy.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HingePolicy {
    /// Links whose bone name contains the marker are hinges.
    NameContains(String),
    /// No PMD link is a hinge.
    Disabled,
}

impl Default for HingePolicy {
    fn default() -> Self {
        Self::NameContains(KNEE_MARKER.to_string())
    }
}

impl HingePolicy {
    pub fn is_hinge(&self, bone_name: &str) -> bool {
        match self {
            Self::NameContains(marker) => bone_name.contains(marker.as_str()),
            Self::Disabled => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RigOptions {
    pub hinge: HingePolicy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RigBone {
    pub name: Text,
    /// ASCII-only name used to match motion tracks.
    pub hex_name: String,
    pub parent: Option<usize>,
    /// Rest position relative to the parent (absolute for roots).
    pub offset: Vec3,
    /// Absolute rest position.
    pub rest_position: Vec3,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RigIkLink {
    pub bone: usize,
    /// Rotation axis restriction; `Some(Vec3::X)` for hinge joints.
    pub limitation: Option<Vec3>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RigIk {
    pub target: usize,
    pub effector: usize,
    pub iterations: u32,
    pub max_angle: f32,
    pub links: Vec<RigIkLink>,
}

/// Sparse per-vertex displacement of one morph at full weight.
#[derive(Clone, Debug, PartialEq)]
pub struct MorphTarget {
    pub name: Text,
    pub hex_name: String,
    pub offsets: Vec<VertexOffset>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rig {
    pub format: ModelFormat,
    pub bones: Vec<RigBone>,
    pub iks: Vec<RigIk>,
    pub morph_targets: Vec<MorphTarget>,
    pub skins: Vec<SkinBinding>,
}

impl Rig {
    pub fn bone_index(&self, hex_name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.hex_name == hex_name)
    }

    /// Parent-first order in which world transforms can be computed.
    pub fn update_order(&self) -> Vec<usize> {
        let mut children = vec![Vec::new(); self.bones.len()];
        let mut order = Vec::with_capacity(self.bones.len());
        let mut stack = Vec::new();
        for (i, bone) in self.bones.iter().enumerate() {
            match bone.parent {
                Some(p) if p < self.bones.len() && p != i => children[p].push(i),
                _ => stack.push(i),
            }
        }
        stack.reverse();
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(children[i].iter().rev().copied());
        }
        if order.len() != self.bones.len() {
            log::warn!(
                "bone hierarchy has a cycle; {} bones are never updated",
                self.bones.len() - order.len()
            );
        }
        order
    }
}

fn missing(field: &'static str, index: usize, len: usize) -> Error {
    Error::ReferentialIntegrity {
        field,
        index: index as i64,
        len,
    }
}

pub fn build_rig(doc: &Document, options: &RigOptions) -> Result<Rig, Error> {
    let format = doc.format();

    let mut bones = Vec::with_capacity(doc.bones.len());
    for bone in &doc.bones {
        let offset = match bone.parent {
            Some(p) => {
                let parent = doc
                    .bones
                    .get(p)
                    .ok_or_else(|| missing("bone parent", p, doc.bones.len()))?;
                bone.position - parent.position
            }
            None => bone.position,
        };
        bones.push(RigBone {
            name: bone.name.clone(),
            hex_name: bone.name.hex_name(),
            parent: bone.parent,
            offset,
            rest_position: bone.position,
        });
    }

    let iks = build_iks(doc, format, options)?;
    let morph_targets = build_morph_targets(doc, format)?;
    let skins = doc.vertices.iter().map(|v| v.skin.effective()).collect();

    log::debug!(
        "rig: {} bones, {} IK chains, {} morph targets",
        bones.len(),
        iks.len(),
        morph_targets.len()
    );
    Ok(Rig {
        format,
        bones,
        iks,
        morph_targets,
        skins,
    })
}

fn build_iks(
    doc: &Document,
    format: ModelFormat,
    options: &RigOptions,
) -> Result<Vec<RigIk>, Error> {
    let mut out = Vec::new();
    for ik in doc.ik_chains() {
        let mut links = Vec::with_capacity(ik.links.len());
        for link in &ik.links {
            let hinge = match format {
                ModelFormat::Pmd => {
                    let bone = doc
                        .bones
                        .get(link.bone)
                        .ok_or_else(|| missing("IK link", link.bone, doc.bones.len()))?;
                    options.hinge.is_hinge(bone.name.as_str())
                }
                ModelFormat::Pmx => link.limit.is_some(),
            };
            links.push(RigIkLink {
                bone: link.bone,
                limitation: hinge.then_some(Vec3::X),
            });
        }
        let max_angle = match format {
            ModelFormat::Pmd => ik.max_angle * 4.0,
            ModelFormat::Pmx => ik.max_angle,
        };
        out.push(RigIk {
            target: ik.target,
            effector: ik.effector,
            iterations: ik.iterations,
            max_angle,
            links,
        });
    }
    Ok(out)
}

#[derive(Default)]
struct Accumulator {
    offsets: Vec<VertexOffset>,
    slots: HashMap<usize, usize>,
}

impl Accumulator {
    fn add(&mut self, vertex: usize, displacement: Vec3) {
        match self.slots.get(&vertex) {
            Some(&slot) => self.offsets[slot].displacement += displacement,
            None => {
                self.slots.insert(vertex, self.offsets.len());
                self.offsets.push(VertexOffset {
                    vertex,
                    displacement,
                });
            }
        }
    }
}

fn build_morph_targets(doc: &Document, format: ModelFormat) -> Result<Vec<MorphTarget>, Error> {
    let base: &[VertexOffset] = match (format, doc.morphs.first().map(|m| &m.data)) {
        (ModelFormat::Pmd, Some(MorphData::Vertex(base))) => base,
        _ => &[],
    };

    let add_vertex_morph =
        |acc: &mut Accumulator, offsets: &[VertexOffset], ratio: f32| -> Result<(), Error> {
            for o in offsets {
                let vertex = match format {
                    ModelFormat::Pmd => {
                        base.get(o.vertex)
                            .ok_or_else(|| missing("morph base element", o.vertex, base.len()))?
                            .vertex
                    }
                    ModelFormat::Pmx => o.vertex,
                };
                acc.add(vertex, o.displacement * ratio);
            }
            Ok(())
        };

    let mut out = Vec::with_capacity(doc.morphs.len());
    for (index, morph) in doc.morphs.iter().enumerate() {
        let mut acc = Accumulator::default();
        match (&morph.data, format) {
            (MorphData::Vertex(_), ModelFormat::Pmd) if index == 0 => {}
            (MorphData::Vertex(offsets), _) => add_vertex_morph(&mut acc, offsets, 1.0)?,
            (MorphData::Group(children), ModelFormat::Pmx) => {
                for child in children {
                    let sub = doc.morphs.get(child.morph).ok_or_else(|| {
                        missing("group morph element", child.morph, doc.morphs.len())
                    })?;
                    if let MorphData::Vertex(offsets) = &sub.data {
                        add_vertex_morph(&mut acc, offsets, child.ratio)?;
                    }
                }
            }
            _ => {}
        }
        out.push(MorphTarget {
            name: morph.name.clone(),
            hex_name: morph.name.hex_name(),
            offsets: acc.offsets,
        });
    }
    Ok(out)
}
