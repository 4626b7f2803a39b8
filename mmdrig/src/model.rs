//! Decoded model documents shared by the PMD and PMX loaders.
//!
//! Format-specific members live in sum types (`BoneExt`, `MaterialExt`,
//! `VertexEdge`, `Display`, ...) so consumers match on them instead of probing for
//! absent fields.

use crate::reader::IndexWidth;
use crate::text::{Text, TextEncoding};
use glam::{Quat, Vec2, Vec3, Vec4};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModelFormat {
    Pmd,
    Pmx,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoordinateSystem {
    #[default]
    LeftHanded,
    RightHanded,
}

/// Global field layout declared by a PMX header.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmxGlobals {
    pub encoding: TextEncoding,
    pub additional_uv_count: u8,
    pub vertex_index: IndexWidth,
    pub texture_index: IndexWidth,
    pub material_index: IndexWidth,
    pub bone_index: IndexWidth,
    pub morph_index: IndexWidth,
    pub rigid_body_index: IndexWidth,
    /// Header bytes past the eight defined globals.
    pub extra: Vec<u8>,
}

/// Which optional trailing sections a PMD file carries.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmdLayout {
    /// `None` when the file ends before the English section.
    pub english_flag: Option<u8>,
    /// Ten 100-byte file names when present.
    pub toon_textures: Option<Vec<Text>>,
    pub has_physics: bool,
}

impl PmdLayout {
    pub fn has_english(&self) -> bool {
        self.english_flag.is_some_and(|flag| flag > 0)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormatInfo {
    Pmd(PmdLayout),
    Pmx(PmxGlobals),
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    pub format: FormatInfo,
    pub version: f32,
    pub coordinate_system: CoordinateSystem,
    pub name: Text,
    pub english_name: Option<Text>,
    pub comment: Text,
    pub english_comment: Option<Text>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub additional_uvs: Vec<Vec4>,
    pub skin: Skin,
    pub edge: VertexEdge,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VertexEdge {
    /// PMD: non-zero disables the outline for this vertex.
    Flag(u8),
    /// PMX: outline thickness multiplier.
    Scale(f32),
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Skin {
    Bdef1 {
        bone: Option<usize>,
    },
    Bdef2 {
        bones: [Option<usize>; 2],
        weight: f32,
    },
    Bdef4 {
        bones: [Option<usize>; 4],
        weights: [f32; 4],
    },
    /// Spherical deform. Only the two-bone blend is honoured when skinning.
    Sdef {
        bones: [Option<usize>; 2],
        weight: f32,
        c: Vec3,
        r0: Vec3,
        r1: Vec3,
    },
    /// Dual-quaternion deform (PMX 2.1). Skinned as a four-bone linear blend.
    Qdef {
        bones: [Option<usize>; 4],
        weights: [f32; 4],
    },
}

/// Up to four bone influences whose weights sum to one.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SkinBinding {
    pub bones: [usize; 4],
    pub weights: [f32; 4],
}

impl Skin {
    pub fn bones(&self) -> &[Option<usize>] {
        match self {
            Self::Bdef1 { bone } => std::slice::from_ref(bone),
            Self::Bdef2 { bones, .. } | Self::Sdef { bones, .. } => bones,
            Self::Bdef4 { bones, .. } | Self::Qdef { bones, .. } => bones,
        }
    }

    /// Linear-blend binding used for skinning.
    pub fn effective(&self) -> SkinBinding {
        let slot = |bone: Option<usize>| bone.unwrap_or(0);
        match *self {
            Self::Bdef1 { bone } => SkinBinding {
                bones: [slot(bone), 0, 0, 0],
                weights: [1.0, 0.0, 0.0, 0.0],
            },
            Self::Bdef2 { bones, weight } | Self::Sdef { bones, weight, .. } => SkinBinding {
                bones: [slot(bones[0]), slot(bones[1]), 0, 0],
                weights: [weight, 1.0 - weight, 0.0, 0.0],
            },
            Self::Bdef4 { bones, weights } | Self::Qdef { bones, weights } => {
                let sum: f32 = weights.iter().sum();
                let weights = if sum.abs() > f32::EPSILON {
                    weights.map(|w| w / sum)
                } else {
                    [1.0, 0.0, 0.0, 0.0]
                };
                SkinBinding {
                    bones: bones.map(slot),
                    weights,
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Material {
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub shininess: f32,
    pub ambient: Vec3,
    /// Number of face indices (three per triangle) drawn with this material.
    pub index_count: u32,
    pub ext: MaterialExt,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaterialExt {
    Pmd {
        toon_index: i8,
        edge_flag: u8,
        /// `texture.bmp*sphere.spa` style 20-byte file reference.
        texture_file: Text,
    },
    Pmx {
        name: Text,
        english_name: Text,
        flags: u8,
        edge_color: Vec4,
        edge_size: f32,
        texture: Option<usize>,
        sphere_texture: Option<usize>,
        sphere_mode: u8,
        toon: Toon,
        comment: Text,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Toon {
    Texture(Option<usize>),
    /// One of the ten shared `toonNN.bmp` textures.
    Shared(u8),
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bone {
    pub name: Text,
    pub english_name: Option<Text>,
    /// Absolute rest position.
    pub position: Vec3,
    pub parent: Option<usize>,
    pub ext: BoneExt,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoneExt {
    Pmd {
        tail: i16,
        kind: u8,
        ik: i16,
    },
    Pmx(PmxBone),
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmxBone {
    pub deform_layer: i32,
    pub flags: u16,
    pub tail: BoneTail,
    pub inherit: Option<InheritTransform>,
    pub fixed_axis: Option<Vec3>,
    pub local_axes: Option<LocalAxes>,
    pub external_key: Option<i32>,
    pub ik: Option<IkChain>,
}

impl PmxBone {
    pub const CONNECTED: u16 = 0x0001;
    pub const ROTATABLE: u16 = 0x0002;
    pub const TRANSLATABLE: u16 = 0x0004;
    pub const VISIBLE: u16 = 0x0008;
    pub const ENABLED: u16 = 0x0010;
    pub const IK: u16 = 0x0020;
    pub const INHERIT_ROTATION: u16 = 0x0100;
    pub const INHERIT_TRANSLATION: u16 = 0x0200;
    pub const FIXED_AXIS: u16 = 0x0400;
    pub const LOCAL_AXES: u16 = 0x0800;
    pub const PHYSICS_AFTER_DEFORM: u16 = 0x1000;
    pub const EXTERNAL_PARENT: u16 = 0x2000;

    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoneTail {
    Connect(Option<usize>),
    Offset(Vec3),
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InheritTransform {
    pub parent: Option<usize>,
    pub ratio: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalAxes {
    pub x: Vec3,
    pub z: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IkChain {
    pub target: usize,
    pub effector: usize,
    pub iterations: u32,
    /// Raw per-iteration angle limit as stored in the file.
    pub max_angle: f32,
    pub links: Vec<IkLink>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IkLink {
    pub bone: usize,
    pub limit: Option<AngleLimit>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AngleLimit {
    pub lower: Vec3,
    pub upper: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Morph {
    pub name: Text,
    pub english_name: Option<Text>,
    /// PMD skin category or PMX control panel.
    pub panel: u8,
    pub data: MorphData,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MorphData {
    Group(Vec<GroupOffset>),
    Vertex(Vec<VertexOffset>),
    Bone(Vec<BoneOffset>),
    /// `channel` 0 is the base UV, 1..=4 the additional channels.
    Uv {
        channel: u8,
        offsets: Vec<UvOffset>,
    },
    Material(Vec<MaterialOffset>),
    Flip(Vec<GroupOffset>),
    Impulse(Vec<ImpulseOffset>),
}

impl MorphData {
    pub fn len(&self) -> usize {
        match self {
            Self::Group(v) | Self::Flip(v) => v.len(),
            Self::Vertex(v) => v.len(),
            Self::Bone(v) => v.len(),
            Self::Uv { offsets, .. } => offsets.len(),
            Self::Material(v) => v.len(),
            Self::Impulse(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupOffset {
    pub morph: usize,
    pub ratio: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VertexOffset {
    /// PMX and the PMD base morph: a vertex index. Other PMD morphs: an index into
    /// the base morph's element list.
    pub vertex: usize,
    pub displacement: Vec3,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneOffset {
    pub bone: usize,
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UvOffset {
    pub vertex: usize,
    pub offset: Vec4,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaterialOffset {
    /// `None` applies to every material.
    pub material: Option<usize>,
    /// 0 = multiply, 1 = add.
    pub operation: u8,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub shininess: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_tint: Vec4,
    pub sphere_tint: Vec4,
    pub toon_tint: Vec4,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImpulseOffset {
    pub rigid_body: usize,
    pub local: u8,
    pub velocity: Vec3,
    pub torque: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Display {
    Pmd {
        /// Morphs listed in the expression panel.
        morphs: Vec<usize>,
        groups: Vec<BoneGroup>,
        bones: Vec<BoneDisplay>,
    },
    Pmx(Vec<DisplayFrame>),
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneGroup {
    pub name: Text,
    pub english_name: Option<Text>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneDisplay {
    pub bone: usize,
    /// 1-based index into `groups`.
    pub group: u8,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DisplayFrame {
    pub name: Text,
    pub english_name: Text,
    pub special: u8,
    pub elements: Vec<DisplayElement>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisplayElement {
    Bone(usize),
    Morph(usize),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeKind {
    Sphere,
    Box,
    Capsule,
}

impl ShapeKind {
    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Sphere),
            1 => Some(Self::Box),
            2 => Some(Self::Capsule),
            _ => None,
        }
    }

    pub(crate) fn byte(self) -> u8 {
        match self {
            Self::Sphere => 0,
            Self::Box => 1,
            Self::Capsule => 2,
        }
    }
}

/// Collision shape with the dimensions it actually uses.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Capsule { radius: f32, height: f32 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BodyKind {
    /// Follows its bone; never written by the simulation.
    Kinematic,
    /// Simulated; drives its bone's rotation and position.
    Dynamic,
    /// Simulated, but its position is pinned to the bone every step.
    Aligned,
}

impl BodyKind {
    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Kinematic),
            1 => Some(Self::Dynamic),
            2 => Some(Self::Aligned),
            _ => None,
        }
    }

    pub(crate) fn byte(self) -> u8 {
        match self {
            Self::Kinematic => 0,
            Self::Dynamic => 1,
            Self::Aligned => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RigidBody {
    pub name: Text,
    pub english_name: Option<Text>,
    pub bone: Option<usize>,
    pub group: u8,
    /// Bit `n` set means the body collides with group `n`.
    pub mask: u16,
    pub shape: ShapeKind,
    /// Raw width/height/depth; which components matter depends on `shape`.
    pub size: Vec3,
    /// PMD: offset from the bone. PMX: model-space position.
    pub position: Vec3,
    /// Euler angles in radians.
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub kind: BodyKind,
}

impl RigidBody {
    pub fn shape(&self) -> Shape {
        match self.shape {
            ShapeKind::Sphere => Shape::Sphere {
                radius: self.size.x,
            },
            ShapeKind::Box => Shape::Box {
                half_extents: self.size,
            },
            ShapeKind::Capsule => Shape::Capsule {
                radius: self.size.x,
                height: self.size.y,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constraint {
    pub name: Text,
    pub english_name: Option<Text>,
    /// PMX joint type; always 0 for PMD.
    pub kind: u8,
    pub bodies: [usize; 2],
    pub position: Vec3,
    pub rotation: Vec3,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_spring: Vec3,
    pub angular_spring: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Document {
    pub header: Header,
    pub vertices: Vec<Vertex>,
    pub faces: Vec<[usize; 3]>,
    pub textures: Vec<Text>,
    pub materials: Vec<Material>,
    pub bones: Vec<Bone>,
    /// PMD IK list. PMX keeps IK on its bones.
    pub iks: Vec<IkChain>,
    pub morphs: Vec<Morph>,
    pub display: Display,
    pub rigid_bodies: Vec<RigidBody>,
    pub constraints: Vec<Constraint>,
    /// Sections past the joints that are kept undecoded (PMX 2.1 soft bodies).
    pub trailing: Vec<u8>,
}

impl Document {
    pub fn format(&self) -> ModelFormat {
        match self.header.format {
            FormatInfo::Pmd(_) => ModelFormat::Pmd,
            FormatInfo::Pmx(_) => ModelFormat::Pmx,
        }
    }

    /// IK chains from either the PMD list or the PMX bones, in file order.
    pub fn ik_chains(&self) -> Vec<&IkChain> {
        match self.format() {
            ModelFormat::Pmd => self.iks.iter().collect(),
            ModelFormat::Pmx => self
                .bones
                .iter()
                .filter_map(|bone| match &bone.ext {
                    BoneExt::Pmx(pmx) => pmx.ik.as_ref(),
                    BoneExt::Pmd { .. } => None,
                })
                .collect(),
        }
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name.as_str() == name)
    }

    pub fn morph_index(&self, name: &str) -> Option<usize> {
        self.morphs.iter().position(|m| m.name.as_str() == name)
    }
}
