//! Small hand-built documents shared by the unit tests.

use crate::model::{
    BodyKind, Bone, BoneExt, BoneTail, Constraint, CoordinateSystem, Display, Document,
    FormatInfo, Header, Material, MaterialExt, Morph, MorphData, PmdLayout, PmxBone, PmxGlobals,
    RigidBody, ShapeKind, Skin, Toon, Vertex, VertexEdge, VertexOffset,
};
use crate::reader::IndexWidth;
use crate::text::{Text, TextEncoding};
use glam::{Vec2, Vec3, Vec4};

pub(crate) const ENC: TextEncoding = TextEncoding::Utf16Le;

pub(crate) fn pmx_text(value: &str) -> Text {
    Text::encode(value, ENC)
}

pub(crate) fn sjis(value: &str, width: usize) -> Text {
    Text::fixed(value, width).expect("fixture text fits")
}

pub(crate) fn pmx_globals(width: IndexWidth) -> PmxGlobals {
    PmxGlobals {
        encoding: ENC,
        additional_uv_count: 0,
        vertex_index: width,
        texture_index: width,
        material_index: width,
        bone_index: width,
        morph_index: width,
        rigid_body_index: width,
        extra: Vec::new(),
    }
}

pub(crate) fn pmx_bone(name: &str, position: Vec3, parent: Option<usize>) -> Bone {
    Bone {
        name: pmx_text(name),
        english_name: Some(pmx_text("")),
        position,
        parent,
        ext: BoneExt::Pmx(PmxBone {
            deform_layer: 0,
            flags: PmxBone::ROTATABLE | PmxBone::VISIBLE | PmxBone::ENABLED,
            tail: BoneTail::Offset(Vec3::ZERO),
            inherit: None,
            fixed_axis: None,
            local_axes: None,
            external_key: None,
            ik: None,
        }),
    }
}

pub(crate) fn pmx_vertex(position: Vec3, skin: Skin) -> Vertex {
    Vertex {
        position,
        normal: Vec3::Y,
        uv: Vec2::new(0.25, 0.75),
        additional_uvs: Vec::new(),
        skin,
        edge: VertexEdge::Scale(1.0),
    }
}

pub(crate) fn pmx_morph(name: &str, data: MorphData) -> Morph {
    Morph {
        name: pmx_text(name),
        english_name: Some(pmx_text("")),
        panel: 4,
        data,
    }
}

/// One BDEF1 vertex, one degenerate face and a single root bone.
pub(crate) fn pmx_document(width: IndexWidth) -> Document {
    Document {
        header: Header {
            format: FormatInfo::Pmx(pmx_globals(width)),
            version: 2.0,
            coordinate_system: CoordinateSystem::LeftHanded,
            name: pmx_text("テスト"),
            english_name: Some(pmx_text("test")),
            comment: pmx_text(""),
            english_comment: Some(pmx_text("")),
        },
        vertices: vec![pmx_vertex(
            Vec3::new(0.0, 1.0, 2.0),
            Skin::Bdef1 { bone: Some(0) },
        )],
        faces: vec![[0, 0, 0]],
        textures: Vec::new(),
        materials: vec![Material {
            diffuse: Vec4::ONE,
            specular: Vec3::ZERO,
            shininess: 5.0,
            ambient: Vec3::splat(0.5),
            index_count: 3,
            ext: MaterialExt::Pmx {
                name: pmx_text("mat"),
                english_name: pmx_text(""),
                flags: 0,
                edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
                edge_size: 1.0,
                texture: None,
                sphere_texture: None,
                sphere_mode: 0,
                toon: Toon::Shared(0),
                comment: pmx_text(""),
            },
        }],
        bones: vec![pmx_bone("センター", Vec3::new(0.0, 8.0, 0.0), None)],
        iks: Vec::new(),
        morphs: Vec::new(),
        display: Display::Pmx(Vec::new()),
        rigid_bodies: Vec::new(),
        constraints: Vec::new(),
        trailing: Vec::new(),
    }
}

pub(crate) fn pmd_bone(name: &str, position: Vec3, parent: Option<usize>) -> Bone {
    Bone {
        name: sjis(name, 20),
        english_name: None,
        position,
        parent,
        ext: BoneExt::Pmd {
            tail: 0,
            kind: 0,
            ik: 0,
        },
    }
}

pub(crate) fn pmd_vertex(position: Vec3, bones: [Option<usize>; 2], weight: f32) -> Vertex {
    Vertex {
        position,
        normal: Vec3::new(0.0, 0.0, -1.0),
        uv: Vec2::new(0.5, 0.5),
        additional_uvs: Vec::new(),
        skin: Skin::Bdef2 { bones, weight },
        edge: VertexEdge::Flag(0),
    }
}

pub(crate) fn pmd_morph(name: &str, offsets: Vec<VertexOffset>) -> Morph {
    Morph {
        name: sjis(name, 20),
        english_name: None,
        panel: if offsets.is_empty() { 0 } else { 1 },
        data: MorphData::Vertex(offsets),
    }
}

/// Three vertices in a chain `センター -> 首 -> 頭`, without any optional sections.
pub(crate) fn pmd_document() -> Document {
    Document {
        header: Header {
            format: FormatInfo::Pmd(PmdLayout::default()),
            version: 1.0,
            coordinate_system: CoordinateSystem::LeftHanded,
            name: sjis("テスト", 20),
            english_name: None,
            comment: sjis("コメント", 256),
            english_comment: None,
        },
        vertices: vec![
            pmd_vertex(Vec3::new(0.0, 10.0, 1.0), [Some(0), Some(1)], 1.0),
            pmd_vertex(Vec3::new(1.0, 12.0, 2.0), [Some(1), Some(2)], 0.5),
            pmd_vertex(Vec3::new(-1.0, 14.0, 3.0), [Some(2), None], 1.0),
        ],
        faces: vec![[0, 1, 2]],
        textures: Vec::new(),
        materials: vec![Material {
            diffuse: Vec4::new(1.0, 1.0, 1.0, 0.5),
            specular: Vec3::ZERO,
            shininess: 5.0,
            ambient: Vec3::splat(0.25),
            index_count: 3,
            ext: MaterialExt::Pmd {
                toon_index: -1,
                edge_flag: 1,
                texture_file: sjis("tex.bmp", 20),
            },
        }],
        bones: vec![
            pmd_bone("センター", Vec3::new(0.0, 10.0, 0.0), None),
            pmd_bone("首", Vec3::new(0.0, 12.0, 0.0), Some(0)),
            pmd_bone("頭", Vec3::new(0.0, 14.0, 0.0), Some(1)),
        ],
        iks: Vec::new(),
        morphs: Vec::new(),
        display: Display::Pmd {
            morphs: Vec::new(),
            groups: Vec::new(),
            bones: Vec::new(),
        },
        rigid_bodies: Vec::new(),
        constraints: Vec::new(),
        trailing: Vec::new(),
    }
}

pub(crate) fn rigid_body(bone: Option<usize>, kind: BodyKind, position: Vec3) -> RigidBody {
    RigidBody {
        name: sjis("body", 20),
        english_name: None,
        bone,
        group: 1,
        mask: 0xfffd,
        shape: ShapeKind::Sphere,
        size: Vec3::new(0.5, 0.0, 0.0),
        position,
        rotation: Vec3::ZERO,
        mass: 1.0,
        linear_damping: 0.5,
        angular_damping: 0.5,
        restitution: 0.0,
        friction: 0.5,
        kind,
    }
}

pub(crate) fn constraint(a: usize, b: usize, position: Vec3) -> Constraint {
    Constraint {
        name: sjis("joint", 20),
        english_name: None,
        kind: 0,
        bodies: [a, b],
        position,
        rotation: Vec3::ZERO,
        linear_lower: Vec3::new(0.0, 0.0, -1.0),
        linear_upper: Vec3::new(0.0, 0.0, 2.0),
        angular_lower: Vec3::new(-0.5, -0.25, -0.1),
        angular_upper: Vec3::new(0.5, 0.75, 0.1),
        linear_spring: Vec3::ZERO,
        angular_spring: Vec3::ZERO,
    }
}

pub(crate) fn toon_textures() -> Vec<Text> {
    (1..=10)
        .map(|i| sjis(&format!("toon{i:02}.bmp"), 100))
        .collect()
}
