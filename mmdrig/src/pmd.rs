//! `.pmd` model decoder and encoder.
//!
//! Every name is a fixed-width Shift_JIS field. The English names, toon textures
//! and physics sections at the end of the file are optional; which of them were
//! present is recorded in [`PmdLayout`] so encoding reproduces the same layout.

use crate::model::{
    Bone, BoneDisplay, BoneExt, BoneGroup, BodyKind, Constraint, CoordinateSystem, Display,
    Document, FormatInfo, Header, IkChain, IkLink, Material, MaterialExt, Morph, MorphData,
    PmdLayout, RigidBody, ShapeKind, Skin, Vertex, VertexEdge, VertexOffset,
};
use crate::reader::{ByteReader, optional_index, required_index};
use crate::text::Text;
use crate::writer::{ByteWriter, index_value};
use crate::Error;

pub(crate) const MAGIC: &[u8; 3] = b"Pmd";

const NAME_LEN: usize = 20;
const COMMENT_LEN: usize = 256;
const GROUP_NAME_LEN: usize = 50;
const TOON_NAME_LEN: usize = 100;
const TOON_COUNT: usize = 10;

const VERTEX_SIZE: usize = 38;
const MORPH_ELEMENT_SIZE: usize = 16;
const RIGID_BODY_SIZE: usize = 83;
const CONSTRAINT_SIZE: usize = 124;

const NO_BONE: u16 = u16::MAX;

pub(crate) fn decode(bytes: &[u8]) -> Result<Document, Error> {
    let mut r = ByteReader::new(bytes);
    let magic = r.read_byte_array::<3>()?;
    if &magic != MAGIC {
        return Err(Error::unsupported(format!("bad PMD magic {magic:02x?}")));
    }
    let version = r.read_f32()?;
    let name = r.read_fixed_text(NAME_LEN)?;
    let comment = r.read_fixed_text(COMMENT_LEN)?;
    log::debug!("PMD {version}: {name:?}");

    let vertices = read_vertices(&mut r)?;
    let faces = read_faces(&mut r)?;
    let materials = read_materials(&mut r)?;
    let mut bones = read_bones(&mut r)?;
    let iks = read_iks(&mut r)?;
    let mut morphs = read_morphs(&mut r)?;

    let morph_display_count = r.read_u8()? as usize;
    let mut morph_display = Vec::with_capacity(morph_display_count);
    for _ in 0..morph_display_count {
        morph_display.push(r.read_u16()? as usize);
    }

    let group_count = r.read_u8()? as usize;
    let mut groups = Vec::with_capacity(group_count);
    for _ in 0..group_count {
        groups.push(BoneGroup {
            name: r.read_fixed_text(GROUP_NAME_LEN)?,
            english_name: None,
        });
    }

    let bone_display_count = r.read_count(3)?;
    let mut bone_display = Vec::with_capacity(bone_display_count);
    for _ in 0..bone_display_count {
        let bone = required_index(r.read_i16()? as i64, "bone display bone")?;
        let group = r.read_u8()?;
        bone_display.push(BoneDisplay { bone, group });
    }

    let mut layout = PmdLayout::default();
    let mut english_name = None;
    let mut english_comment = None;

    if !r.is_at_end() {
        let flag = r.read_u8()?;
        layout.english_flag = Some(flag);
        if flag > 0 {
            english_name = Some(r.read_fixed_text(NAME_LEN)?);
            english_comment = Some(r.read_fixed_text(COMMENT_LEN)?);
            for bone in &mut bones {
                bone.english_name = Some(r.read_fixed_text(NAME_LEN)?);
            }
            for morph in morphs.iter_mut().skip(1) {
                morph.english_name = Some(r.read_fixed_text(NAME_LEN)?);
            }
            for group in &mut groups {
                group.english_name = Some(r.read_fixed_text(GROUP_NAME_LEN)?);
            }
        }
    }

    if !r.is_at_end() {
        let mut toon = Vec::with_capacity(TOON_COUNT);
        for _ in 0..TOON_COUNT {
            toon.push(r.read_fixed_text(TOON_NAME_LEN)?);
        }
        layout.toon_textures = Some(toon);
    }

    let mut rigid_bodies = Vec::new();
    let mut constraints = Vec::new();
    if !r.is_at_end() {
        rigid_bodies = read_rigid_bodies(&mut r)?;
        constraints = read_constraints(&mut r)?;
        layout.has_physics = true;
    }

    let trailing = r.take_rest().to_vec();
    if !trailing.is_empty() {
        log::warn!("{} unknown bytes after the PMD physics section", trailing.len());
    }

    log::debug!(
        "PMD sections: {} vertices, {} faces, {} materials, {} bones, {} iks, {} morphs, {} bodies, {} constraints",
        vertices.len(),
        faces.len(),
        materials.len(),
        bones.len(),
        iks.len(),
        morphs.len(),
        rigid_bodies.len(),
        constraints.len()
    );

    Ok(Document {
        header: Header {
            format: FormatInfo::Pmd(layout),
            version,
            coordinate_system: CoordinateSystem::LeftHanded,
            name,
            english_name,
            comment,
            english_comment,
        },
        vertices,
        faces,
        textures: Vec::new(),
        materials,
        bones,
        iks,
        morphs,
        display: Display::Pmd {
            morphs: morph_display,
            groups,
            bones: bone_display,
        },
        rigid_bodies,
        constraints,
        trailing,
    })
}

fn skin_bone(raw: u16) -> Option<usize> {
    (raw != NO_BONE).then_some(raw as usize)
}

fn read_vertices(r: &mut ByteReader<'_>) -> Result<Vec<Vertex>, Error> {
    let count = r.read_count(VERTEX_SIZE)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let position = r.read_vec3()?;
        let normal = r.read_vec3()?;
        let uv = r.read_vec2()?;
        let bones = [skin_bone(r.read_u16()?), skin_bone(r.read_u16()?)];
        let weight = r.read_u8()? as f32 / 100.0;
        let edge = r.read_u8()?;
        out.push(Vertex {
            position,
            normal,
            uv,
            additional_uvs: Vec::new(),
            skin: Skin::Bdef2 { bones, weight },
            edge: VertexEdge::Flag(edge),
        });
    }
    Ok(out)
}

fn read_faces(r: &mut ByteReader<'_>) -> Result<Vec<[usize; 3]>, Error> {
    let index_count = r.read_count(2)?;
    if index_count % 3 != 0 {
        return Err(Error::unsupported(format!(
            "face index count {index_count} is not a multiple of 3"
        )));
    }
    let mut out = Vec::with_capacity(index_count / 3);
    for _ in 0..index_count / 3 {
        out.push([
            r.read_u16()? as usize,
            r.read_u16()? as usize,
            r.read_u16()? as usize,
        ]);
    }
    Ok(out)
}

fn read_materials(r: &mut ByteReader<'_>) -> Result<Vec<Material>, Error> {
    let count = r.read_count(70)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let diffuse = r.read_vec4()?;
        let shininess = r.read_f32()?;
        let specular = r.read_vec3()?;
        let ambient = r.read_vec3()?;
        let toon_index = r.read_i8()?;
        let edge_flag = r.read_u8()?;
        let index_count = r.read_u32()?;
        let texture_file = r.read_fixed_text(NAME_LEN)?;
        out.push(Material {
            diffuse,
            specular,
            shininess,
            ambient,
            index_count,
            ext: MaterialExt::Pmd {
                toon_index,
                edge_flag,
                texture_file,
            },
        });
    }
    Ok(out)
}

fn read_bones(r: &mut ByteReader<'_>) -> Result<Vec<Bone>, Error> {
    let count = r.read_u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_fixed_text(NAME_LEN)?;
        let parent = optional_index(r.read_i16()? as i64, "bone parent")?;
        let tail = r.read_i16()?;
        let kind = r.read_u8()?;
        let ik = r.read_i16()?;
        let position = r.read_vec3()?;
        out.push(Bone {
            name,
            english_name: None,
            position,
            parent,
            ext: BoneExt::Pmd { tail, kind, ik },
        });
    }
    Ok(out)
}

fn read_iks(r: &mut ByteReader<'_>) -> Result<Vec<IkChain>, Error> {
    let count = r.read_u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let target = r.read_u16()? as usize;
        let effector = r.read_u16()? as usize;
        let link_count = r.read_u8()? as usize;
        let iterations = r.read_u16()? as u32;
        let max_angle = r.read_f32()?;
        let mut links = Vec::with_capacity(link_count);
        for _ in 0..link_count {
            links.push(IkLink {
                bone: r.read_u16()? as usize,
                limit: None,
            });
        }
        out.push(IkChain {
            target,
            effector,
            iterations,
            max_angle,
            links,
        });
    }
    Ok(out)
}

fn read_morphs(r: &mut ByteReader<'_>) -> Result<Vec<Morph>, Error> {
    let count = r.read_u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_fixed_text(NAME_LEN)?;
        let element_count = r.read_u32()? as usize;
        let panel = r.read_u8()?;
        if element_count.saturating_mul(MORPH_ELEMENT_SIZE) > r.remaining() {
            return Err(Error::TruncatedInput {
                offset: r.offset(),
                needed: element_count.saturating_mul(MORPH_ELEMENT_SIZE),
                remaining: r.remaining(),
            });
        }
        let mut offsets = Vec::with_capacity(element_count);
        for _ in 0..element_count {
            offsets.push(VertexOffset {
                vertex: r.read_u32()? as usize,
                displacement: r.read_vec3()?,
            });
        }
        out.push(Morph {
            name,
            english_name: None,
            panel,
            data: MorphData::Vertex(offsets),
        });
    }
    Ok(out)
}

fn read_rigid_bodies(r: &mut ByteReader<'_>) -> Result<Vec<RigidBody>, Error> {
    let count = r.read_count(RIGID_BODY_SIZE)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_fixed_text(NAME_LEN)?;
        let bone = optional_index(r.read_i16()? as i64, "rigid body bone")?;
        let group = r.read_u8()?;
        let mask = r.read_u16()?;
        let shape_byte = r.read_u8()?;
        let shape = ShapeKind::from_byte(shape_byte)
            .ok_or_else(|| Error::unsupported(format!("rigid body shape {shape_byte}")))?;
        let size = r.read_vec3()?;
        let position = r.read_vec3()?;
        let rotation = r.read_vec3()?;
        let mass = r.read_f32()?;
        let linear_damping = r.read_f32()?;
        let angular_damping = r.read_f32()?;
        let restitution = r.read_f32()?;
        let friction = r.read_f32()?;
        let kind_byte = r.read_u8()?;
        let kind = BodyKind::from_byte(kind_byte)
            .ok_or_else(|| Error::unsupported(format!("rigid body type {kind_byte}")))?;
        out.push(RigidBody {
            name,
            english_name: None,
            bone,
            group,
            mask,
            shape,
            size,
            position,
            rotation,
            mass,
            linear_damping,
            angular_damping,
            restitution,
            friction,
            kind,
        });
    }
    Ok(out)
}

fn read_constraints(r: &mut ByteReader<'_>) -> Result<Vec<Constraint>, Error> {
    let count = r.read_count(CONSTRAINT_SIZE)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name = r.read_fixed_text(NAME_LEN)?;
        let a = r.read_u32()? as usize;
        let b = r.read_u32()? as usize;
        out.push(Constraint {
            name,
            english_name: None,
            kind: 0,
            bodies: [a, b],
            position: r.read_vec3()?,
            rotation: r.read_vec3()?,
            linear_lower: r.read_vec3()?,
            linear_upper: r.read_vec3()?,
            angular_lower: r.read_vec3()?,
            angular_upper: r.read_vec3()?,
            linear_spring: r.read_vec3()?,
            angular_spring: r.read_vec3()?,
        });
    }
    Ok(out)
}

fn u16_field(value: usize, what: &str) -> Result<u16, Error> {
    u16::try_from(value).map_err(|_| Error::invalid(format!("{what} {value} does not fit in u16")))
}

fn u32_field(value: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| Error::invalid(format!("{what} {value} does not fit in u32")))
}

fn i16_index(value: Option<usize>, what: &str) -> Result<i16, Error> {
    let raw = index_value(value);
    i16::try_from(raw).map_err(|_| Error::invalid(format!("{what} {raw} does not fit in i16")))
}

fn english<'a>(text: Option<&'a Text>, what: &str) -> Result<&'a Text, Error> {
    text.ok_or_else(|| Error::invalid(format!("{what} has no English name")))
}

pub(crate) fn encode(doc: &Document) -> Result<Vec<u8>, Error> {
    let FormatInfo::Pmd(layout) = &doc.header.format else {
        return Err(Error::invalid("document is not a PMD model"));
    };
    let mut w = ByteWriter::new();
    w.write_bytes(MAGIC);
    w.write_f32(doc.header.version);
    w.write_fixed_text(&doc.header.name, NAME_LEN)?;
    w.write_fixed_text(&doc.header.comment, COMMENT_LEN)?;

    w.write_count(doc.vertices.len())?;
    for v in &doc.vertices {
        let Skin::Bdef2 { bones, weight } = v.skin else {
            return Err(Error::invalid("PMD vertices must use two-bone skinning"));
        };
        let VertexEdge::Flag(edge) = v.edge else {
            return Err(Error::invalid("PMD vertices carry an edge flag"));
        };
        w.write_vec3(v.position);
        w.write_vec3(v.normal);
        w.write_vec2(v.uv);
        for bone in bones {
            w.write_u16(match bone {
                Some(b) => u16_field(b, "skin bone")?,
                None => NO_BONE,
            });
        }
        let scaled = (weight * 100.0).round();
        if !(0.0..=255.0).contains(&scaled) {
            return Err(Error::invalid(format!("PMD skin weight {weight} out of range")));
        }
        w.write_u8(scaled as u8);
        w.write_u8(edge);
    }

    w.write_count(doc.faces.len() * 3)?;
    for face in &doc.faces {
        for &i in face {
            w.write_u16(u16_field(i, "face vertex")?);
        }
    }

    w.write_count(doc.materials.len())?;
    for m in &doc.materials {
        let MaterialExt::Pmd {
            toon_index,
            edge_flag,
            texture_file,
        } = &m.ext
        else {
            return Err(Error::invalid("PMD materials need the PMD payload"));
        };
        w.write_vec4(m.diffuse);
        w.write_f32(m.shininess);
        w.write_vec3(m.specular);
        w.write_vec3(m.ambient);
        w.write_i8(*toon_index);
        w.write_u8(*edge_flag);
        w.write_u32(m.index_count);
        w.write_fixed_text(texture_file, NAME_LEN)?;
    }

    w.write_count_u16(doc.bones.len())?;
    for bone in &doc.bones {
        let BoneExt::Pmd { tail, kind, ik } = bone.ext else {
            return Err(Error::invalid("PMD bones need the PMD payload"));
        };
        w.write_fixed_text(&bone.name, NAME_LEN)?;
        w.write_i16(i16_index(bone.parent, "bone parent")?);
        w.write_i16(tail);
        w.write_u8(kind);
        w.write_i16(ik);
        w.write_vec3(bone.position);
    }

    w.write_count_u16(doc.iks.len())?;
    for ik in &doc.iks {
        w.write_u16(u16_field(ik.target, "IK target")?);
        w.write_u16(u16_field(ik.effector, "IK effector")?);
        w.write_count_u8(ik.links.len())?;
        w.write_u16(u16_field(ik.iterations as usize, "IK iterations")?);
        w.write_f32(ik.max_angle);
        for link in &ik.links {
            w.write_u16(u16_field(link.bone, "IK link")?);
        }
    }

    w.write_count_u16(doc.morphs.len())?;
    for morph in &doc.morphs {
        let MorphData::Vertex(offsets) = &morph.data else {
            return Err(Error::invalid(format!(
                "PMD morph {:?} must be a vertex morph",
                morph.name.as_str()
            )));
        };
        w.write_fixed_text(&morph.name, NAME_LEN)?;
        w.write_count(offsets.len())?;
        w.write_u8(morph.panel);
        for o in offsets {
            w.write_u32(u32_field(o.vertex, "morph vertex")?);
            w.write_vec3(o.displacement);
        }
    }

    let Display::Pmd {
        morphs: morph_display,
        groups,
        bones: bone_display,
    } = &doc.display
    else {
        return Err(Error::invalid("PMD models need PMD display lists"));
    };
    w.write_count_u8(morph_display.len())?;
    for &m in morph_display {
        w.write_u16(u16_field(m, "morph display entry")?);
    }
    w.write_count_u8(groups.len())?;
    for group in groups {
        w.write_fixed_text(&group.name, GROUP_NAME_LEN)?;
    }
    w.write_count(bone_display.len())?;
    for entry in bone_display {
        w.write_i16(i16_index(Some(entry.bone), "bone display bone")?);
        w.write_u8(entry.group);
    }

    if let Some(flag) = layout.english_flag {
        w.write_u8(flag);
        if flag > 0 {
            w.write_fixed_text(english(doc.header.english_name.as_ref(), "model")?, NAME_LEN)?;
            w.write_fixed_text(
                english(doc.header.english_comment.as_ref(), "model comment")?,
                COMMENT_LEN,
            )?;
            for bone in &doc.bones {
                w.write_fixed_text(english(bone.english_name.as_ref(), "bone")?, NAME_LEN)?;
            }
            for morph in doc.morphs.iter().skip(1) {
                w.write_fixed_text(english(morph.english_name.as_ref(), "morph")?, NAME_LEN)?;
            }
            for group in groups {
                w.write_fixed_text(
                    english(group.english_name.as_ref(), "bone group")?,
                    GROUP_NAME_LEN,
                )?;
            }
        }
    } else if layout.toon_textures.is_some() || layout.has_physics {
        return Err(Error::invalid(
            "PMD toon or physics sections require the English section byte",
        ));
    }

    if let Some(toon) = &layout.toon_textures {
        if toon.len() != TOON_COUNT {
            return Err(Error::invalid(format!(
                "PMD carries {TOON_COUNT} toon textures, got {}",
                toon.len()
            )));
        }
        for name in toon {
            w.write_fixed_text(name, TOON_NAME_LEN)?;
        }
    } else if layout.has_physics {
        return Err(Error::invalid("PMD physics section requires toon textures"));
    }

    if layout.has_physics {
        w.write_count(doc.rigid_bodies.len())?;
        for body in &doc.rigid_bodies {
            w.write_fixed_text(&body.name, NAME_LEN)?;
            w.write_i16(i16_index(body.bone, "rigid body bone")?);
            w.write_u8(body.group);
            w.write_u16(body.mask);
            w.write_u8(body.shape.byte());
            w.write_vec3(body.size);
            w.write_vec3(body.position);
            w.write_vec3(body.rotation);
            w.write_f32(body.mass);
            w.write_f32(body.linear_damping);
            w.write_f32(body.angular_damping);
            w.write_f32(body.restitution);
            w.write_f32(body.friction);
            w.write_u8(body.kind.byte());
        }
        w.write_count(doc.constraints.len())?;
        for c in &doc.constraints {
            w.write_fixed_text(&c.name, NAME_LEN)?;
            w.write_u32(u32_field(c.bodies[0], "constraint body")?);
            w.write_u32(u32_field(c.bodies[1], "constraint body")?);
            for v in [
                c.position,
                c.rotation,
                c.linear_lower,
                c.linear_upper,
                c.angular_lower,
                c.angular_upper,
                c.linear_spring,
                c.angular_spring,
            ] {
                w.write_vec3(v);
            }
        }
    } else if !doc.rigid_bodies.is_empty() || !doc.constraints.is_empty() {
        return Err(Error::invalid(
            "PMD rigid bodies need the physics section to be present",
        ));
    }

    w.write_bytes(&doc.trailing);
    Ok(w.into_bytes())
}
