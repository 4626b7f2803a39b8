//! Model entry points: magic dispatch, referential validation and encoding.

use crate::model::{
    BoneExt, BoneTail, Display, DisplayElement, Document, MaterialExt, ModelFormat, MorphData,
    Toon,
};
use crate::{Error, pmd, pmx};

/// Identifies the model format from the leading magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ModelFormat> {
    if bytes.starts_with(pmx::MAGIC) {
        Some(ModelFormat::Pmx)
    } else if bytes.starts_with(pmd::MAGIC) {
        Some(ModelFormat::Pmd)
    } else {
        None
    }
}

/// Decodes a PMD or PMX model.
///
/// `hint` is checked against the magic; a mismatch is an error rather than a
/// fallback. The decoded document has passed [`validate`].
pub fn decode_model(bytes: &[u8], hint: Option<ModelFormat>) -> Result<Document, Error> {
    let detected = detect_format(bytes).ok_or_else(|| {
        let head = &bytes[..bytes.len().min(4)];
        Error::unsupported(format!("unrecognized model magic {head:02x?}"))
    })?;
    if let Some(hint) = hint {
        if hint != detected {
            return Err(Error::unsupported(format!(
                "expected a {hint:?} model, found {detected:?}"
            )));
        }
    }
    let doc = match detected {
        ModelFormat::Pmd => pmd::decode(bytes)?,
        ModelFormat::Pmx => pmx::decode(bytes)?,
    };
    validate(&doc)?;
    Ok(doc)
}

/// Encodes a document in the format recorded in its header.
///
/// Documents straight from [`decode_model`] encode back to the input bytes.
pub fn encode_model(doc: &Document) -> Result<Vec<u8>, Error> {
    match doc.format() {
        ModelFormat::Pmd => pmd::encode(doc),
        ModelFormat::Pmx => pmx::encode(doc),
    }
}

fn check(field: &'static str, index: usize, len: usize) -> Result<(), Error> {
    if index < len {
        Ok(())
    } else {
        Err(Error::ReferentialIntegrity {
            field,
            index: index as i64,
            len,
        })
    }
}

fn check_opt(field: &'static str, index: Option<usize>, len: usize) -> Result<(), Error> {
    match index {
        Some(index) => check(field, index, len),
        None => Ok(()),
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Visit {
    Pending,
    OnPath,
    Done,
}

/// Rejects bones that are their own ancestor. Parents must already be in range.
fn check_bone_hierarchy(doc: &Document) -> Result<(), Error> {
    let mut state = vec![Visit::Pending; doc.bones.len()];
    let mut path = Vec::new();
    for start in 0..doc.bones.len() {
        let mut cursor = Some(start);
        while let Some(i) = cursor {
            match state[i] {
                Visit::Done => break,
                Visit::OnPath => {
                    return Err(Error::invalid(format!("bone {i} is its own ancestor")));
                }
                Visit::Pending => {
                    state[i] = Visit::OnPath;
                    path.push(i);
                    cursor = doc.bones[i].parent;
                }
            }
        }
        for i in path.drain(..) {
            state[i] = Visit::Done;
        }
    }
    Ok(())
}

/// Verifies that every index in the document points inside its target array
/// and that the bone hierarchy is a forest.
pub fn validate(doc: &Document) -> Result<(), Error> {
    let vertices = doc.vertices.len();
    let bones = doc.bones.len();
    let morphs = doc.morphs.len();
    let bodies = doc.rigid_bodies.len();

    for v in &doc.vertices {
        for &bone in v.skin.bones() {
            check_opt("skin bone", bone, bones)?;
        }
    }
    for face in &doc.faces {
        for &i in face {
            check("face vertex", i, vertices)?;
        }
    }
    for m in &doc.materials {
        if let MaterialExt::Pmx {
            texture,
            sphere_texture,
            toon,
            ..
        } = &m.ext
        {
            check_opt("material texture", *texture, doc.textures.len())?;
            check_opt("material sphere texture", *sphere_texture, doc.textures.len())?;
            if let Toon::Texture(toon) = toon {
                check_opt("material toon texture", *toon, doc.textures.len())?;
            }
        }
    }
    for bone in &doc.bones {
        check_opt("bone parent", bone.parent, bones)?;
        if let BoneExt::Pmx(pmx) = &bone.ext {
            if let BoneTail::Connect(tail) = pmx.tail {
                check_opt("bone tail", tail, bones)?;
            }
            if let Some(inherit) = &pmx.inherit {
                check_opt("bone inherit parent", inherit.parent, bones)?;
            }
        }
    }
    check_bone_hierarchy(doc)?;
    for ik in doc.ik_chains() {
        check("IK target", ik.target, bones)?;
        check("IK effector", ik.effector, bones)?;
        for link in &ik.links {
            check("IK link", link.bone, bones)?;
        }
    }

    let base_len = match doc.format() {
        ModelFormat::Pmd => doc.morphs.first().map(|m| m.data.len()),
        ModelFormat::Pmx => None,
    };
    for (index, morph) in doc.morphs.iter().enumerate() {
        match &morph.data {
            MorphData::Vertex(offsets) => {
                let (field, len) = match base_len {
                    Some(base) if index > 0 => ("morph base element", base),
                    _ => ("morph vertex", vertices),
                };
                for o in offsets {
                    check(field, o.vertex, len)?;
                }
            }
            MorphData::Group(v) | MorphData::Flip(v) => {
                for e in v {
                    check("group morph element", e.morph, morphs)?;
                }
            }
            MorphData::Bone(v) => {
                for e in v {
                    check("bone morph element", e.bone, bones)?;
                }
            }
            MorphData::Uv { offsets, .. } => {
                for e in offsets {
                    check("uv morph element", e.vertex, vertices)?;
                }
            }
            MorphData::Material(v) => {
                for e in v {
                    check_opt("material morph element", e.material, doc.materials.len())?;
                }
            }
            MorphData::Impulse(v) => {
                for e in v {
                    check("impulse morph element", e.rigid_body, bodies)?;
                }
            }
        }
    }

    match &doc.display {
        Display::Pmd {
            morphs: morph_display,
            bones: bone_display,
            ..
        } => {
            for &m in morph_display {
                check("morph display entry", m, morphs)?;
            }
            for entry in bone_display {
                check("bone display bone", entry.bone, bones)?;
            }
        }
        Display::Pmx(frames) => {
            for frame in frames {
                for element in &frame.elements {
                    match *element {
                        DisplayElement::Bone(b) => check("display bone", b, bones)?,
                        DisplayElement::Morph(m) => check("display morph", m, morphs)?,
                    }
                }
            }
        }
    }

    for body in &doc.rigid_bodies {
        check_opt("rigid body bone", body.bone, bones)?;
    }
    for c in &doc.constraints {
        check("constraint body", c.bodies[0], bodies)?;
        check("constraint body", c.bodies[1], bodies)?;
    }
    Ok(())
}
