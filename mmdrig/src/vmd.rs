//! `.vmd` motion decoding.
//!
//! Only the bone and morph keyframe streams are decoded. Camera, light and shadow
//! sections that may follow are kept as opaque bytes.

use crate::model::CoordinateSystem;
use crate::reader::ByteReader;
use crate::text::Text;
use crate::writer::ByteWriter;
use crate::Error;
use glam::{Quat, Vec3};

pub const VMD_MAGIC: &str = "Vocaloid Motion Data 0002";

const MAGIC_LEN: usize = 30;
const MODEL_NAME_LEN: usize = 20;
const KEY_NAME_LEN: usize = 15;
const BONE_KEY_SIZE: usize = 111;
const MORPH_KEY_SIZE: usize = 23;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneKey {
    pub bone: Text,
    pub frame: u32,
    pub position: Vec3,
    pub rotation: Quat,
    /// Bezier control points, kept undecoded.
    pub interpolation: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MorphKey {
    pub morph: Text,
    pub frame: u32,
    pub weight: f32,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionDocument {
    pub model_name: Text,
    pub coordinate_system: CoordinateSystem,
    pub bone_keys: Vec<BoneKey>,
    pub morph_keys: Vec<MorphKey>,
    /// Camera, light and later sections.
    pub trailing: Vec<u8>,
}

pub fn decode_motion(bytes: &[u8]) -> Result<MotionDocument, Error> {
    let mut r = ByteReader::new(bytes);
    let magic = r.read_magic(MAGIC_LEN)?;
    if magic != VMD_MAGIC {
        return Err(Error::unsupported(format!("bad VMD magic {magic:?}")));
    }
    let model_name = r.read_fixed_text(MODEL_NAME_LEN)?;

    let bone_count = r.read_count(BONE_KEY_SIZE)?;
    let mut bone_keys = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        let bone = r.read_fixed_text(KEY_NAME_LEN)?;
        let frame = r.read_u32()?;
        let position = r.read_vec3()?;
        let rotation = Quat::from_array(r.read_f32_array::<4>()?);
        let interpolation = r.take(64)?.to_vec();
        bone_keys.push(BoneKey {
            bone,
            frame,
            position,
            rotation,
            interpolation,
        });
    }

    let morph_count = r.read_count(MORPH_KEY_SIZE)?;
    let mut morph_keys = Vec::with_capacity(morph_count);
    for _ in 0..morph_count {
        morph_keys.push(MorphKey {
            morph: r.read_fixed_text(KEY_NAME_LEN)?,
            frame: r.read_u32()?,
            weight: r.read_f32()?,
        });
    }

    let trailing = r.take_rest().to_vec();
    if !trailing.is_empty() {
        log::warn!(
            "ignoring {} bytes of camera/light data after the morph keys",
            trailing.len()
        );
    }
    log::debug!(
        "VMD {:?}: {} bone keys, {} morph keys",
        model_name.as_str(),
        bone_keys.len(),
        morph_keys.len()
    );

    Ok(MotionDocument {
        model_name,
        coordinate_system: CoordinateSystem::LeftHanded,
        bone_keys,
        morph_keys,
        trailing,
    })
}

pub fn encode_motion(doc: &MotionDocument) -> Result<Vec<u8>, Error> {
    let mut w = ByteWriter::new();
    w.write_magic(VMD_MAGIC, MAGIC_LEN);
    w.write_fixed_text(&doc.model_name, MODEL_NAME_LEN)?;
    w.write_count(doc.bone_keys.len())?;
    for key in &doc.bone_keys {
        if key.interpolation.len() != 64 {
            return Err(Error::invalid(format!(
                "interpolation block is {} bytes, expected 64",
                key.interpolation.len()
            )));
        }
        w.write_fixed_text(&key.bone, KEY_NAME_LEN)?;
        w.write_u32(key.frame);
        w.write_vec3(key.position);
        w.write_f32_slice(&key.rotation.to_array());
        w.write_bytes(&key.interpolation);
    }
    w.write_count(doc.morph_keys.len())?;
    for key in &doc.morph_keys {
        w.write_fixed_text(&key.morph, KEY_NAME_LEN)?;
        w.write_u32(key.frame);
        w.write_f32(key.weight);
    }
    w.write_bytes(&doc.trailing);
    Ok(w.into_bytes())
}

/// Concatenates keyframe streams in input order; no sorting happens here.
///
/// The model name comes from the first document. Trailing sections are dropped.
pub fn merge_motions(docs: Vec<MotionDocument>) -> Result<MotionDocument, Error> {
    let mut docs = docs.into_iter();
    let mut merged = docs
        .next()
        .ok_or_else(|| Error::invalid("no motions to merge"))?;
    merged.trailing.clear();
    for doc in docs {
        if doc.coordinate_system != merged.coordinate_system {
            return Err(Error::invalid(
                "cannot merge motions in different coordinate systems",
            ));
        }
        merged.bone_keys.extend(doc.bone_keys);
        merged.morph_keys.extend(doc.morph_keys);
    }
    Ok(merged)
}

/// Decodes each buffer in order, stopping at the first failure, then merges.
pub fn decode_motions<B: AsRef<[u8]>>(buffers: &[B]) -> Result<MotionDocument, Error> {
    let mut docs = Vec::with_capacity(buffers.len());
    for bytes in buffers {
        docs.push(decode_motion(bytes.as_ref())?);
    }
    merge_motions(docs)
}
