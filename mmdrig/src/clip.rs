//! Binds motion keyframes to a rig's bone and morph ordinals.

use crate::model::ModelFormat;
use crate::rig::Rig;
use crate::vmd::MotionDocument;
use glam::{Quat, Vec3};
use std::collections::{BTreeSet, HashMap};

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClipOptions {
    /// Motion frames per second.
    pub frame_rate: f32,
    /// Seconds the last pose is held after the final key.
    pub afterglow: f32,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            afterglow: 2.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoneKeyframe {
    pub time: f32,
    /// Parent-relative position: rest offset plus the motion delta.
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MorphKeyframe {
    pub time: f32,
    pub weight: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoneTrack {
    pub bone: usize,
    pub keys: Vec<BoneKeyframe>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MorphTrack {
    pub morph: usize,
    pub keys: Vec<MorphKeyframe>,
}

/// Keyframe tracks for an external animation engine. Every track starts at 0 and
/// ends at `duration`.
#[derive(Clone, Debug, PartialEq)]
pub struct Clip {
    pub duration: f32,
    /// One track per bone, in bone order.
    pub bone_tracks: Vec<BoneTrack>,
    /// One track per morph target; the PMD base morph has none.
    pub morph_tracks: Vec<MorphTrack>,
}

pub fn bind_motion(rig: &Rig, motion: &MotionDocument, options: &ClipOptions) -> Clip {
    let mut bone_lookup = HashMap::new();
    for (i, bone) in rig.bones.iter().enumerate() {
        bone_lookup.entry(bone.hex_name.as_str()).or_insert(i);
    }
    let mut morph_lookup = HashMap::new();
    for (i, morph) in rig.morph_targets.iter().enumerate() {
        morph_lookup.entry(morph.hex_name.as_str()).or_insert(i);
    }

    let mut unknown = BTreeSet::new();
    let mut bone_keys = vec![Vec::new(); rig.bones.len()];
    for key in &motion.bone_keys {
        let name = key.bone.hex_name();
        match bone_lookup.get(name.as_str()) {
            Some(&i) => bone_keys[i].push(key),
            None => {
                unknown.insert(key.bone.as_str().to_string());
            }
        }
    }
    let mut morph_keys = vec![Vec::new(); rig.morph_targets.len()];
    for key in &motion.morph_keys {
        let name = key.morph.hex_name();
        match morph_lookup.get(name.as_str()) {
            Some(&i) => morph_keys[i].push(key),
            None => {
                unknown.insert(key.morph.as_str().to_string());
            }
        }
    }
    if !unknown.is_empty() {
        log::warn!(
            "dropping motion streams with no matching bone or morph: {:?}",
            unknown
        );
    }

    let mut max_time = 0.0f32;
    let mut bone_tracks = Vec::with_capacity(rig.bones.len());
    for (i, mut keys) in bone_keys.into_iter().enumerate() {
        keys.sort_by_key(|k| k.frame);
        let offset = rig.bones[i].offset;
        let keys: Vec<BoneKeyframe> = keys
            .into_iter()
            .map(|k| BoneKeyframe {
                time: k.frame as f32 / options.frame_rate,
                position: offset + k.position,
                rotation: k.rotation,
                scale: Vec3::ONE,
            })
            .collect();
        if let Some(last) = keys.last() {
            max_time = max_time.max(last.time);
        }
        bone_tracks.push(BoneTrack { bone: i, keys });
    }

    // Only the PMD base morph is a container of vertex indices rather than an
    // expression; PMX morph 0 is an ordinary morph and keeps its track.
    let skip_base = usize::from(rig.format == ModelFormat::Pmd);
    let mut morph_tracks = Vec::with_capacity(rig.morph_targets.len());
    for (i, mut keys) in morph_keys.into_iter().enumerate().skip(skip_base) {
        keys.sort_by_key(|k| k.frame);
        let keys: Vec<MorphKeyframe> = keys
            .into_iter()
            .map(|k| MorphKeyframe {
                time: k.frame as f32 / options.frame_rate,
                weight: k.weight,
            })
            .collect();
        if let Some(last) = keys.last() {
            max_time = max_time.max(last.time);
        }
        morph_tracks.push(MorphTrack { morph: i, keys });
    }

    let duration = max_time + options.afterglow;
    for track in &mut bone_tracks {
        if track.keys.is_empty() {
            track.keys.push(BoneKeyframe {
                time: 0.0,
                position: rig.bones[track.bone].offset,
                rotation: Quat::IDENTITY,
                scale: Vec3::ONE,
            });
        }
        pad(&mut track.keys, duration, |k| k.time, |k, t| k.time = t);
    }
    for track in &mut morph_tracks {
        if track.keys.is_empty() {
            track.keys.push(MorphKeyframe {
                time: 0.0,
                weight: 0.0,
            });
        }
        pad(&mut track.keys, duration, |k| k.time, |k, t| k.time = t);
    }

    log::debug!(
        "bound clip: {:.3}s, {} bone tracks, {} morph tracks",
        duration,
        bone_tracks.len(),
        morph_tracks.len()
    );
    Clip {
        duration,
        bone_tracks,
        morph_tracks,
    }
}

/// Copies the first key to time 0 and the last key to `duration` when missing.
fn pad<K: Copy>(
    keys: &mut Vec<K>,
    duration: f32,
    time: impl Fn(&K) -> f32,
    set: impl Fn(&mut K, f32),
) {
    let (Some(&first), Some(&last)) = (keys.first(), keys.last()) else {
        return;
    };
    if time(&first) != 0.0 {
        let mut lead = first;
        set(&mut lead, 0.0);
        keys.insert(0, lead);
    }
    if time(&last) < duration {
        let mut tail = last;
        set(&mut tail, duration);
        keys.push(tail);
    }
}
