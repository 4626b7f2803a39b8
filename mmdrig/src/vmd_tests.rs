use crate::model::CoordinateSystem;
use crate::test_support::sjis;
use crate::vmd::{
    BoneKey, MorphKey, MotionDocument, decode_motion, decode_motions, encode_motion,
    merge_motions,
};
use crate::Error;
use glam::{Quat, Vec3};

fn bone_key(name: &str, frame: u32) -> BoneKey {
    BoneKey {
        bone: sjis(name, 15),
        frame,
        position: Vec3::new(0.0, frame as f32, 0.0),
        rotation: Quat::from_rotation_y(0.25),
        interpolation: (0..64).collect(),
    }
}

fn morph_key(name: &str, frame: u32, weight: f32) -> MorphKey {
    MorphKey {
        morph: sjis(name, 15),
        frame,
        weight,
    }
}

fn motion(bones: Vec<BoneKey>, morphs: Vec<MorphKey>) -> MotionDocument {
    MotionDocument {
        model_name: sjis("テスト", 20),
        coordinate_system: CoordinateSystem::LeftHanded,
        bone_keys: bones,
        morph_keys: morphs,
        trailing: Vec::new(),
    }
}

#[test]
fn bone_and_morph_keys_round_trip() {
    let doc = motion(
        vec![bone_key("センター", 0), bone_key("首", 15)],
        vec![morph_key("まばたき", 3, 0.75)],
    );
    let bytes = encode_motion(&doc).unwrap();
    assert_eq!(bytes.len(), 30 + 20 + 4 + 2 * 111 + 4 + 23);
    assert!(bytes.starts_with(b"Vocaloid Motion Data 0002\0"));

    let decoded = decode_motion(&bytes).unwrap();
    assert_eq!(decoded, doc);
    assert_eq!(decoded.bone_keys[1].bone.as_str(), "首");
    assert_eq!(decoded.bone_keys[1].frame, 15);
    assert_eq!(decoded.morph_keys[0].weight, 0.75);
}

#[test]
fn camera_and_light_sections_are_kept_undecoded() {
    let mut doc = motion(vec![bone_key("センター", 0)], Vec::new());
    doc.trailing = vec![0, 0, 0, 0, 1, 2, 3];
    let bytes = encode_motion(&doc).unwrap();
    let decoded = decode_motion(&bytes).unwrap();
    assert_eq!(decoded.trailing, vec![0, 0, 0, 0, 1, 2, 3]);
    assert_eq!(decoded.bone_keys.len(), 1);
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = encode_motion(&motion(Vec::new(), Vec::new())).unwrap();
    // "Vocaloid Motion Data 0001" is the older, unsupported layout.
    bytes[24] = b'1';
    assert!(matches!(
        decode_motion(&bytes),
        Err(Error::UnsupportedFormat { .. })
    ));
}

#[test]
fn key_count_past_end_is_truncation() {
    let bytes = encode_motion(&motion(vec![bone_key("センター", 0)], Vec::new())).unwrap();
    assert!(matches!(
        decode_motion(&bytes[..bytes.len() - 10]),
        Err(Error::TruncatedInput { .. })
    ));
}

#[test]
fn interpolation_block_must_be_64_bytes() {
    let mut key = bone_key("センター", 0);
    key.interpolation.pop();
    assert!(matches!(
        encode_motion(&motion(vec![key], Vec::new())),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn merge_keeps_input_order() {
    let first = motion(
        vec![bone_key("a", 30), bone_key("b", 0)],
        vec![morph_key("x", 5, 1.0)],
    );
    let mut second = motion(vec![bone_key("c", 10)], vec![morph_key("y", 1, 0.5)]);
    second.model_name = sjis("other", 20);
    second.trailing = vec![7];

    let merged = merge_motions(vec![first, second]).unwrap();
    let names: Vec<&str> = merged.bone_keys.iter().map(|k| k.bone.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    let frames: Vec<u32> = merged.morph_keys.iter().map(|k| k.frame).collect();
    assert_eq!(frames, [5, 1]);
    assert_eq!(merged.model_name.as_str(), "テスト");
    assert!(merged.trailing.is_empty());
}

#[test]
fn merge_rejects_empty_input_and_mixed_coordinate_systems() {
    assert!(matches!(
        merge_motions(Vec::new()),
        Err(Error::InvalidValue { .. })
    ));

    let mut converted = motion(Vec::new(), Vec::new());
    converted.coordinate_system = CoordinateSystem::RightHanded;
    assert!(matches!(
        merge_motions(vec![motion(Vec::new(), Vec::new()), converted]),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn decode_motions_merges_every_buffer() {
    let a = encode_motion(&motion(vec![bone_key("a", 0)], Vec::new())).unwrap();
    let b = encode_motion(&motion(vec![bone_key("b", 0)], Vec::new())).unwrap();
    let merged = decode_motions(&[a.clone(), b]).unwrap();
    assert_eq!(merged.bone_keys.len(), 2);
    assert_eq!(merged.bone_keys[1].bone.as_str(), "b");

    let broken = vec![a, vec![1, 2, 3]];
    assert!(decode_motions(&broken).is_err());
}
