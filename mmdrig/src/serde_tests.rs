use crate::loader::{decode_model, encode_model};
use crate::model::CoordinateSystem;
use crate::reader::IndexWidth;
use crate::test_support::{pmd_document, pmx_document, sjis};
use crate::vmd::{BoneKey, MotionDocument, encode_motion};
use glam::{Quat, Vec3};

#[test]
fn documents_survive_json_and_still_encode_identically() {
    for doc in [pmd_document(), pmx_document(IndexWidth::Two)] {
        let bytes = encode_model(&doc).unwrap();
        let decoded = decode_model(&bytes, None).unwrap();

        let json = serde_json::to_string(&decoded).unwrap();
        let back: crate::model::Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decoded);
        assert_eq!(encode_model(&back).unwrap(), bytes);
    }
}

#[test]
fn motions_survive_json() {
    let motion = MotionDocument {
        model_name: sjis("テスト", 20),
        coordinate_system: CoordinateSystem::LeftHanded,
        bone_keys: vec![BoneKey {
            bone: sjis("首", 15),
            frame: 3,
            position: Vec3::new(0.5, 1.0, -2.0),
            rotation: Quat::from_rotation_x(0.5),
            interpolation: vec![20; 64],
        }],
        morph_keys: Vec::new(),
        trailing: vec![9, 9],
    };
    let json = serde_json::to_string(&motion).unwrap();
    let back: MotionDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(back, motion);
    assert_eq!(encode_motion(&back).unwrap(), encode_motion(&motion).unwrap());
}
