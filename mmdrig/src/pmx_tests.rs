use crate::loader::{decode_model, detect_format, encode_model, validate};
use crate::model::{
    AngleLimit, BodyKind, BoneOffset, BoneTail, DisplayElement, DisplayFrame, Display, Document,
    FormatInfo, GroupOffset, IkChain, IkLink, ImpulseOffset, InheritTransform, LocalAxes,
    MaterialOffset, ModelFormat, MorphData, PmxBone, Skin, Toon, UvOffset, VertexOffset,
    BoneExt, MaterialExt,
};
use crate::reader::IndexWidth;
use crate::rig::{RigOptions, build_rig};
use crate::test_support::{
    constraint, pmx_bone, pmx_document, pmx_morph, pmx_text, pmx_vertex, rigid_body,
};
use crate::Error;
use glam::{Quat, Vec3, Vec4};

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-5,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn pmx_ext(doc: &mut Document, bone: usize) -> &mut PmxBone {
    match &mut doc.bones[bone].ext {
        BoneExt::Pmx(pmx) => pmx,
        BoneExt::Pmd { .. } => panic!("fixture bone {bone} is not a PMX bone"),
    }
}

/// Exercises every optional bone payload, every morph kind and every skin kind.
fn rich_document(width: IndexWidth) -> Document {
    let mut doc = pmx_document(width);
    doc.header.version = 2.1;
    if let FormatInfo::Pmx(globals) = &mut doc.header.format {
        globals.additional_uv_count = 1;
    }

    doc.vertices = vec![
        pmx_vertex(Vec3::new(0.0, 1.0, 0.0), Skin::Bdef1 { bone: Some(0) }),
        pmx_vertex(
            Vec3::new(0.0, 2.0, 0.0),
            Skin::Bdef2 {
                bones: [Some(0), Some(1)],
                weight: 0.25,
            },
        ),
        pmx_vertex(
            Vec3::new(0.0, 3.0, 0.0),
            Skin::Bdef4 {
                bones: [Some(0), Some(1), Some(2), None],
                weights: [0.5, 0.25, 0.25, 0.0],
            },
        ),
        pmx_vertex(
            Vec3::new(0.0, 4.0, 0.0),
            Skin::Sdef {
                bones: [Some(1), Some(2)],
                weight: 0.5,
                c: Vec3::new(0.0, 4.0, 0.0),
                r0: Vec3::new(0.0, 3.5, 0.0),
                r1: Vec3::new(0.0, 4.5, 0.0),
            },
        ),
        pmx_vertex(
            Vec3::new(0.0, 5.0, 0.0),
            Skin::Qdef {
                bones: [Some(2), Some(3), None, None],
                weights: [0.75, 0.25, 0.0, 0.0],
            },
        ),
    ];
    for v in &mut doc.vertices {
        v.additional_uvs = vec![Vec4::new(0.1, 0.2, 0.3, 0.4)];
    }
    doc.faces = vec![[0, 1, 2], [2, 3, 4]];
    doc.textures = vec![pmx_text("body.png"), pmx_text("toon.bmp")];
    if let MaterialExt::Pmx {
        texture,
        sphere_texture,
        toon,
        ..
    } = &mut doc.materials[0].ext
    {
        *texture = Some(0);
        *sphere_texture = None;
        *toon = Toon::Texture(Some(1));
    }
    doc.materials[0].index_count = 6;

    doc.bones = vec![
        pmx_bone("センター", Vec3::new(0.0, 8.0, 0.0), None),
        pmx_bone("左足", Vec3::new(1.0, 7.0, 0.0), Some(0)),
        pmx_bone("左ひざ", Vec3::new(1.0, 4.0, 0.0), Some(1)),
        pmx_bone("左足首", Vec3::new(1.0, 1.0, 0.0), Some(2)),
        pmx_bone("左足ＩＫ", Vec3::new(1.0, 1.0, 0.0), Some(0)),
    ];
    {
        let b = pmx_ext(&mut doc, 1);
        b.flags |= PmxBone::CONNECTED;
        b.tail = BoneTail::Connect(Some(2));
    }
    {
        let b = pmx_ext(&mut doc, 2);
        b.flags |= PmxBone::INHERIT_ROTATION | PmxBone::FIXED_AXIS | PmxBone::LOCAL_AXES;
        b.inherit = Some(InheritTransform {
            parent: Some(1),
            ratio: 0.5,
        });
        b.fixed_axis = Some(Vec3::X);
        b.local_axes = Some(LocalAxes {
            x: Vec3::X,
            z: Vec3::Z,
        });
    }
    {
        let b = pmx_ext(&mut doc, 3);
        b.flags |= PmxBone::EXTERNAL_PARENT | PmxBone::CONNECTED;
        b.tail = BoneTail::Connect(None);
        b.external_key = Some(-7);
    }
    {
        let b = pmx_ext(&mut doc, 4);
        b.flags |= PmxBone::IK | PmxBone::TRANSLATABLE;
        b.ik = Some(IkChain {
            target: 4,
            effector: 3,
            iterations: 40,
            max_angle: 2.0,
            links: vec![
                IkLink {
                    bone: 2,
                    limit: Some(AngleLimit {
                        lower: Vec3::new(-3.0, 0.0, 0.0),
                        upper: Vec3::new(-0.01, 0.0, 0.0),
                    }),
                },
                IkLink {
                    bone: 1,
                    limit: None,
                },
            ],
        });
    }

    doc.morphs = vec![
        pmx_morph(
            "あ",
            MorphData::Vertex(vec![VertexOffset {
                vertex: 1,
                displacement: Vec3::new(0.0, 0.0, 1.0),
            }]),
        ),
        pmx_morph(
            "group",
            MorphData::Group(vec![GroupOffset {
                morph: 0,
                ratio: 0.5,
            }]),
        ),
        pmx_morph(
            "bone",
            MorphData::Bone(vec![BoneOffset {
                bone: 2,
                translation: Vec3::new(0.0, 1.0, 0.0),
                rotation: Quat::from_rotation_x(0.5),
            }]),
        ),
        pmx_morph(
            "uv1",
            MorphData::Uv {
                channel: 1,
                offsets: vec![UvOffset {
                    vertex: 4,
                    offset: Vec4::new(0.0, 0.5, 0.0, 0.0),
                }],
            },
        ),
        pmx_morph(
            "material",
            MorphData::Material(vec![MaterialOffset {
                material: None,
                operation: 1,
                diffuse: Vec4::ONE,
                specular: Vec3::ZERO,
                shininess: 0.0,
                ambient: Vec3::ZERO,
                edge_color: Vec4::ZERO,
                edge_size: 0.0,
                texture_tint: Vec4::ONE,
                sphere_tint: Vec4::ONE,
                toon_tint: Vec4::ONE,
            }]),
        ),
        pmx_morph(
            "flip",
            MorphData::Flip(vec![GroupOffset {
                morph: 1,
                ratio: 1.0,
            }]),
        ),
        pmx_morph(
            "impulse",
            MorphData::Impulse(vec![ImpulseOffset {
                rigid_body: 0,
                local: 1,
                velocity: Vec3::new(0.0, 2.0, 0.0),
                torque: Vec3::ZERO,
            }]),
        ),
    ];

    doc.display = Display::Pmx(vec![
        DisplayFrame {
            name: pmx_text("Root"),
            english_name: pmx_text("Root"),
            special: 1,
            elements: vec![DisplayElement::Bone(0)],
        },
        DisplayFrame {
            name: pmx_text("表情"),
            english_name: pmx_text("Exp"),
            special: 1,
            elements: vec![DisplayElement::Morph(0), DisplayElement::Morph(1)],
        },
    ]);

    doc.rigid_bodies = vec![
        rigid_body(Some(1), BodyKind::Kinematic, Vec3::new(1.0, 6.0, 0.0)),
        rigid_body(None, BodyKind::Dynamic, Vec3::ZERO),
    ];
    for body in &mut doc.rigid_bodies {
        body.name = pmx_text("body");
        body.english_name = Some(pmx_text(""));
    }
    doc.constraints = vec![constraint(0, 1, Vec3::new(1.0, 5.0, 0.0))];
    doc.constraints[0].name = pmx_text("joint");
    doc.constraints[0].english_name = Some(pmx_text(""));
    doc.constraints[0].linear_spring = Vec3::new(0.0, 10.0, 0.0);

    doc.trailing = vec![1, 2, 3, 4, 5];
    doc
}

#[test]
fn minimal_document_decodes_and_rigs() {
    let bytes = encode_model(&pmx_document(IndexWidth::Two)).unwrap();
    assert_eq!(detect_format(&bytes), Some(ModelFormat::Pmx));

    let doc = decode_model(&bytes, None).unwrap();
    assert_eq!(doc.format(), ModelFormat::Pmx);
    assert_eq!(doc.vertices.len(), 1);
    assert_eq!(doc.faces, vec![[0, 0, 0]]);
    assert_eq!(doc.bones[0].name.as_str(), "センター");
    assert_eq!(doc.bones[0].parent, None);
    assert!(doc.trailing.is_empty());

    let rig = build_rig(&doc, &RigOptions::default()).unwrap();
    assert_eq!(rig.skins[0].weights, [1.0, 0.0, 0.0, 0.0]);
    assert_eq!(rig.bones[0].offset, Vec3::new(0.0, 8.0, 0.0));
}

#[test]
fn round_trip_is_byte_exact_at_each_index_width() {
    for width in [
        IndexWidth::One,
        IndexWidth::Two,
        IndexWidth::Four,
        IndexWidth::Eight,
    ] {
        let doc = rich_document(width);
        let bytes = encode_model(&doc).unwrap();
        let decoded = decode_model(&bytes, Some(ModelFormat::Pmx))
            .unwrap_or_else(|err| panic!("width {width:?}: {err}"));
        assert_eq!(decoded, doc, "width {width:?}");
        assert_eq!(encode_model(&decoded).unwrap(), bytes, "width {width:?}");
    }
}

#[test]
fn round_trip_is_byte_exact_with_mixed_index_widths() {
    let widths = [
        IndexWidth::One,
        IndexWidth::Two,
        IndexWidth::Four,
        IndexWidth::Eight,
    ];
    for (i, &vertex) in widths.iter().enumerate() {
        for (j, &bone) in widths.iter().enumerate() {
            for (k, &morph) in widths.iter().enumerate() {
                let mut doc = rich_document(IndexWidth::Two);
                if let FormatInfo::Pmx(globals) = &mut doc.header.format {
                    globals.vertex_index = vertex;
                    globals.bone_index = bone;
                    globals.morph_index = morph;
                    globals.texture_index = widths[(i + j) % 4];
                    globals.material_index = widths[(j + k) % 4];
                    globals.rigid_body_index = widths[(i + k) % 4];
                }
                let label = format!("vertex {vertex:?}, bone {bone:?}, morph {morph:?}");

                let bytes = encode_model(&doc).unwrap();
                let decoded = decode_model(&bytes, Some(ModelFormat::Pmx))
                    .unwrap_or_else(|err| panic!("{label}: {err}"));
                assert_eq!(decoded, doc, "{label}");
                assert_eq!(encode_model(&decoded).unwrap(), bytes, "{label}");

                // Absent indices are written as -1 at every signed width.
                assert_eq!(decoded.bones[0].parent, None, "{label}");
                assert_eq!(
                    decoded.vertices[2].skin,
                    Skin::Bdef4 {
                        bones: [Some(0), Some(1), Some(2), None],
                        weights: [0.5, 0.25, 0.25, 0.0],
                    },
                    "{label}"
                );
                match &decoded.morphs[4].data {
                    MorphData::Material(offsets) => {
                        assert_eq!(offsets[0].material, None, "{label}")
                    }
                    other => panic!("{label}: unexpected morph {other:?}"),
                }
            }
        }
    }
}

#[test]
fn index_width_changes_encoded_size() {
    let one = encode_model(&rich_document(IndexWidth::One)).unwrap();
    let four = encode_model(&rich_document(IndexWidth::Four)).unwrap();
    assert!(four.len() > one.len());
}

#[test]
fn skin_weights_sum_to_one() {
    let doc = rich_document(IndexWidth::Two);
    let rig = build_rig(&doc, &RigOptions::default()).unwrap();
    assert_eq!(rig.skins.len(), doc.vertices.len());
    for (i, skin) in rig.skins.iter().enumerate() {
        let sum: f32 = skin.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1.0e-5, "vertex {i} weights sum to {sum}");
    }
    assert_eq!(&rig.skins[1].bones[..2], &[0, 1]);
    assert_approx(rig.skins[1].weights[1], 0.75);
}

#[test]
fn four_bone_weights_are_normalized() {
    let skin = Skin::Bdef4 {
        bones: [Some(0), Some(1), Some(2), Some(3)],
        weights: [0.2, 0.2, 0.2, 0.2],
    };
    for w in skin.effective().weights {
        assert_approx(w, 0.25);
    }

    let degenerate = Skin::Qdef {
        bones: [Some(5), None, None, None],
        weights: [0.0; 4],
    };
    let binding = degenerate.effective();
    assert_eq!(binding.weights, [1.0, 0.0, 0.0, 0.0]);
    assert_eq!(binding.bones, [5, 0, 0, 0]);
}

#[test]
fn format_hint_mismatch_is_rejected() {
    let bytes = encode_model(&pmx_document(IndexWidth::Two)).unwrap();
    assert!(matches!(
        decode_model(&bytes, Some(ModelFormat::Pmd)),
        Err(Error::UnsupportedFormat { .. })
    ));
}

#[test]
fn unsupported_version_is_rejected() {
    let mut bytes = encode_model(&pmx_document(IndexWidth::Two)).unwrap();
    bytes[4..8].copy_from_slice(&3.0f32.to_le_bytes());
    assert!(matches!(
        decode_model(&bytes, None),
        Err(Error::UnsupportedFormat { .. })
    ));
}

#[test]
fn unknown_index_width_is_rejected() {
    let mut bytes = encode_model(&pmx_document(IndexWidth::Two)).unwrap();
    // magic(4) version(4) globals-length(1) encoding(1) uv-count(1), then vertex width.
    bytes[11] = 3;
    assert!(matches!(
        decode_model(&bytes, None),
        Err(Error::UnsupportedFormat { .. })
    ));
}

#[test]
fn truncated_input_reports_truncation() {
    let bytes = encode_model(&pmx_document(IndexWidth::Two)).unwrap();
    let err = decode_model(&bytes[..bytes.len() - 1], None).unwrap_err();
    assert!(
        matches!(err, Error::TruncatedInput { .. }),
        "unexpected error {err:?}"
    );
}

#[test]
fn unknown_morph_type_is_rejected() {
    let mut doc = pmx_document(IndexWidth::Two);
    doc.morphs = vec![pmx_morph("x", MorphData::Group(Vec::new()))];
    let mut bytes = encode_model(&doc).unwrap();
    // The morph type byte follows name, English name and panel; the element
    // count and the empty frame and physics sections come after it.
    let tail = 4 + 4 * 3;
    let type_at = bytes.len() - tail - 1;
    assert_eq!(bytes[type_at], 0);
    bytes[type_at] = 11;
    assert!(matches!(
        decode_model(&bytes, None),
        Err(Error::UnsupportedFormat { .. })
    ));
}

#[test]
fn out_of_range_face_index_fails_validation() {
    let mut doc = pmx_document(IndexWidth::Two);
    doc.faces = vec![[0, 0, 5]];
    let bytes = encode_model(&doc).unwrap();
    assert!(matches!(
        decode_model(&bytes, None),
        Err(Error::ReferentialIntegrity {
            field: "face vertex",
            index: 5,
            len: 1,
        })
    ));
}

#[test]
fn bone_parent_cycle_fails_validation() {
    let mut doc = pmx_document(IndexWidth::Two);
    doc.bones = vec![
        pmx_bone("a", Vec3::ZERO, Some(1)),
        pmx_bone("b", Vec3::Y, Some(0)),
    ];
    let bytes = encode_model(&doc).unwrap();
    assert!(matches!(
        decode_model(&bytes, None),
        Err(Error::InvalidValue { .. })
    ));

    doc.bones = vec![pmx_bone("self", Vec3::ZERO, Some(0))];
    assert!(matches!(validate(&doc), Err(Error::InvalidValue { .. })));
}

#[test]
fn soft_body_tail_is_kept_opaque() {
    let doc = rich_document(IndexWidth::Two);
    let bytes = encode_model(&doc).unwrap();
    let decoded = decode_model(&bytes, None).unwrap();
    assert_eq!(decoded.trailing, vec![1, 2, 3, 4, 5]);
}

#[test]
fn ik_chains_come_from_bones() {
    let doc = rich_document(IndexWidth::Two);
    let chains = doc.ik_chains();
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].target, 4);
    assert_eq!(chains[0].effector, 3);
    assert_eq!(chains[0].iterations, 40);
}

#[test]
fn inconsistent_bone_flags_do_not_encode() {
    let mut doc = pmx_document(IndexWidth::Two);
    pmx_ext(&mut doc, 0).flags |= PmxBone::IK;
    assert!(matches!(
        encode_model(&doc),
        Err(Error::InvalidValue { .. })
    ));

    let mut doc = pmx_document(IndexWidth::Two);
    pmx_ext(&mut doc, 0).fixed_axis = Some(Vec3::Y);
    assert!(matches!(
        encode_model(&doc),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn index_too_wide_for_declared_width_does_not_encode() {
    let mut doc = pmx_document(IndexWidth::One);
    doc.bones[0].parent = Some(200);
    assert!(matches!(
        encode_model(&doc),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn utf8_documents_round_trip() {
    let mut doc = pmx_document(IndexWidth::Two);
    let enc = crate::text::TextEncoding::Utf8;
    if let FormatInfo::Pmx(globals) = &mut doc.header.format {
        globals.encoding = enc;
    }
    doc.header.name = crate::text::Text::encode("モデル", enc);
    doc.bones[0].name = crate::text::Text::encode("全ての親", enc);
    let bytes = encode_model(&doc).unwrap();
    let decoded = decode_model(&bytes, None).unwrap();
    assert_eq!(decoded.header.name.as_str(), "モデル");
    assert_eq!(decoded.bones[0].name.as_str(), "全ての親");
}
