use crate::text::{Text, TextEncoding, decode_legacy, decode_prefixed, to_hex_fallback};
use crate::Error;

#[test]
fn hex_fallback_renders_utf16_units() {
    assert_eq!(to_hex_fallback("あい"), "0x30420x3044");
    assert_eq!(to_hex_fallback("a"), "0x0061");
    assert_eq!(to_hex_fallback(""), "");
}

#[test]
fn hex_fallback_splits_surrogate_pairs() {
    assert_eq!(to_hex_fallback("😀"), "0xd83d0xde00");
}

#[test]
fn hex_name_is_derived_from_the_decoded_value() {
    let text = Text::fixed("左足ＩＫ", 20).unwrap();
    assert_eq!(text.hex_name(), to_hex_fallback("左足ＩＫ"));
    assert!(text.hex_name().is_ascii());
}

#[test]
fn fixed_text_pads_with_nul() {
    let text = Text::fixed("頭", 20).unwrap();
    assert_eq!(text.raw().len(), 20);
    assert_eq!(&text.raw()[..2], &[0x93, 0xaa]);
    assert!(text.raw()[2..].iter().all(|&b| b == 0));
    assert_eq!(decode_legacy(text.raw()), "頭");
}

#[test]
fn fixed_text_rejects_overflow_and_unmappable_input() {
    assert!(matches!(
        Text::fixed("abcdefghijklmnop", 15),
        Err(Error::InvalidValue { .. })
    ));
    assert!(matches!(
        Text::fixed("😀", 20),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn legacy_decoding_stops_at_first_nul() {
    assert_eq!(decode_legacy(b"abc\0\xfd\xfd"), "abc");
    assert_eq!(decode_legacy(b"\0abc"), "");
}

#[test]
fn utf16_decoding_stops_at_nul_unit() {
    let bytes = [0x41, 0x00, 0x00, 0x00, 0x42, 0x00];
    assert_eq!(decode_prefixed(&bytes, TextEncoding::Utf16Le), "A");
    // An odd trailing byte is dropped.
    assert_eq!(decode_prefixed(&[0x41, 0x00, 0x42], TextEncoding::Utf16Le), "A");
}

#[test]
fn encode_matches_declared_encoding() {
    assert_eq!(Text::encode("あ", TextEncoding::Utf16Le).raw(), &[0x42, 0x30]);
    assert_eq!(
        Text::encode("あ", TextEncoding::Utf8).raw(),
        "あ".as_bytes()
    );
    assert_eq!(Text::encode("あ", TextEncoding::ShiftJis).raw(), &[0x82, 0xa0]);
}

#[test]
fn pmx_encoding_byte_excludes_shift_jis() {
    assert_eq!(TextEncoding::from_pmx_byte(0).unwrap(), TextEncoding::Utf16Le);
    assert_eq!(TextEncoding::from_pmx_byte(1).unwrap(), TextEncoding::Utf8);
    assert!(TextEncoding::from_pmx_byte(2).is_err());
    assert!(TextEncoding::ShiftJis.pmx_byte().is_err());
}

#[test]
fn display_shows_decoded_value() {
    let text = Text::encode("センター", TextEncoding::Utf8);
    assert_eq!(text.to_string(), "センター");
    assert_eq!(text.as_str(), "センター");
}
