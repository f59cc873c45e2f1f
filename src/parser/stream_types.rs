//! Elementary stream type codes as printed in PMT dumps.

use crate::models::PidClass;

/// Known PMT stream types and the codec names they publish under
const STREAM_TYPES: &[(&str, PidClass, &str)] = &[
    ("0x1B", PidClass::Video, "h264"),
    ("0x10", PidClass::Video, "mpeg4video"),
    ("0x24", PidClass::Video, "hevc"),
    ("0x02", PidClass::Video, "mpeg2video"),
    ("0x03", PidClass::Audio, "mpeg1audio"),
    ("0x04", PidClass::Audio, "mpeg2audio"),
    ("0x0F", PidClass::Audio, "aac"),
    ("0x11", PidClass::Audio, "aac_latm"),
    ("0x81", PidClass::Audio, "ac3"),
    ("0x87", PidClass::Audio, "eac3"),
    ("0x06", PidClass::Data, "private"),
];

/// Resolve class and codec for a stream type code.
///
/// Unknown codes are classed as `other` and named after the analyzer's own
/// description, lower-cased with spaces replaced by underscores.
pub fn resolve_stream_type(type_code: &str, description: &str) -> (PidClass, String) {
    STREAM_TYPES
        .iter()
        .find(|(code, _, _)| code.eq_ignore_ascii_case(type_code))
        .map(|(_, class, codec)| (*class, (*codec).to_string()))
        .unwrap_or_else(|| (PidClass::Other, normalize_description(description)))
}

fn normalize_description(description: &str) -> String {
    description.trim().replace(' ', "_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0x1B", PidClass::Video, "h264")]
    #[case("0x10", PidClass::Video, "mpeg4video")]
    #[case("0x24", PidClass::Video, "hevc")]
    #[case("0x02", PidClass::Video, "mpeg2video")]
    #[case("0x03", PidClass::Audio, "mpeg1audio")]
    #[case("0x04", PidClass::Audio, "mpeg2audio")]
    #[case("0x0F", PidClass::Audio, "aac")]
    #[case("0x11", PidClass::Audio, "aac_latm")]
    #[case("0x81", PidClass::Audio, "ac3")]
    #[case("0x87", PidClass::Audio, "eac3")]
    #[case("0x06", PidClass::Data, "private")]
    fn test_known_stream_types(
        #[case] code: &str,
        #[case] class: PidClass,
        #[case] codec: &str,
    ) {
        let (resolved_class, resolved_codec) = resolve_stream_type(code, "ignored");
        assert_eq!(resolved_class, class);
        assert_eq!(resolved_codec, codec);
    }

    #[rstest]
    #[case("0x05", "MPEG-2 Private sections", "mpeg-2_private_sections")]
    #[case("0x86", "SCTE 35 Splice Info", "scte_35_splice_info")]
    fn test_unknown_stream_type_falls_back(
        #[case] code: &str,
        #[case] description: &str,
        #[case] codec: &str,
    ) {
        let (class, resolved) = resolve_stream_type(code, description);
        assert_eq!(class, PidClass::Other);
        assert_eq!(resolved, codec);
    }
}
