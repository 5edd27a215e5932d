//! Password normalization (§4.1).
//!
//! Legacy revisions (2-4) pad or truncate to exactly 32 bytes using the
//! fixed padding string from the standard. Revision 6 instead runs the
//! password through SASLprep and truncates the UTF-8 encoding to 127 bytes.

/// The 32-byte padding string defined by the legacy standard security
/// handler (ISO 32000-1, 7.6.3.3, Algorithm 2, step a).
pub const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Pad or truncate an already-encoded password to the fixed 32-byte legacy
/// form (algorithm 2, step a).
pub fn sanitize_password_r4(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let take = password.len().min(32);
    padded[..take].copy_from_slice(&password[..take]);
    padded[take..].copy_from_slice(&PAD_BYTES[..32 - take]);
    padded
}

/// Apply SASLprep and truncate to 127 bytes (ISO 32000-2, 7.6.4.3.3).
pub fn sanitize_password_r6(password: &str) -> Vec<u8> {
    let prepped = stringprep::saslprep(password)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| password.to_owned());
    let mut bytes = prepped.into_bytes();
    bytes.truncate(127);
    bytes
}

/// Truncate raw password bytes (as opposed to text) to 127 bytes, used when
/// the caller already has bytes rather than a `str` for an R6 password.
pub fn sanitize_password_r6_bytes(password: &[u8]) -> Vec<u8> {
    let mut bytes = password.to_vec();
    bytes.truncate(127);
    bytes
}

/// Encode text via PDFDocEncoding, then pad or truncate to the fixed 32-byte
/// legacy form. Use this for an actual password string; for bytes already in
/// PDFDocEncoding (or any other already-encoded form), pad with
/// [`sanitize_password_r4`] directly instead.
pub fn sanitize_password_r4_text(password: &str) -> [u8; 32] {
    sanitize_password_r4(&pdf_doc_encode(password))
}

/// Reverse PDFDocEncoding lookup (ISO 32000-1 Annex D, Table D.2): maps each
/// `char` to its single-byte PDFDocEncoding code point. Characters with no
/// representation in the table are dropped, mirroring `lopdf`'s
/// `string_to_bytes` reverse lookup over its own encoding tables.
pub fn pdf_doc_encode(text: &str) -> Vec<u8> {
    text.chars().filter_map(pdf_doc_encode_char).collect()
}

fn pdf_doc_encode_char(ch: char) -> Option<u8> {
    let code = ch as u32;
    match code {
        0x00..=0x17 | 0x20..=0x7E => Some(code as u8),
        // 0xAD (soft hyphen) has no PDFDocEncoding representation.
        0xA1..=0xFF if code != 0xAD => Some(code as u8),
        _ => pdf_doc_encode_special(code),
    }
}

/// The non-Latin-1 code points Table D.2 assigns to 0x18-0x1F and 0x80-0xA0.
fn pdf_doc_encode_special(code: u32) -> Option<u8> {
    Some(match code {
        0x02D8 => 0x18, // breve
        0x02C7 => 0x19, // caron
        0x02C6 => 0x1A, // circumflex
        0x02D9 => 0x1B, // dotaccent
        0x02DD => 0x1C, // hungarumlaut
        0x02DB => 0x1D, // ogonek
        0x02DA => 0x1E, // ring
        0x02DC => 0x1F, // tilde
        0x2022 => 0x80, // bullet
        0x2020 => 0x81, // dagger
        0x2021 => 0x82, // daggerdbl
        0x2026 => 0x83, // ellipsis
        0x2014 => 0x84, // emdash
        0x2013 => 0x85, // endash
        0x0192 => 0x86, // florin
        0x2044 => 0x87, // fraction
        0x2039 => 0x88, // guilsinglleft
        0x203A => 0x89, // guilsinglright
        0x2212 => 0x8A, // minus
        0x2030 => 0x8B, // perthousand
        0x201E => 0x8C, // quotedblbase
        0x201C => 0x8D, // quotedblleft
        0x201D => 0x8E, // quotedblright
        0x2018 => 0x8F, // quoteleft
        0x2019 => 0x90, // quoteright
        0x201A => 0x91, // quotesinglbase
        0x2122 => 0x92, // trademark
        0xFB01 => 0x93, // fi
        0xFB02 => 0x94, // fl
        0x0141 => 0x95, // Lslash
        0x0152 => 0x96, // OE
        0x0160 => 0x97, // Scaron
        0x0178 => 0x98, // Ydieresis
        0x017D => 0x99, // Zcaron
        0x0131 => 0x9A, // dotlessi
        0x0142 => 0x9B, // lslash
        0x0153 => 0x9C, // oe
        0x0161 => 0x9D, // scaron
        0x017E => 0x9E, // zcaron
        0x20AC => 0xA0, // Euro
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_password_is_padded_to_32_bytes() {
        let padded = sanitize_password_r4(b"abcd");
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[..4], b"abcd");
        assert_eq!(&padded[4..], &PAD_BYTES[..28]);
    }

    #[test]
    fn long_password_is_truncated_to_32_bytes() {
        let long = [b'x'; 40];
        let padded = sanitize_password_r4(&long);
        assert_eq!(padded, [b'x'; 32]);
    }

    #[test]
    fn r6_password_is_truncated_to_127_bytes() {
        let long = "x".repeat(200);
        let sanitized = sanitize_password_r6(&long);
        assert_eq!(sanitized.len(), 127);
    }

    #[test]
    fn pdf_doc_encode_passes_ascii_through() {
        assert_eq!(pdf_doc_encode("abc123"), b"abc123".to_vec());
    }

    #[test]
    fn pdf_doc_encode_maps_special_code_points() {
        assert_eq!(pdf_doc_encode("\u{2022}"), vec![0x80]); // bullet
        assert_eq!(pdf_doc_encode("\u{20AC}"), vec![0xA0]); // Euro
    }

    #[test]
    fn pdf_doc_encode_drops_unrepresentable_characters() {
        assert_eq!(pdf_doc_encode("a\u{4E2D}b"), b"ab".to_vec());
    }

    #[test]
    fn r4_text_password_matches_manual_encode_then_pad() {
        let text = sanitize_password_r4_text("abc\u{2022}");
        let manual = sanitize_password_r4(&pdf_doc_encode("abc\u{2022}"));
        assert_eq!(text, manual);
    }
}
