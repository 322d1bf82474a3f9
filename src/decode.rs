//! Byte-to-text decoding for remote shell output.
//!
//! Remote tools write whatever encoding they like. Decoding tries a fixed
//! ordered list of encodings and takes the first that accepts the bytes;
//! when none does, it falls back to lossy UTF-8. It never fails.

/// Encodings the decoder knows how to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
    Ascii,
}

/// The order in which encodings are attempted by default.
pub const DEFAULT_ENCODINGS: [TextEncoding; 4] = [
    TextEncoding::Utf8,
    TextEncoding::Latin1,
    TextEncoding::Windows1252,
    TextEncoding::Ascii,
];

// 0x80..=0x9F in Windows-1252; `None` marks the five undefined bytes.
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

impl TextEncoding {
    /// Decode `bytes`, or `None` if they are not valid in this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            TextEncoding::Latin1 => Some(bytes.iter().map(|b| char::from(*b)).collect()),
            TextEncoding::Windows1252 => bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(b - 0x80)],
                    _ => Some(char::from(b)),
                })
                .collect(),
            TextEncoding::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|b| char::from(*b)).collect()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputDecoder {
    encodings: Vec<TextEncoding>,
}

impl Default for OutputDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODINGS.to_vec())
    }
}

impl OutputDecoder {
    pub fn new(encodings: Vec<TextEncoding>) -> Self {
        Self { encodings }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        self.encodings
            .iter()
            .find_map(|encoding| encoding.decode(bytes))
            .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Length of the prefix of `bytes` that does not end inside a UTF-8
/// sequence. Bytes past it belong to a character still in flight.
pub fn complete_prefix_len(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_is_tried_first() {
        let decoder = OutputDecoder::default();
        assert_eq!(decoder.decode("naïve ✓".as_bytes()), "naïve ✓");
    }

    #[test]
    fn invalid_utf8_falls_through_to_latin1() {
        let decoder = OutputDecoder::default();
        assert_eq!(decoder.decode(&[b'c', b'a', b'f', 0xE9]), "café");
    }

    #[test]
    fn windows_1252_maps_smart_quotes() {
        let decoder = OutputDecoder::new(vec![TextEncoding::Utf8, TextEncoding::Windows1252]);
        assert_eq!(decoder.decode(&[0x93, b'h', b'i', 0x94]), "\u{201C}hi\u{201D}");
    }

    #[test]
    fn lossy_fallback_when_no_encoding_accepts() {
        let decoder = OutputDecoder::new(vec![
            TextEncoding::Utf8,
            TextEncoding::Windows1252,
            TextEncoding::Ascii,
        ]);
        assert_eq!(decoder.decode(&[b'o', b'k', 0x81]), "ok\u{FFFD}");
        assert_eq!(OutputDecoder::new(vec![]).decode(b"plain"), "plain");
    }

    #[test]
    fn complete_prefix_holds_back_split_characters() {
        let check = "ok ✓".as_bytes();
        assert_eq!(complete_prefix_len(check), check.len());
        assert_eq!(complete_prefix_len(&check[..check.len() - 1]), 3);
        // A genuinely invalid byte is not held back.
        assert_eq!(complete_prefix_len(&[b'a', 0xFF, b'b']), 3);
    }
}
