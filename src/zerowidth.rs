//! Reversible obfuscation between a visible link alphabet and
//! non-rendering tag characters (U+E00xx block).
//!
//! Strictly a string transform for defeating naive link-preview scrapers —
//! there is no cryptographic property here. The mapping is bijective and
//! length-preserving: encode-then-decode is the identity for any string over
//! the visible alphabet, and both directions fail loudly on input outside
//! their domain rather than dropping characters.

use thiserror::Error;

/// Characters a visible retrieval path can contain: identifier alphabet,
/// plus the URL-structural characters of `<id>.<ext>?enc_key=<secret>`.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789.?=_";

/// Tag characters paired 1:1 with `ALPHABET` by position.
const REFERENCE: [char; 66] = [
    '\u{E0050}', '\u{E0043}', '\u{E0034}', '\u{E0035}',
    '\u{E002D}', '\u{E002A}', '\u{E005D}', '\u{E002E}',
    '\u{E0026}', '\u{E0024}', '\u{E0058}', '\u{E004E}',
    '\u{E0037}', '\u{E0049}', '\u{E0051}', '\u{E0041}',
    '\u{E0028}', '\u{E0027}', '\u{E004B}', '\u{E005E}',
    '\u{E0044}', '\u{E0040}', '\u{E004D}', '\u{E0056}',
    '\u{E0060}', '\u{E0055}', '\u{E0030}', '\u{E0023}',
    '\u{E0039}', '\u{E004F}', '\u{E0052}', '\u{E002B}',
    '\u{E0057}', '\u{E003C}', '\u{E0053}', '\u{E005B}',
    '\u{E003F}', '\u{E0021}', '\u{E003B}', '\u{E0046}',
    '\u{E0031}', '\u{E0059}', '\u{E003E}', '\u{E0047}',
    '\u{E005C}', '\u{E003D}', '\u{E0054}', '\u{E0048}',
    '\u{E005F}', '\u{E0038}', '\u{E003A}', '\u{E002F}',
    '\u{E005A}', '\u{E0020}', '\u{E0042}', '\u{E0033}',
    '\u{E0036}', '\u{E004A}', '\u{E0022}', '\u{E0045}',
    '\u{E0032}', '\u{E002C}', '\u{E0029}', '\u{E007B}',
    '\u{E007C}', '\u{E007D}',
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ZeroWidthError {
    /// Encoding input contained a character outside the visible alphabet.
    #[error("character {0:?} is not in the visible alphabet")]
    UnsupportedCharacter(char),

    /// Decoding input contained a code point outside the reference set.
    #[error("code point U+{0:X} is not in the reference set")]
    UnsupportedCodepoint(u32),
}

/// Re-encode a visible string into tag characters, one per input character.
pub fn encode(visible: &str) -> Result<String, ZeroWidthError> {
    visible
        .chars()
        .map(|c| {
            ALPHABET
                .iter()
                .position(|&b| b as char == c)
                .map(|i| REFERENCE[i])
                .ok_or(ZeroWidthError::UnsupportedCharacter(c))
        })
        .collect()
}

/// Recover the visible string from its tag-character form.
pub fn decode(obfuscated: &str) -> Result<String, ZeroWidthError> {
    obfuscated
        .chars()
        .map(|c| {
            REFERENCE
                .iter()
                .position(|&r| r == c)
                .map(|i| ALPHABET[i] as char)
                .ok_or(ZeroWidthError::UnsupportedCodepoint(c as u32))
        })
        .collect()
}

/// Whether `c` belongs to the reference set. Used to recognize an
/// obfuscated retrieval path by its first code point.
pub fn is_reference_codepoint(c: char) -> bool {
    REFERENCE.contains(&c)
}
