//! Coloured text runs and codepoint decoding

use super::{FontError, FontResult};
use crate::render::color::Colorf;

/// A piece of text drawn in one colour
#[derive(Debug, Clone, PartialEq)]
pub struct ColoredString {
    /// The text
    pub text: String,
    /// Foreground colour, multiplied with the current draw colour
    pub color: Colorf,
}

impl ColoredString {
    /// Text in a given colour
    pub fn new(text: impl Into<String>, color: Colorf) -> Self {
        Self { text: text.into(), color }
    }

    /// White text
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Colorf::WHITE)
    }

    /// Decode UTF-8 bytes, failing on malformed input
    pub fn from_utf8(bytes: &[u8], color: Colorf) -> FontResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| FontError::Decode(e.to_string()))?;
        Ok(Self::new(text, color))
    }
}

/// A colour that takes effect at a codepoint index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedColor {
    /// Colour
    pub color: Colorf,
    /// First codepoint drawn in this colour
    pub index: usize,
}

/// Codepoints plus sorted colour-run starts
///
/// No two colour entries share an index. Text before the first entry is
/// drawn in white.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColoredCodepoints {
    /// Unicode scalar values
    pub codepoints: Vec<u32>,
    /// Colour runs in index order
    pub colors: Vec<IndexedColor>,
}

impl ColoredCodepoints {
    /// Flatten coloured strings into one run list
    ///
    /// Empty strings contribute no colour entry. A lone white run starting
    /// at 0 is dropped, since white is the default.
    pub fn from_strings(strings: &[ColoredString]) -> Self {
        let mut out = Self::default();

        for s in strings {
            if s.text.is_empty() {
                continue;
            }
            out.colors.push(IndexedColor { color: s.color, index: out.codepoints.len() });
            out.codepoints.extend(s.text.chars().map(u32::from));
        }

        if let [only] = out.colors.as_slice() {
            if only.index == 0 && only.color == Colorf::WHITE {
                out.colors.clear();
            }
        }

        out
    }

    /// Uncoloured codepoints of `text`
    pub fn from_text(text: &str) -> Self {
        Self {
            codepoints: text.chars().map(u32::from).collect(),
            colors: Vec::new(),
        }
    }

    /// Whether there are no codepoints
    pub fn is_empty(&self) -> bool {
        self.codepoints.is_empty()
    }

    /// Number of codepoints
    pub fn len(&self) -> usize {
        self.codepoints.len()
    }

    /// Re-encode as a string, skipping values that are not scalar values
    pub fn to_text(&self) -> String {
        self.codepoints.iter().filter_map(|&c| char::from_u32(c)).collect()
    }
}

/// Decode UTF-8 bytes into codepoints
pub fn decode_utf8(bytes: &[u8]) -> FontResult<Vec<u32>> {
    let text = std::str::from_utf8(bytes).map_err(|e| FontError::Decode(e.to_string()))?;
    Ok(text.chars().map(u32::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_skip_empty_strings() {
        let red = Colorf::new(1.0, 0.0, 0.0, 1.0);
        let cps = ColoredCodepoints::from_strings(&[
            ColoredString::plain("ab"),
            ColoredString::new("", red),
            ColoredString::new("cd", red),
        ]);

        assert_eq!(cps.len(), 4);
        assert_eq!(cps.colors.len(), 2);
        assert_eq!(cps.colors[1], IndexedColor { color: red, index: 2 });
    }

    #[test]
    fn test_single_white_run_is_dropped() {
        let cps = ColoredCodepoints::from_strings(&[ColoredString::plain("héllo")]);
        assert!(cps.colors.is_empty());
        assert_eq!(cps.to_text(), "héllo");
    }

    #[test]
    fn test_malformed_utf8() {
        assert!(matches!(decode_utf8(&[0x61, 0xff, 0x62]), Err(FontError::Decode(_))));
        assert!(ColoredString::from_utf8(&[0xc3, 0x28], Colorf::WHITE).is_err());
        assert_eq!(decode_utf8("é".as_bytes()).unwrap(), vec![0xe9]);
    }
}
