//! Greedy line wrapping

use super::{ColoredCodepoints, ColoredString, Font, FontResult, IndexedColor};
use crate::render::color::Colorf;

const NEWLINE: u32 = '\n' as u32;
const CARRIAGE_RETURN: u32 = '\r' as u32;
const SPACE: u32 = ' ' as u32;

impl Font {
    /// Split text into lines no wider than `wrap_limit`
    ///
    /// Lines break at explicit newlines and at the last space before the
    /// limit. A word wider than the limit is broken between characters, and a
    /// single character wider than the limit gets a line of its own. Reported
    /// widths never include trailing spaces. Colour runs are carried across
    /// breaks so every line starts in the colour active at its first
    /// character.
    pub fn get_wrap_codepoints(
        &mut self,
        text: &ColoredCodepoints,
        wrap_limit: f32,
    ) -> FontResult<(Vec<ColoredCodepoints>, Vec<f32>)> {
        let mut lines = Vec::new();
        let mut widths = Vec::new();

        let mut width = 0.0f32;
        let mut width_before_last_space = 0.0f32;
        let mut width_of_trailing_space = 0.0f32;
        let mut prev_glyph = 0u32;
        let mut last_space_index: Option<usize> = None;

        let mut cur_color = Colorf::WHITE;
        let mut add_cur_color = false;
        let mut cur_color_i: Option<usize> = None;

        let mut line = ColoredCodepoints::default();

        let cps = &text.codepoints;
        let colors = &text.colors;
        let mut i = 0;

        while i < cps.len() {
            let c = cps[i];

            // Track the colour first so it survives even if this codepoint is skipped
            let next_color = cur_color_i.map_or(0, |ci| ci + 1);
            if let Some(entry) = colors.get(next_color).filter(|e| e.index == i) {
                cur_color = entry.color;
                cur_color_i = Some(next_color);
                add_cur_color = true;
            }

            if c == NEWLINE {
                widths.push(width - width_of_trailing_space);
                lines.push(std::mem::take(&mut line));

                add_cur_color = true;
                width = 0.0;
                width_before_last_space = 0.0;
                width_of_trailing_space = 0.0;
                prev_glyph = 0;
                last_space_index = None;
                i += 1;
                continue;
            }

            if c == CARRIAGE_RETURN {
                i += 1;
                continue;
            }

            let glyph = self.find_glyph(c)?;
            let char_width = glyph.spacing + self.kerning(prev_glyph, c);
            let new_width = width + char_width;

            if c != SPACE && new_width > wrap_limit {
                if line.codepoints.is_empty() {
                    // Nothing to break before: the character gets its own line
                    if add_cur_color {
                        line.colors.push(IndexedColor { color: cur_color, index: 0 });
                    }
                    line.codepoints.push(c);
                    width = new_width;
                    i += 1;
                } else if let Some(space_index) = last_space_index {
                    // Rewind to the last space and drop the trailing space run
                    while line.codepoints.last().is_some_and(|&cp| cp != SPACE) {
                        line.codepoints.pop();
                    }
                    while line.codepoints.last() == Some(&SPACE) {
                        line.codepoints.pop();
                    }
                    let kept = line.codepoints.len();
                    while line.colors.last().is_some_and(|e| e.index >= kept) {
                        line.colors.pop();
                    }

                    // Restore the colour active at the space
                    if let Some(ci) = cur_color_i {
                        if let Some(back) = (0..=ci).rev().find(|&k| colors[k].index <= space_index) {
                            cur_color = colors[back].color;
                            cur_color_i = Some(back);
                        } else {
                            cur_color = Colorf::WHITE;
                            cur_color_i = None;
                        }
                    }

                    width = width_before_last_space;
                    i = space_index + 1;
                }

                widths.push(width);
                lines.push(std::mem::take(&mut line));

                add_cur_color = true;
                prev_glyph = 0;
                width = 0.0;
                width_before_last_space = 0.0;
                width_of_trailing_space = 0.0;
                last_space_index = None;
                continue;
            }

            if prev_glyph != SPACE && c == SPACE {
                width_before_last_space = width;
            }

            width = new_width;
            prev_glyph = c;

            if add_cur_color {
                line.colors.push(IndexedColor { color: cur_color, index: line.codepoints.len() });
                add_cur_color = false;
            }

            line.codepoints.push(c);

            if c == SPACE {
                last_space_index = Some(i);
                width_of_trailing_space += char_width;
            } else {
                width_of_trailing_space = 0.0;
            }

            i += 1;
        }

        if !line.codepoints.is_empty() {
            widths.push(width - width_of_trailing_space);
            lines.push(line);
        }

        Ok((lines, widths))
    }

    /// Wrap coloured strings, returning plain line text and widths
    pub fn get_wrap(
        &mut self,
        text: &[ColoredString],
        wrap_limit: f32,
    ) -> FontResult<(Vec<String>, Vec<f32>)> {
        let cps = ColoredCodepoints::from_strings(text);
        let (lines, widths) = self.get_wrap_codepoints(&cps, wrap_limit)?;
        Ok((lines.iter().map(ColoredCodepoints::to_text).collect(), widths))
    }

    /// Width of the widest `\n`-separated line of `text`
    pub fn get_width(&mut self, text: &str) -> FontResult<f32> {
        let mut max_width = 0.0f32;

        for line in text.split('\n') {
            let mut width = 0.0;
            let mut prev_glyph = 0;

            for ch in line.chars() {
                let c = u32::from(ch);
                if c == CARRIAGE_RETURN {
                    continue;
                }
                let glyph = self.find_glyph(c)?;
                width += glyph.spacing + self.kerning(prev_glyph, c);
                prev_glyph = c;
            }

            max_width = max_width.max(width);
        }

        Ok(max_width)
    }

    /// Advance of a single character
    pub fn get_char_width(&mut self, ch: char) -> FontResult<f32> {
        Ok(self.find_glyph(u32::from(ch))?.spacing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::text::testing::{font_with, FixedSource};

    // Letters advance 7, space advances 4

    fn wrap(text: &str, limit: f32) -> (Vec<String>, Vec<f32>) {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        font.get_wrap(&[ColoredString::plain(text)], limit).unwrap()
    }

    #[test]
    fn test_trailing_spaces_excluded_from_width() {
        let (lines, widths) = wrap("ab   ", 1000.0);
        assert_eq!(lines, vec!["ab   "]);
        assert_eq!(widths, vec![14.0]);
    }

    #[test]
    fn test_oversized_first_character_kept() {
        let (lines, widths) = wrap("A", 3.0);
        assert_eq!(lines, vec!["A"]);
        assert_eq!(widths, vec![7.0]);

        let (lines, _) = wrap("AB", 3.0);
        assert_eq!(lines, vec!["A", "B"]);
    }

    #[test]
    fn test_rewind_to_space() {
        // "hello " = 39, "hello w" = 46
        let (lines, widths) = wrap("hello world", 40.0);
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(widths, vec![35.0, 35.0]);
    }

    #[test]
    fn test_hard_break_without_space() {
        let (lines, widths) = wrap("abcdef", 22.0);
        assert_eq!(lines, vec!["abc", "def"]);
        assert_eq!(widths, vec![21.0, 21.0]);
    }

    #[test]
    fn test_explicit_newlines() {
        let (lines, widths) = wrap("ab\n\ncd\r", 1000.0);
        assert_eq!(lines, vec!["ab", "", "cd"]);
        assert_eq!(widths, vec![14.0, 0.0, 14.0]);
    }

    #[test]
    fn test_color_survives_rewind() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let red = Colorf::new(1.0, 0.0, 0.0, 1.0);
        let text = ColoredCodepoints::from_strings(&[
            ColoredString::plain("hello wo"),
            ColoredString::new("rld", red),
        ]);

        let (lines, _) = font.get_wrap_codepoints(&text, 60.0).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].to_text(), "hello");
        assert!(lines[0].colors.iter().all(|c| c.color == Colorf::WHITE));

        assert_eq!(lines[1].to_text(), "world");
        assert_eq!(
            lines[1].colors,
            vec![
                IndexedColor { color: Colorf::WHITE, index: 0 },
                IndexedColor { color: red, index: 2 },
            ]
        );
    }

    #[test]
    fn test_get_width() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        assert_eq!(font.get_width("").unwrap(), 0.0);
        assert_eq!(font.get_width("ab\nabc\r").unwrap(), 21.0);
        // Kerning between A and V is -2
        assert_eq!(font.get_width("AV").unwrap(), 12.0);
        assert_eq!(font.get_char_width(' ').unwrap(), 4.0);
    }
}
