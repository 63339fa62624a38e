//! Text shaping: codepoints to positioned, coloured glyph quads

use serde::{Deserialize, Serialize};

use super::{ColoredCodepoints, ColoredString, Font, FontResult, SourceKind};
use crate::render::backend::TextureHandle;
use crate::render::color::{gamma_correct, un_gamma_correct, Colorf};
use crate::render::vertex::GlyphVertex;

const NEWLINE: u32 = '\n' as u32;
const CARRIAGE_RETURN: u32 = '\r' as u32;
const SPACE: u32 = ' ' as u32;

/// Horizontal alignment of wrapped text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlignMode {
    /// Flush left
    #[default]
    Left,
    /// Centred in the wrap width
    Center,
    /// Flush right
    Right,
    /// Spaces stretched to fill the wrap width
    Justify,
}

/// A run of quads drawn with one texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    /// Atlas surface
    pub texture: TextureHandle,
    /// First vertex in the vertex list
    pub start_vertex: usize,
    /// Number of vertices (four per glyph)
    pub vertex_count: usize,
}

/// Size of a shaped block of text
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextInfo {
    /// Width of the widest line
    pub width: f32,
    /// Total height
    pub height: f32,
}

/// Shaped text ready for submission
#[derive(Debug, Clone, Default)]
pub struct ShapedText {
    /// Draw commands sorted by texture
    pub commands: Vec<DrawCommand>,
    /// Quad vertices
    pub vertices: Vec<GlyphVertex>,
    /// Extent of the text
    pub info: TextInfo,
}

impl Font {
    fn line_advance(&self) -> f32 {
        (self.height() * self.line_height() + 0.5).floor()
    }

    /// Append quads for `text` to `vertices`
    ///
    /// Newlines move the pen down one line, carriage returns are ignored and
    /// `extra_spacing` is added after every space. If a glyph lookup grows the
    /// atlas, everything emitted so far is discarded and shaping starts over,
    /// since earlier quads may reference a surface that no longer exists.
    pub fn generate_vertices(
        &mut self,
        text: &ColoredCodepoints,
        constant_color: Colorf,
        vertices: &mut Vec<GlyphVertex>,
        extra_spacing: f32,
        offset: (f32, f32),
    ) -> FontResult<(Vec<DrawCommand>, TextInfo)> {
        let height_offset = if self.primary().kind() == SourceKind::TrueType {
            self.baseline()
        } else {
            0.0
        };

        let start_len = vertices.len();
        vertices.reserve(text.codepoints.len() * 4);

        let gamma = self.gamma_correct();
        let linear_constant = gamma_correct(constant_color, gamma);

        'shaping: loop {
            let mut dx = offset.0;
            let mut dy = offset.1;
            let mut max_width = 0.0f32;
            let mut commands: Vec<DrawCommand> = Vec::new();
            let mut prev_glyph = 0u32;
            let mut cur_color = constant_color.to_color();
            let mut next_color = 0usize;

            vertices.truncate(start_len);

            for (i, &c) in text.codepoints.iter().enumerate() {
                if let Some(entry) = text.colors.get(next_color).filter(|e| e.index == i) {
                    next_color += 1;
                    let linear = gamma_correct(entry.color.clamped(), gamma) * linear_constant;
                    cur_color = un_gamma_correct(linear, gamma).to_color();
                }

                if c == NEWLINE {
                    max_width = max_width.max(dx.trunc());
                    dy += self.line_advance();
                    dx = offset.0;
                    continue;
                }

                if c == CARRIAGE_RETURN {
                    continue;
                }

                let generation = self.texture_cache_id();
                let glyph = match self.find_glyph(c) {
                    Ok(glyph) => glyph,
                    Err(e) => {
                        vertices.truncate(start_len);
                        return Err(e);
                    }
                };
                if generation != self.texture_cache_id() {
                    log::debug!("Glyph atlas changed while shaping; restarting");
                    continue 'shaping;
                }

                dx += self.kerning(prev_glyph, c);

                if let Some(texture) = glyph.texture {
                    for corner in &glyph.vertices {
                        let mut v = *corner;
                        v.x += dx;
                        v.y += dy + height_offset;
                        v.color = cur_color;
                        vertices.push(v);
                    }

                    match commands.last_mut() {
                        Some(cmd) if cmd.texture == texture => cmd.vertex_count += 4,
                        _ => commands.push(DrawCommand {
                            texture,
                            start_vertex: vertices.len() - 4,
                            vertex_count: 4,
                        }),
                    }
                }

                dx += glyph.spacing;

                if c == SPACE && extra_spacing != 0.0 {
                    dx = (dx + extra_spacing).floor();
                }

                prev_glyph = c;
            }

            // Fewer texture switches first, then submission order
            commands.sort_by_key(|cmd| (cmd.texture, cmd.start_vertex));

            max_width = max_width.max(dx.trunc());
            let last_line = if dx > 0.0 { self.line_advance() } else { 0.0 };
            let info = TextInfo {
                width: max_width - offset.0,
                height: dy.trunc() + last_line - offset.1,
            };

            return Ok((commands, info));
        }
    }

    /// Shape wrapped and aligned text into `vertices`
    ///
    /// Commands from consecutive lines are merged when they continue the same
    /// texture run.
    pub fn generate_vertices_formatted(
        &mut self,
        text: &ColoredCodepoints,
        constant_color: Colorf,
        wrap: f32,
        align: AlignMode,
        vertices: &mut Vec<GlyphVertex>,
    ) -> FontResult<(Vec<DrawCommand>, TextInfo)> {
        let wrap = wrap.max(0.0);
        let start_len = vertices.len();

        loop {
            let generation = self.texture_cache_id();
            vertices.truncate(start_len);

            let (lines, widths) = self.get_wrap_codepoints(text, wrap)?;
            let mut commands: Vec<DrawCommand> = Vec::new();
            let mut y = 0.0f32;
            let mut max_width = 0.0f32;

            for (line, &width) in lines.iter().zip(&widths) {
                max_width = max_width.max(width);

                let mut offset = (0.0, y.floor());
                let mut extra_spacing = 0.0;
                match align {
                    AlignMode::Left => {}
                    AlignMode::Right => offset.0 = (wrap - width).floor(),
                    AlignMode::Center => offset.0 = ((wrap - width) / 2.0).floor(),
                    AlignMode::Justify => {
                        let spaces = line.codepoints.iter().filter(|&&c| c == SPACE).count();
                        if width < wrap && spaces >= 1 {
                            extra_spacing = (wrap - width) / spaces as f32;
                        }
                    }
                }

                let (line_commands, _) =
                    match self.generate_vertices(line, constant_color, vertices, extra_spacing, offset) {
                        Ok(shaped) => shaped,
                        Err(e) => {
                            vertices.truncate(start_len);
                            return Err(e);
                        }
                    };

                let mut rest = line_commands.into_iter().peekable();
                if let (Some(prev), Some(first)) = (commands.last_mut(), rest.peek()) {
                    if prev.texture == first.texture
                        && prev.start_vertex + prev.vertex_count == first.start_vertex
                    {
                        prev.vertex_count += first.vertex_count;
                        rest.next();
                    }
                }
                commands.extend(rest);

                y += self.height() * self.line_height();
            }

            if generation == self.texture_cache_id() {
                let info = TextInfo { width: max_width, height: y.trunc() };
                return Ok((commands, info));
            }

            log::debug!("Glyph atlas changed during formatted shaping; restarting");
        }
    }

    /// Shape coloured strings on a single (newline-split) block
    pub fn shape(&mut self, text: &[ColoredString], constant_color: Colorf) -> FontResult<ShapedText> {
        let cps = ColoredCodepoints::from_strings(text);
        let mut vertices = Vec::new();
        let (commands, info) = self.generate_vertices(&cps, constant_color, &mut vertices, 0.0, (0.0, 0.0))?;
        Ok(ShapedText { commands, vertices, info })
    }

    /// Shape coloured strings wrapped to `wrap` pixels
    pub fn shape_formatted(
        &mut self,
        text: &[ColoredString],
        constant_color: Colorf,
        wrap: f32,
        align: AlignMode,
    ) -> FontResult<ShapedText> {
        let cps = ColoredCodepoints::from_strings(text);
        let mut vertices = Vec::new();
        let (commands, info) =
            self.generate_vertices_formatted(&cps, constant_color, wrap, align, &mut vertices)?;
        Ok(ShapedText { commands, vertices, info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::color::Color;
    use crate::render::text::testing::{font_with, FixedSource};
    use crate::render::text::FontError;

    #[test]
    fn test_one_texture_one_command() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let shaped = font.shape(&[ColoredString::plain("abc de")], Colorf::WHITE).unwrap();

        assert_eq!(shaped.commands.len(), 1);
        assert_eq!(shaped.commands[0].start_vertex, 0);
        assert_eq!(shaped.commands[0].vertex_count, 20);
        assert_eq!(shaped.vertices.len(), 20);
    }

    #[test]
    fn test_pen_advance_and_baseline() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let shaped = font.shape(&[ColoredString::plain("ab\nc")], Colorf::WHITE).unwrap();

        // Bearing x is 1, baseline 8, bearing y 7
        assert_eq!(shaped.vertices[0].x, 1.0);
        assert_eq!(shaped.vertices[0].y, 1.0);
        assert_eq!(shaped.vertices[4].x, 8.0);
        // Third glyph is on the second line
        assert_eq!(shaped.vertices[8].x, 1.0);
        assert_eq!(shaped.vertices[8].y, 11.0);

        assert_eq!(shaped.info, TextInfo { width: 14.0, height: 20.0 });
    }

    #[test]
    fn test_kerning_moves_pen() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let shaped = font.shape(&[ColoredString::plain("AV")], Colorf::WHITE).unwrap();
        assert_eq!(shaped.vertices[4].x - shaped.vertices[0].x, 5.0);
    }

    #[test]
    fn test_color_runs_multiply_constant() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let red = Colorf::new(1.0, 0.0, 0.0, 1.0);
        let half = Colorf::new(1.0, 1.0, 1.0, 0.5);
        let shaped = font
            .shape(&[ColoredString::plain("a"), ColoredString::new("b", red)], half)
            .unwrap();

        assert_eq!(shaped.vertices[0].color, Color::new(255, 255, 255, 128));
        assert_eq!(shaped.vertices[4].color, Color::new(255, 0, 0, 128));
    }

    #[test]
    fn test_shaping_restarts_after_atlas_growth() {
        let (_, mut font) = font_with(FixedSource::new(10.0).with_glyph_size(40, 40));
        let text: String = ('A'..='J').collect();
        let shaped = font.shape(&[ColoredString::plain(text)], Colorf::WHITE).unwrap();

        // All ten glyphs ended up on the replacement surface
        assert_eq!(shaped.commands.len(), 1);
        assert_eq!(shaped.vertices.len(), 40);
        let surface = font.atlas().surfaces()[0].texture;
        assert_eq!(shaped.commands[0].texture, surface);
    }

    #[test]
    fn test_two_surfaces_two_sorted_commands() {
        let config = crate::config::FontConfig {
            max_texture_width: 128,
            max_texture_height: 128,
            ..Default::default()
        };
        let backend = crate::render::text::testing::shared_backend(
            crate::render::headless::HeadlessBackend::new(8, 8),
        );
        let source = std::rc::Rc::new(FixedSource::new(10.0).with_glyph_size(40, 40));
        let mut font = Font::new(backend, source, &config, Default::default(), false).unwrap();

        // Nine glyphs fill the first surface; the tenth goes to an appended one
        let text: String = ('A'..='J').collect();
        let shaped = font.shape(&[ColoredString::plain(text)], Colorf::WHITE).unwrap();

        let surfaces = font.atlas().surfaces();
        assert_eq!(surfaces.len(), 2);
        assert_eq!(shaped.commands.len(), 2);
        assert!(shaped.commands[0].texture < shaped.commands[1].texture);
        let total: usize = shaped.commands.iter().map(|c| c.vertex_count).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_formatted_alignment() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let text = [ColoredString::plain("ab")];

        let right = font.shape_formatted(&text, Colorf::WHITE, 100.0, AlignMode::Right).unwrap();
        assert_eq!(right.vertices[0].x, 100.0 - 14.0 + 1.0);

        let center = font.shape_formatted(&text, Colorf::WHITE, 100.0, AlignMode::Center).unwrap();
        assert_eq!(center.vertices[0].x, 43.0 + 1.0);
        assert_eq!(center.info, TextInfo { width: 14.0, height: 10.0 });
    }

    #[test]
    fn test_justify_stretches_spaces() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        // "a b" is 18 wide; 12 extra pixels go to the one space
        let shaped = font
            .shape_formatted(&[ColoredString::plain("a b")], Colorf::WHITE, 30.0, AlignMode::Justify)
            .unwrap();
        assert_eq!(shaped.vertices[4].x, 24.0);
    }

    #[test]
    fn test_formatted_lines_merge_commands() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let shaped = font
            .shape_formatted(&[ColoredString::plain("hello world")], Colorf::WHITE, 40.0, AlignMode::Left)
            .unwrap();

        assert_eq!(shaped.commands.len(), 1);
        assert_eq!(shaped.vertices.len(), 40);
        // Second line starts at y = 10
        assert_eq!(shaped.vertices[20].y, 11.0);
        assert_eq!(shaped.info.height, 20.0);
    }

    #[test]
    fn test_failed_glyph_discards_partial_output() {
        let (_, mut font) = font_with(FixedSource::new(10.0).with_sized_glyph('Z', 10_000, 10));
        let mut vertices = vec![GlyphVertex::default()];

        let result = font.generate_vertices(
            &ColoredCodepoints::from_text("abZ"),
            Colorf::WHITE,
            &mut vertices,
            0.0,
            (0.0, 0.0),
        );
        assert!(matches!(result, Err(FontError::GlyphTooLarge { width: 10_000, .. })));
        assert_eq!(vertices.len(), 1);

        let result = font.generate_vertices_formatted(
            &ColoredCodepoints::from_text("ab cd\nZ"),
            Colorf::WHITE,
            100.0,
            AlignMode::Left,
            &mut vertices,
        );
        assert!(result.is_err());
        assert_eq!(vertices.len(), 1);
    }
}
