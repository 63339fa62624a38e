//! Text rendering demo
//!
//! Renders wrapped, justified text into an offscreen canvas using a bitmap
//! font built in memory, captures the canvas and writes it to a PNG. A second
//! frame draws the same text to the default surface and saves a screenshot.
//!
//! Usage: `text_demo [config.toml|config.ron] [output.png]`

use std::cell::RefCell;
use std::rc::Rc;

use gfx_core::foundation::logging;
use gfx_core::prelude::*;
use gfx_core::render::backend::Rect;
use gfx_core::render::pass::Capture;
use image::{Rgba, RgbaImage};

const SURFACE_SIZE: (u32, u32) = (320, 160);
const CANVAS_SIZE: (u32, u32) = (256, 96);

// 3x5 glyph bitmaps, one string per row
const GLYPHS: &str = "HELOWRD! ";
const GLYPH_ROWS: [[&str; 5]; 9] = [
    ["#.#", "#.#", "###", "#.#", "#.#"],
    ["###", "#..", "##.", "#..", "###"],
    ["#..", "#..", "#..", "#..", "###"],
    ["###", "#.#", "#.#", "#.#", "###"],
    ["#.#", "#.#", "#.#", "###", "#.#"],
    ["##.", "#.#", "##.", "#.#", "#.#"],
    ["##.", "#.#", "#.#", "#.#", "##."],
    [".#.", ".#.", ".#.", "...", ".#."],
    ["...", "...", "...", "...", "..."],
];

/// Lay the glyphs out in a strip separated by magenta spacer columns
fn glyph_strip() -> RgbaImage {
    let spacer = Rgba([255, 0, 255, 255]);
    let ink = Rgba([255, 255, 255, 255]);
    let width = 1 + GLYPH_ROWS.len() as u32 * 4;

    let mut strip = RgbaImage::from_pixel(width, 5, spacer);
    for (i, rows) in GLYPH_ROWS.iter().enumerate() {
        let x0 = 1 + i as u32 * 4;
        for (y, row) in rows.iter().enumerate() {
            for (x, cell) in row.chars().enumerate() {
                let pixel = if cell == '#' { ink } else { Rgba([0, 0, 0, 0]) };
                strip.put_pixel(x0 + x as u32, y as u32, pixel);
            }
        }
    }
    strip
}

fn load_config(path: Option<&String>) -> Result<GraphicsConfig, ConfigError> {
    match path {
        Some(path) => {
            log::info!("Loading graphics config from {path}");
            GraphicsConfig::load_from_file(path)
        }
        None => Ok(GraphicsConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(args.iter().find(|a| !a.ends_with(".png")))?;
    let output = args
        .iter()
        .find(|a| a.ends_with(".png"))
        .cloned()
        .unwrap_or_else(|| "text_demo.png".to_string());

    let backend: SharedBackend = Rc::new(RefCell::new(HeadlessBackend::new(SURFACE_SIZE.0, SURFACE_SIZE.1)));
    let mut graphics = Graphics::new(backend, config)?;

    let font = graphics.new_font(Rc::new(ImageGlyphSource::new(glyph_strip(), GLYPHS, 1)?))?;
    graphics.set_font(Some(font));

    let text = [
        ColoredString::new("HELLO ", Colorf::new(1.0, 0.8, 0.2, 1.0)),
        ColoredString::plain("WORLD! HOLD OLD WORD"),
    ];

    // Offscreen: wrapped and justified, captured at the end of the pass
    let canvas = graphics.new_canvas(&CanvasSettings::new(CANVAS_SIZE.0, CANVAS_SIZE.1))?;
    let captured = Rc::new(RefCell::new(None));

    graphics.begin_pass(PassInfo::new(vec![ColorAttachment::clear(
        canvas.clone(),
        Colorf::new(0.1, 0.1, 0.15, 1.0),
    )]))?;
    graphics.push(StackType::All)?;
    graphics.translate(8.0, 8.0);
    graphics.scale(4.0, 4.0);
    graphics.printf(&text, 58.0, AlignMode::Justify, &Transform2D::identity())?;
    graphics.pop()?;

    let sink = captured.clone();
    graphics.end_pass_with_capture(Capture::new(
        Rect::new(0, 0, CANVAS_SIZE.0 as i32, CANVAS_SIZE.1 as i32),
        move |image| *sink.borrow_mut() = image,
    ))?;

    match captured.borrow_mut().take() {
        Some(image) => {
            image.save(&output)?;
            log::info!("Canvas written to {output}");
        }
        None => log::warn!("Canvas capture produced no image"),
    }

    // Default surface: same text, centred, plus a screenshot at present
    let screenshot = Rc::new(RefCell::new(None));
    let sink = screenshot.clone();
    graphics.capture_screenshot(move |image| *sink.borrow_mut() = Some(image))?;

    graphics.begin_default_pass(BeginAction::Clear(Colorf::BLACK))?;
    graphics.scale(2.0, 2.0);
    graphics.printf(&text, SURFACE_SIZE.0 as f32 / 2.0, AlignMode::Center, &Transform2D::identity())?;
    graphics.origin();
    graphics.end_pass()?;

    let stats = graphics.stats();
    log::info!(
        "Frame: {} draw calls, {} passes, {} fonts, {} canvases, {} bytes of texture memory",
        stats.draw_calls,
        stats.render_passes,
        stats.fonts,
        stats.canvases,
        stats.texture_memory
    );

    graphics.present()?;

    if let Some(image) = screenshot.borrow_mut().take() {
        let path = output.replace(".png", "_screen.png");
        image.save(&path)?;
        log::info!("Screenshot written to {path}");
    }

    Ok(())
}
