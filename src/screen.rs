//! Generated frames: startup splash and error screens.
//!
//! Frames are drawn with `embedded-graphics` mono fonts onto an RGBA canvas
//! and handed to the sink as PNG bytes, exactly like a fetched image. Black
//! and near-black text on white keeps them legible through the dark-mode and
//! e-paper transforms.

use embedded_graphics::mono_font::ascii::{FONT_8X13, FONT_10X20};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Alignment, Text};
use image::{ImageFormat, Rgba, RgbaImage};

use crate::error::Error;

// Frame layout.
const TITLE_OFFSET_Y: i32 = 40;
const MESSAGE_START_Y: i32 = 10;
const MESSAGE_LINE_SPACING: i32 = 20;
const BOTTOM_MARGIN_Y: i32 = 30;
const ERROR_TITLE_OFFSET_Y: i32 = 60;
const ERROR_MESSAGE_START_Y: i32 = 20;
const MAX_LINE_WRAP_CHARS: usize = 60;

/// Adapter that lets `embedded-graphics` primitives draw onto an
/// [`RgbaImage`]. Out-of-bounds pixels are silently dropped.
struct Canvas {
    img: RgbaImage,
}

impl Canvas {
    fn white(width: u32, height: u32) -> Self {
        Self {
            img: RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])),
        }
    }

    fn into_png(self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        self.img
            .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(buf)
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        let (w, h) = self.img.dimensions();
        Size::new(w, h)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (w, h) = self.img.dimensions();
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 && (point.x as u32) < w && (point.y as u32) < h {
                self.img.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgba([color.r(), color.g(), color.b(), 255]),
                );
            }
        }
        Ok(())
    }
}

fn draw_centered(canvas: &mut Canvas, y: i32, text: &str, font_large: bool, color: Rgb888) {
    let style = if font_large {
        MonoTextStyle::new(&FONT_10X20, color)
    } else {
        MonoTextStyle::new(&FONT_8X13, color)
    };
    let x = (canvas.size().width / 2) as i32;
    // Canvas::draw_iter is infallible.
    let _ = Text::with_alignment(text, Point::new(x, y), style, Alignment::Center).draw(canvas);
}

/// Generate the startup splash frame: product title, device identity lines,
/// and a footer caption on a white background.
pub fn startup_screen(width: u32, height: u32, message: &str) -> Result<Vec<u8>, Error> {
    let mut canvas = Canvas::white(width, height);
    let center_y = (height / 2) as i32;

    draw_centered(
        &mut canvas,
        center_y - TITLE_OFFSET_Y,
        "TRMNL",
        true,
        Rgb888::BLACK,
    );

    let mut y = center_y + MESSAGE_START_Y;
    for line in message.lines() {
        draw_centered(&mut canvas, y, line, false, Rgb888::new(100, 100, 100));
        y += MESSAGE_LINE_SPACING;
    }

    draw_centered(
        &mut canvas,
        height as i32 - BOTTOM_MARGIN_Y,
        "Virtual Display",
        false,
        Rgb888::new(150, 150, 150),
    );

    canvas.into_png()
}

/// Generate an error frame: red title, wrapped message, gray help footer.
pub fn error_screen(width: u32, height: u32, title: &str, message: &str) -> Result<Vec<u8>, Error> {
    let mut canvas = Canvas::white(width, height);
    let center_y = (height / 2) as i32;

    draw_centered(
        &mut canvas,
        center_y - ERROR_TITLE_OFFSET_Y,
        &format!("! {}", title),
        true,
        Rgb888::new(200, 0, 0),
    );

    let mut y = center_y - ERROR_MESSAGE_START_Y;
    for line in wrap_text(message, MAX_LINE_WRAP_CHARS) {
        draw_centered(&mut canvas, y, &line, false, Rgb888::new(80, 80, 80));
        y += MESSAGE_LINE_SPACING;
    }

    draw_centered(
        &mut canvas,
        height as i32 - BOTTOM_MARGIN_Y,
        "Check configuration and try again",
        false,
        Rgb888::new(120, 120, 120),
    );

    canvas.into_png()
}

/// Split long text into lines of at most `max_chars`, breaking at spaces
/// where possible. Embedded newlines also break lines.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for raw_line in text.lines() {
        let chars: Vec<char> = raw_line.chars().collect();
        if chars.len() <= max_chars {
            lines.push(raw_line.to_string());
            continue;
        }

        let mut start = 0;
        while start < chars.len() {
            let mut end = (start + max_chars).min(chars.len());

            if end < chars.len() {
                // Back up to the last space inside the window.
                if let Some(break_at) = (start..end).rev().find(|&i| chars[i] == ' ') {
                    if break_at > start {
                        end = break_at;
                    }
                }
            }

            lines.push(chars[start..end].iter().collect());
            start = end;
            if start < chars.len() && chars[start] == ' ' {
                start += 1;
            }
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_screen_dimensions() {
        let png = startup_screen(200, 120, "MAC: AA:BB:CC:DD:EE:FF").unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (200, 120));
        // Corners stay white.
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        // Some pixels are drawn dark (the title text).
        assert!(img.pixels().any(|p| p.0[0] < 128));
    }

    #[test]
    fn test_error_screen_has_red_title() {
        let png = error_screen(200, 120, "Connection Error", "could not reach server").unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert!(img
            .pixels()
            .any(|p| p.0[0] == 200 && p.0[1] == 0 && p.0[2] == 0));
    }

    #[test]
    fn test_wrap_text_short_passthrough() {
        assert_eq!(wrap_text("short", 60), vec!["short".to_string()]);
    }

    #[test]
    fn test_wrap_text_breaks_at_spaces() {
        let lines = wrap_text("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_wrap_text_honors_embedded_newlines() {
        let lines = wrap_text("first\nsecond", 60);
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_wrap_text_hard_breaks_long_words() {
        let lines = wrap_text("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }
}
