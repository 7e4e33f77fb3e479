//! Image transformation pipeline: decode -> e-paper -> rotate -> invert -> encode.
//!
//! The pipeline is pure: raw bytes in, PNG bytes out, no I/O. Stage order is
//! fixed. The e-paper simulation must run before rotation so its grain and
//! error diffusion operate on axis-aligned pixel neighborhoods.

use std::io::Cursor;

use image::{imageops, ImageFormat, Rgba, RgbaImage};
use rand::Rng;

use crate::config::Rotation;
use crate::error::Error;

/// Per-frame render options owned by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderSettings {
    /// Display rotation
    pub rotation: Rotation,
    /// Invert colors
    pub dark_mode: bool,
    /// Simulate e-paper quantization and grain
    pub epaper_mode: bool,
}

impl RenderSettings {
    /// True when every stage is a no-op.
    pub fn is_identity(&self) -> bool {
        self.rotation == Rotation::None && !self.dark_mode && !self.epaper_mode
    }
}

impl From<&crate::config::Config> for RenderSettings {
    fn from(cfg: &crate::config::Config) -> Self {
        Self {
            rotation: cfg.rotation,
            dark_mode: cfg.dark_mode,
            epaper_mode: cfg.epaper_mode,
        }
    }
}

/// Apply the configured transformations to raw image bytes.
///
/// Returns PNG-encoded output. When no transformation is enabled the input
/// bytes are returned untouched, skipping the decode/encode round trip
/// entirely; this is an optimization, not a behavioral difference, since an
/// identity pipeline would reproduce the same pixels.
///
/// # Errors
///
/// [`Error::Decode`] if the input bytes are not a decodable image;
/// [`Error::Encode`] if PNG serialization fails. A decode failure aborts the
/// whole transform; no stage is partially applied.
pub fn transform(raw: &[u8], settings: &RenderSettings) -> Result<Vec<u8>, Error> {
    if settings.is_identity() {
        return Ok(raw.to_vec());
    }

    let mut img = image::load_from_memory(raw)?.to_rgba8();

    if settings.epaper_mode {
        img = epaper_effect(&img);
    }

    img = match settings.rotation {
        Rotation::None => img,
        Rotation::Cw90 => imageops::rotate90(&img),
        Rotation::Cw180 => imageops::rotate180(&img),
        Rotation::Cw270 => imageops::rotate270(&img),
    };

    if settings.dark_mode {
        invert(&mut img);
    }

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| Error::Encode(e.to_string()))?;

    Ok(buf)
}

/// Invert the RGB channels of every pixel in place, leaving alpha unchanged.
pub fn invert(img: &mut RgbaImage) {
    imageops::invert(img);
}

/// Simulate an e-paper display.
///
/// Converts to 8-bit luminance, quantizes to 16 gray levels with
/// Floyd-Steinberg error diffusion, adds uniform grain noise, and tints the
/// result toward the off-white of an e-ink substrate. The grain noise comes
/// from an unseeded generator, so repeated runs on the same input differ
/// bit-for-bit.
pub fn epaper_effect(img: &RgbaImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    let w = width as usize;
    let h = height as usize;

    // Luminance pass (ITU-R BT.601 weights).
    let mut gray = vec![0.0f64; w * h];
    for (x, y, pixel) in img.enumerate_pixels() {
        let Rgba([r, g, b, _]) = *pixel;
        gray[y as usize * w + x as usize] =
            0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    }

    // Quantization pass: Floyd-Steinberg error diffusion down to 16 levels,
    // grain noise, then the warm substrate tint.
    let mut errors = vec![0.0f64; w * h];
    let mut out = RgbaImage::new(width, height);
    let mut rng = rand::thread_rng();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old = (gray[idx] + errors[idx]).clamp(0.0, 255.0);

            // 255/15 = 17: sixteen evenly spaced gray levels.
            let quantized = (old / 17.0).round() * 17.0;

            let noise = rng.gen_range(-4.0..=4.0);
            let value = (quantized + noise).clamp(0.0, 255.0) as u8;

            out.put_pixel(x as u32, y as u32, warm_tint(value));

            // Classic kernel: east 7/16, southwest 3/16, south 5/16,
            // southeast 1/16.
            let err = old - quantized;
            if x + 1 < w {
                errors[idx + 1] += err * 7.0 / 16.0;
            }
            if y + 1 < h {
                if x > 0 {
                    errors[idx + w - 1] += err * 3.0 / 16.0;
                }
                errors[idx + w] += err * 5.0 / 16.0;
                if x + 1 < w {
                    errors[idx + w + 1] += err * 1.0 / 16.0;
                }
            }
        }
    }

    out
}

/// Map a gray value onto the warm, slightly yellow palette of an e-ink panel.
///
/// Blue drops by 12 across the board; whites above 200 pick up a proportional
/// green boost so the background reads as off-white paper rather than LCD
/// white.
fn warm_tint(value: u8) -> Rgba<u8> {
    let r = value;
    let mut g = value;
    let b = value.saturating_sub(12);

    if value > 200 {
        let strength = (f64::from(value) - 200.0) / 55.0;
        g = (f64::from(g) + strength * 8.0).min(255.0) as u8;
    }

    Rgba([r, g, b, 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn checkerboard(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 200])
            }
        })
    }

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_identity_fast_path_returns_input() {
        let raw = png_bytes(&checkerboard(4, 4));
        let out = transform(&raw, &RenderSettings::default()).unwrap();
        assert_eq!(out, raw);

        // The fast path never decodes, so even garbage passes through.
        let garbage = b"not an image".to_vec();
        assert_eq!(
            transform(&garbage, &RenderSettings::default()).unwrap(),
            garbage
        );
    }

    #[test]
    fn test_decode_failure_propagates() {
        let settings = RenderSettings {
            dark_mode: true,
            ..RenderSettings::default()
        };
        let err = transform(b"not an image", &settings).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_rotation_dimensions() {
        let raw = png_bytes(&checkerboard(6, 4));
        for (rotation, expect) in [
            (Rotation::None, (6, 4)),
            (Rotation::Cw90, (4, 6)),
            (Rotation::Cw180, (6, 4)),
            (Rotation::Cw270, (4, 6)),
        ] {
            let settings = RenderSettings {
                rotation,
                // Dark mode forces the pipeline through decode/encode even
                // for the 0-degree case.
                dark_mode: true,
                epaper_mode: false,
            };
            let out = transform(&raw, &settings).unwrap();
            let decoded = image::load_from_memory(&out).unwrap();
            assert_eq!(decoded.dimensions(), expect, "rotation {:?}", rotation);
        }
    }

    #[test]
    fn test_four_quarter_turns_reproduce_original() {
        let img = checkerboard(5, 3);
        let rotated = imageops::rotate90(&imageops::rotate90(&imageops::rotate90(
            &imageops::rotate90(&img),
        )));
        assert_eq!(img, rotated);
    }

    #[test]
    fn test_invert_is_involution_and_preserves_alpha() {
        let original = checkerboard(4, 4);
        let mut img = original.clone();
        invert(&mut img);

        for (o, i) in original.pixels().zip(img.pixels()) {
            assert_eq!(i.0[0], 255 - o.0[0]);
            assert_eq!(i.0[1], 255 - o.0[1]);
            assert_eq!(i.0[2], 255 - o.0[2]);
            assert_eq!(i.0[3], o.0[3]);
        }

        invert(&mut img);
        assert_eq!(img, original);
    }

    #[test]
    fn test_dark_mode_inverts_white_to_black() {
        let white = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let settings = RenderSettings {
            dark_mode: true,
            ..RenderSettings::default()
        };
        let out = transform(&png_bytes(&white), &settings).unwrap();
        let decoded = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_epaper_quantizes_near_16_levels() {
        // A horizontal gradient exercises the full dynamic range.
        let gradient = RgbaImage::from_fn(64, 16, |x, _| {
            let v = (x * 4) as u8;
            Rgba([v, v, v, 255])
        });
        let out = epaper_effect(&gradient);

        for pixel in out.pixels() {
            let r = f64::from(pixel.0[0]);
            // Red carries the quantized value plus noise in [-4, 4]; it must
            // sit within 4 of one of the sixteen 17-spaced levels (modulo
            // clamping at the range ends).
            let nearest = (r / 17.0).round() * 17.0;
            let distance = (r - nearest.clamp(0.0, 255.0)).abs();
            assert!(
                distance <= 4.0 + 1e-9 || r == 0.0 || r == 255.0,
                "value {} too far from a quantization level",
                r
            );
            // Warm tint: blue never exceeds red, alpha is opaque.
            assert!(pixel.0[2] <= pixel.0[0]);
            assert_eq!(pixel.0[3], 255);
        }
    }

    #[test]
    fn test_epaper_tint_reduces_blue() {
        let white = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
        let out = epaper_effect(&white);
        let pixel = out.get_pixel(4, 4);
        assert!(pixel.0[2] < pixel.0[0], "blue should be warm-shifted down");
    }
}
