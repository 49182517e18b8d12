//! Panel colour palettes and error-diffusion quantization.
//!
//! Colour e-paper panels can only show a handful of inks. Framed images are
//! reduced to the panel palette with Floyd–Steinberg dithering
//! ([`image::imageops::dither`]) so gradients survive as patterns instead of
//! posterized bands. LCD/IPS panels use [`Palette::FullColor`] and skip
//! quantization entirely.

use image::imageops::{self, ColorMap};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Inks of the six-colour (Spectra 6) panels: white, black, red, yellow, blue, green.
const SPECTRA6: [[u8; 3]; 6] = [
    [255, 255, 255],
    [0, 0, 0],
    [255, 0, 0],
    [255, 255, 0],
    [0, 0, 255],
    [0, 255, 0],
];

const BLACK_WHITE: [[u8; 3]; 2] = [[255, 255, 255], [0, 0, 0]];

/// Colour capability of the target panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Palette {
    /// Six-colour e-paper.
    Spectra6,
    /// Monochrome e-paper.
    BlackWhite,
    /// Any display that takes 24-bit colour.
    FullColor,
}

impl Palette {
    /// The inks of the palette, or `None` for full colour.
    pub fn colors(self) -> Option<&'static [[u8; 3]]> {
        match self {
            Palette::Spectra6 => Some(&SPECTRA6),
            Palette::BlackWhite => Some(&BLACK_WHITE),
            Palette::FullColor => None,
        }
    }

    /// Dither `image` in place down to the palette inks.
    pub fn quantize(self, image: &mut RgbImage) {
        if let Some(colors) = self.colors() {
            imageops::dither(image, &InkMap { colors });
        }
    }
}

/// Nearest-ink lookup used by the dithering pass.
struct InkMap {
    colors: &'static [[u8; 3]],
}

impl ColorMap for InkMap {
    type Color = Rgb<u8>;

    fn index_of(&self, color: &Rgb<u8>) -> usize {
        let [r, g, b] = color.0;
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, ink)| {
                let dr = r as i32 - ink[0] as i32;
                let dg = g as i32 - ink[1] as i32;
                let db = b as i32 - ink[2] as i32;
                dr * dr + dg * dg + db * db
            })
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn lookup(&self, index: usize) -> Option<Rgb<u8>> {
        self.colors.get(index).map(|ink| Rgb(*ink))
    }

    fn has_lookup(&self) -> bool {
        true
    }

    fn map_color(&self, color: &mut Rgb<u8>) {
        let idx = self.index_of(color);
        *color = Rgb(self.colors[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, 128])
        })
    }

    #[test]
    fn spectra6_output_uses_only_panel_inks() {
        let mut img = gradient(64, 48);
        Palette::Spectra6.quantize(&mut img);
        for pixel in img.pixels() {
            assert!(SPECTRA6.contains(&pixel.0), "unexpected colour {:?}", pixel.0);
        }
    }

    #[test]
    fn black_white_output_is_binary() {
        let mut img = gradient(32, 32);
        Palette::BlackWhite.quantize(&mut img);
        for pixel in img.pixels() {
            assert!(pixel.0 == [0, 0, 0] || pixel.0 == [255, 255, 255]);
        }
    }

    #[test]
    fn full_color_leaves_pixels_untouched() {
        let original = gradient(16, 16);
        let mut img = original.clone();
        Palette::FullColor.quantize(&mut img);
        assert_eq!(img, original);
    }

    #[test]
    fn pure_inks_map_to_themselves() {
        let map = InkMap { colors: &SPECTRA6 };
        for (idx, ink) in SPECTRA6.iter().enumerate() {
            assert_eq!(map.index_of(&Rgb(*ink)), idx);
        }
    }

    #[test]
    fn near_colour_maps_to_nearest_ink() {
        let map = InkMap { colors: &SPECTRA6 };
        assert_eq!(map.index_of(&Rgb([240, 20, 10])), 2); // red
        assert_eq!(map.index_of(&Rgb([20, 20, 30])), 1); // black
    }

    #[test]
    fn palette_names_in_config() {
        let p: Palette = serde_json::from_str(r#""full-color""#).unwrap();
        assert_eq!(p, Palette::FullColor);
        let p: Palette = serde_json::from_str(r#""spectra6""#).unwrap();
        assert_eq!(p, Palette::Spectra6);
        let p: Palette = serde_json::from_str(r#""black-white""#).unwrap();
        assert_eq!(p, Palette::BlackWhite);
    }
}
