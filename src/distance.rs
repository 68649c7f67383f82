use palette::color_difference::Ciede2000;
use palette::{IntoColor, Lab, LinSrgb, Srgb};

use crate::colors::{Palette, PaletteEntry};

/// Convert an 8-bit sRGB triple into CIE L*a*b* (D65).
#[inline]
pub fn to_lab(rgb: [u8; 3]) -> Lab {
    let linear: LinSrgb<f32> = Srgb::new(rgb[0], rgb[1], rgb[2])
        .into_format::<f32>()
        .into_linear();
    linear.into_color()
}

/// Convert a Lab color back into 8-bit sRGB.
#[inline]
pub fn from_lab(lab: Lab) -> [u8; 3] {
    let linear: LinSrgb<f32> = lab.into_color();
    let rgb_f32: Srgb<f32> = Srgb::from_linear(linear);
    let c: Srgb<u8> = rgb_f32.into_format::<u8>();
    [c.red, c.green, c.blue]
}

/// CIEDE2000 difference between two colors already in Lab.
#[inline]
pub fn delta_e(a: Lab, b: Lab) -> f32 {
    a.difference(b)
}

/// Perceptual distance (ΔE00) between two 8-bit sRGB colors.
pub fn distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    delta_e(to_lab(a), to_lab(b))
}

/// Find the palette entry perceptually closest to `target`.
///
/// Scans the palette in order and only replaces the running best on a strict
/// improvement, so the earliest entry wins ties.
pub fn nearest(target: [u8; 3], palette: &Palette) -> (usize, &PaletteEntry) {
    let target_lab = to_lab(target);
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;

    for (idx, entry) in palette.iter().enumerate() {
        let dist = delta_e(target_lab, entry.lab());
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }

    (best_idx, &palette[best_idx])
}
