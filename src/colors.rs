//! Reference palettes and dominant-color extraction.

use std::collections::{BTreeSet, HashSet};
use std::ops::Deref;

use image::RgbImage;
use kmeans_colors::get_kmeans;
use log::{debug, warn};
use palette::Lab;

use crate::config::{Extraction, PaletteSource};
use crate::distance::{from_lab, to_lab};
use crate::error::{Error, Result};

/// Named colors used when no palette is extracted from the image.
///
/// Order matters: it is the legend order and the layer order. The list keeps
/// the aliases (Aqua, Lime, Fuchsia) even though they repeat earlier entries.
pub const REFERENCE_COLORS: [(&str, [u8; 3]); 32] = [
    ("Red", [255, 0, 0]),
    ("Green", [0, 255, 0]),
    ("Blue", [0, 0, 255]),
    ("Yellow", [255, 255, 0]),
    ("Cyan", [0, 255, 255]),
    ("Magenta", [255, 0, 255]),
    ("Black", [0, 0, 0]),
    ("White", [255, 255, 255]),
    ("Orange", [255, 165, 0]),
    ("Purple", [128, 0, 128]),
    ("Pink", [255, 192, 203]),
    ("Brown", [165, 42, 42]),
    ("Gray", [128, 128, 128]),
    ("Light Gray", [211, 211, 211]),
    ("Dark Gray", [169, 169, 169]),
    ("Maroon", [128, 0, 0]),
    ("Navy", [0, 0, 128]),
    ("Olive", [128, 128, 0]),
    ("Teal", [0, 128, 128]),
    ("Aqua", [0, 255, 255]),
    ("Lime", [0, 255, 0]),
    ("Fuchsia", [255, 0, 255]),
    ("Silver", [192, 192, 192]),
    ("Gold", [255, 215, 0]),
    ("Indigo", [75, 0, 130]),
    ("Salmon", [250, 128, 114]),
    ("Sky Blue", [135, 206, 235]),
    ("Lavender", [230, 230, 250]),
    ("Turquoise", [64, 224, 208]),
    ("Forest Green", [34, 139, 34]),
    ("Sweet Corn", [252, 236, 138]),
    ("Carnation", [242, 74, 95]),
];

/// Largest palette dynamic extraction will produce.
pub const MAX_DYNAMIC_COLORS: usize = 255;

const KMEANS_MAX_ITER: usize = 20;
const KMEANS_CONVERGE: f32 = 1e-4;
const KMEANS_SEED: u64 = 0;

/// One reference color. The Lab value is cached because every
/// nearest-color query compares against it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteEntry {
    rgb: [u8; 3],
    lab: Lab,
}

impl PaletteEntry {
    pub fn new(rgb: [u8; 3]) -> Self {
        Self {
            rgb,
            lab: to_lab(rgb),
        }
    }

    pub fn rgb(&self) -> [u8; 3] {
        self.rgb
    }

    pub fn lab(&self) -> Lab {
        self.lab
    }

    /// Canonical key, lowercase `#rrggbb`.
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.rgb[0], self.rgb[1], self.rgb[2])
    }
}

/// Ordered, non-empty list of reference colors.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
}

impl Palette {
    pub fn from_rgb(colors: &[[u8; 3]]) -> Result<Self> {
        if colors.is_empty() {
            return Err(Error::EmptyPalette);
        }
        Ok(Self {
            entries: colors.iter().copied().map(PaletteEntry::new).collect(),
        })
    }

    /// Parse `rrggbb` strings, with or without a leading `#`.
    pub fn from_hex<S: AsRef<str>>(hexes: &[S]) -> Result<Self> {
        let colors = hexes
            .iter()
            .map(|s| parse_hex(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_rgb(&colors)
    }

    /// The built-in list of named colors.
    pub fn reference() -> Self {
        Self {
            entries: REFERENCE_COLORS
                .iter()
                .map(|(_, rgb)| PaletteEntry::new(*rgb))
                .collect(),
        }
    }

    pub fn hex_keys(&self) -> Vec<String> {
        self.entries.iter().map(PaletteEntry::hex).collect()
    }
}

impl Deref for Palette {
    type Target = [PaletteEntry];

    fn deref(&self) -> &[PaletteEntry] {
        &self.entries
    }
}

fn parse_hex(s: &str) -> Result<[u8; 3]> {
    let hex = s.trim().trim_start_matches('#');
    let invalid = || Error::InvalidPaletteColor(s.to_string());
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let r = u8::from_str_radix(&hex[0..2], 16).map_err(|_| invalid())?;
    let g = u8::from_str_radix(&hex[2..4], 16).map_err(|_| invalid())?;
    let b = u8::from_str_radix(&hex[4..6], 16).map_err(|_| invalid())?;
    Ok([r, g, b])
}

/// Resolve the palette for a run.
pub fn build_palette(image: &RgbImage, source: &PaletteSource) -> Result<Palette> {
    match source {
        PaletteSource::Fixed(palette) => Ok(palette.clone()),
        PaletteSource::Dynamic { num_colors, method } => {
            let requested = *num_colors;
            if requested == 0 || requested > MAX_DYNAMIC_COLORS {
                return Err(Error::InvalidColorCount(requested));
            }
            if image.width() == 0 || image.height() == 0 {
                return Err(Error::EmptyInput {
                    width: image.width(),
                    height: image.height(),
                });
            }

            let colors = dominant_colors(image, requested, *method);
            if colors.len() < requested {
                warn!(
                    "{}",
                    Error::PaletteExhaustion {
                        requested,
                        available: colors.len(),
                    }
                );
            }
            debug!("extracted {} colors with {:?}", colors.len(), method);
            Palette::from_rgb(&colors)
        }
    }
}

/// Extract up to `num_colors` dominant colors, most frequent first.
///
/// Returns fewer colors when the image does not contain enough distinct
/// colors for the chosen algorithm to tell apart.
pub fn dominant_colors(image: &RgbImage, num_colors: usize, method: Extraction) -> Vec<[u8; 3]> {
    if num_colors == 0 || image.width() == 0 || image.height() == 0 {
        return Vec::new();
    }
    let colors = match method {
        Extraction::MedianCut => median_cut(image, num_colors),
        Extraction::KMeans => kmeans(image, num_colors),
    };
    dedup_in_order(colors)
}

fn dedup_in_order(colors: Vec<[u8; 3]>) -> Vec<[u8; 3]> {
    let mut seen = HashSet::new();
    colors.into_iter().filter(|c| seen.insert(*c)).collect()
}

// ------------------------------------------------------------
// Modified median cut over a 5-bit-per-channel histogram
// ------------------------------------------------------------

const SIGNAL_BITS: u32 = 5;
const RIGHT_SHIFT: u32 = 8 - SIGNAL_BITS;
const SIDE: usize = 1 << SIGNAL_BITS;
const HISTOGRAM_SIZE: usize = 1 << (3 * SIGNAL_BITS);
const FRACTION_BY_POPULATION: f64 = 0.75;

#[derive(Clone, Copy, Default)]
struct Bin {
    count: u64,
    sum: [u64; 3],
}

struct Histogram {
    bins: Vec<Bin>,
}

impl Histogram {
    fn new(image: &RgbImage) -> Self {
        let mut bins = vec![Bin::default(); HISTOGRAM_SIZE];
        for p in image.pixels() {
            let bin = &mut bins[bin_index([
                p.0[0] >> RIGHT_SHIFT,
                p.0[1] >> RIGHT_SHIFT,
                p.0[2] >> RIGHT_SHIFT,
            ])];
            bin.count += 1;
            for ch in 0..3 {
                bin.sum[ch] += p.0[ch] as u64;
            }
        }
        Self { bins }
    }

    #[inline]
    fn at(&self, cell: [u8; 3]) -> &Bin {
        &self.bins[bin_index(cell)]
    }
}

#[inline]
fn bin_index(cell: [u8; 3]) -> usize {
    ((cell[0] as usize) << (2 * SIGNAL_BITS)) + ((cell[1] as usize) << SIGNAL_BITS) + cell[2] as usize
}

/// Axis-aligned box of histogram cells, bounds tightened to occupied cells.
#[derive(Clone, Debug)]
struct VBox {
    min: [u8; 3],
    max: [u8; 3],
    count: u64,
    average: [u8; 3],
}

impl VBox {
    /// Build a box over `[min, max]`, shrinking it to the occupied cells.
    /// Returns `None` if no pixel falls inside.
    fn tight(min: [u8; 3], max: [u8; 3], hist: &Histogram) -> Option<Self> {
        let mut lo = [u8::MAX; 3];
        let mut hi = [0u8; 3];
        let mut count = 0u64;
        let mut sum = [0u64; 3];

        for r in min[0]..=max[0] {
            for g in min[1]..=max[1] {
                for b in min[2]..=max[2] {
                    let bin = hist.at([r, g, b]);
                    if bin.count == 0 {
                        continue;
                    }
                    let cell = [r, g, b];
                    for ch in 0..3 {
                        lo[ch] = lo[ch].min(cell[ch]);
                        hi[ch] = hi[ch].max(cell[ch]);
                        sum[ch] += bin.sum[ch];
                    }
                    count += bin.count;
                }
            }
        }

        if count == 0 {
            return None;
        }
        let average = [
            (sum[0] / count) as u8,
            (sum[1] / count) as u8,
            (sum[2] / count) as u8,
        ];
        Some(Self {
            min: lo,
            max: hi,
            count,
            average,
        })
    }

    fn volume(&self) -> u64 {
        (0..3)
            .map(|ch| (self.max[ch] - self.min[ch]) as u64 + 1)
            .product()
    }

    fn widest_axis(&self) -> usize {
        let widths = [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ];
        if widths[0] >= widths[1] && widths[0] >= widths[2] {
            0
        } else if widths[1] >= widths[2] {
            1
        } else {
            2
        }
    }

    fn can_split(&self) -> bool {
        self.min != self.max
    }

    /// Cut along the widest axis near the population median.
    fn split(&self, hist: &Histogram) -> Option<(VBox, VBox)> {
        if !self.can_split() {
            return None;
        }
        let axis = self.widest_axis();
        let lo = self.min[axis] as usize;
        let hi = self.max[axis] as usize;

        let mut partial = [0u64; SIDE];
        let mut total = 0u64;
        for slice in lo..=hi {
            let mut lower = self.min;
            let mut upper = self.max;
            lower[axis] = slice as u8;
            upper[axis] = slice as u8;
            for r in lower[0]..=upper[0] {
                for g in lower[1]..=upper[1] {
                    for b in lower[2]..=upper[2] {
                        total += hist.at([r, g, b]).count;
                    }
                }
            }
            partial[slice] = total;
        }

        let median = (lo..=hi).find(|&i| partial[i] > total / 2)?;
        let left = median - lo;
        let right = hi - median;
        let mut cut = if left <= right {
            (hi - 1).min(median + right / 2)
        } else {
            lo.max((median as f64 - 1.0 - left as f64 / 2.0).max(0.0) as usize)
        };
        while cut < hi - 1 && partial[cut] == 0 {
            cut += 1;
        }
        while cut > lo && total - partial[cut] == 0 && partial[cut - 1] > 0 {
            cut -= 1;
        }

        let mut first_max = self.max;
        first_max[axis] = cut as u8;
        let mut second_min = self.min;
        second_min[axis] = cut as u8 + 1;

        let first = VBox::tight(self.min, first_max, hist)?;
        let second = VBox::tight(second_min, self.max, hist)?;
        Some((first, second))
    }
}

/// Keep splitting the highest-priority splittable box until `target` boxes
/// exist or nothing can be split.
fn split_until<F>(boxes: &mut Vec<VBox>, target: usize, hist: &Histogram, priority: F)
where
    F: Fn(&VBox) -> u64,
{
    while boxes.len() < target {
        let mut best: Option<usize> = None;
        for (i, b) in boxes.iter().enumerate() {
            if !b.can_split() {
                continue;
            }
            match best {
                Some(j) if priority(&boxes[j]) >= priority(b) => {}
                _ => best = Some(i),
            }
        }
        let Some(i) = best else { break };
        match boxes[i].split(hist) {
            Some((first, second)) => {
                boxes[i] = first;
                boxes.insert(i + 1, second);
            }
            None => break,
        }
    }
}

fn median_cut(image: &RgbImage, num_colors: usize) -> Vec<[u8; 3]> {
    let hist = Histogram::new(image);
    let last = (SIDE - 1) as u8;
    let Some(root) = VBox::tight([0; 3], [last; 3], &hist) else {
        return Vec::new();
    };

    let mut boxes = vec![root];
    let by_population = (FRACTION_BY_POPULATION * num_colors as f64).ceil() as usize;
    split_until(&mut boxes, by_population, &hist, |b| b.count);
    split_until(&mut boxes, num_colors, &hist, |b| b.count * b.volume());

    boxes.sort_by(|a, b| b.count.cmp(&a.count));
    boxes.into_iter().map(|b| b.average).collect()
}

// ------------------------------------------------------------
// K-means in Lab
// ------------------------------------------------------------

fn kmeans(image: &RgbImage, num_colors: usize) -> Vec<[u8; 3]> {
    let distinct: BTreeSet<[u8; 3]> = image.pixels().map(|p| p.0).collect();
    let k = num_colors.min(distinct.len());
    if k == 0 {
        return Vec::new();
    }

    let lab_pixels: Vec<Lab> = image.pixels().map(|p| to_lab(p.0)).collect();
    let result = get_kmeans(k, KMEANS_MAX_ITER, KMEANS_CONVERGE, false, &lab_pixels, KMEANS_SEED);

    let mut counts = vec![0u64; result.centroids.len()];
    for &idx in &result.indices {
        counts[idx as usize] += 1;
    }

    let mut order: Vec<usize> = (0..result.centroids.len())
        .filter(|&i| counts[i] > 0)
        .collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));
    order
        .into_iter()
        .map(|i| from_lab(result.centroids[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn stripes(colors: &[([u8; 3], u32)]) -> RgbImage {
        let height: u32 = colors.iter().map(|(_, rows)| rows).sum();
        let mut rows = Vec::new();
        for (c, n) in colors {
            for _ in 0..*n {
                rows.push(*c);
            }
        }
        RgbImage::from_fn(4, height, |_, y| Rgb(rows[y as usize]))
    }

    #[test]
    fn reference_palette_keeps_order_and_aliases() {
        let p = Palette::reference();
        assert_eq!(p.len(), 32);
        assert_eq!(p[0].hex(), "#ff0000");
        assert_eq!(p[31].hex(), "#f24a5f");
        assert_eq!(p[4].rgb(), p[19].rgb());
    }

    #[test]
    fn hex_parsing() {
        let p = Palette::from_hex(&["#FF8000", "00ff00"]).unwrap();
        assert_eq!(p[0].rgb(), [255, 128, 0]);
        assert_eq!(p.hex_keys(), vec!["#ff8000", "#00ff00"]);
        assert!(matches!(
            Palette::from_hex(&["#12345"]),
            Err(Error::InvalidPaletteColor(_))
        ));
        assert!(matches!(Palette::from_rgb(&[]), Err(Error::EmptyPalette)));
    }

    #[test]
    fn median_cut_orders_by_frequency() {
        let img = stripes(&[([0, 0, 255], 2), ([255, 0, 0], 5), ([0, 200, 0], 3)]);
        let colors = dominant_colors(&img, 3, Extraction::MedianCut);
        assert_eq!(colors, vec![[255, 0, 0], [0, 200, 0], [0, 0, 255]]);
    }

    #[test]
    fn median_cut_returns_fewer_when_exhausted() {
        let img = stripes(&[([10, 10, 10], 3), ([240, 240, 240], 1)]);
        let colors = dominant_colors(&img, 6, Extraction::MedianCut);
        assert_eq!(colors, vec![[10, 10, 10], [240, 240, 240]]);
    }

    #[test]
    fn median_cut_single_color() {
        let img = RgbImage::from_pixel(5, 5, Rgb([7, 8, 9]));
        assert_eq!(dominant_colors(&img, 4, Extraction::MedianCut), vec![[7, 8, 9]]);
    }

    #[test]
    fn kmeans_extraction_respects_count() {
        let img = stripes(&[([255, 0, 0], 4), ([0, 0, 255], 2), ([0, 255, 0], 1)]);
        let colors = dominant_colors(&img, 3, Extraction::KMeans);
        assert_eq!(colors, vec![[255, 0, 0], [0, 0, 255], [0, 255, 0]]);
        let colors = dominant_colors(&img, 2, Extraction::KMeans);
        assert_eq!(colors.len(), 2);
        let colors = dominant_colors(&img, 8, Extraction::KMeans);
        assert!(colors.len() <= 3);
    }

    #[test]
    fn dynamic_palette_validates_count() {
        let img = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        let source = PaletteSource::Dynamic {
            num_colors: 0,
            method: Extraction::MedianCut,
        };
        assert!(matches!(
            build_palette(&img, &source),
            Err(Error::InvalidColorCount(0))
        ));
    }

    #[test]
    fn fixed_palette_passes_through() {
        let img = RgbImage::new(1, 1);
        let p = Palette::from_rgb(&[[1, 1, 1]]).unwrap();
        let built = build_palette(&img, &PaletteSource::Fixed(p.clone())).unwrap();
        assert_eq!(built, p);
    }
}
