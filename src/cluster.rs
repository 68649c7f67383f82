//! Mean-shift clustering of pixels by color.
//!
//! Only color takes part in the feature space, so scattered regions of the
//! same hue end up in one cluster. The search runs on the color histogram
//! with each distinct color weighted by its pixel count; with a flat kernel
//! this gives the same modes as shifting over every pixel.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use image::RgbImage;
use log::debug;

use crate::error::{Error, Result};

const MAX_ITER: usize = 300;
/// A seed has converged once it moves less than this fraction of the bandwidth.
const STOP_FRACTION: f64 = 1e-3;

/// Cluster membership for every pixel of an image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clustering {
    width: u32,
    labels: Vec<usize>,
    centroids: Vec<[u8; 3]>,
}

impl Clustering {
    /// One label per pixel, row-major.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Mean member color per label, truncated to integers.
    pub fn centroids(&self) -> &[[u8; 3]] {
        &self.centroids
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Positions `(row, col)` of the pixels carrying `label`.
    pub fn members(&self, label: usize) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width as usize;
        self.labels
            .iter()
            .enumerate()
            .filter(move |(_, l)| **l == label)
            .map(move |(i, _)| ((i / width) as u32, (i % width) as u32))
    }
}

#[derive(Clone, Copy)]
struct WeightedColor {
    rgb: [u8; 3],
    point: [f64; 3],
    weight: u64,
}

#[derive(Clone, Copy)]
struct Mode {
    center: [f64; 3],
    support: u64,
}

#[inline]
fn dist_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let d2 = a[2] - b[2];
    d0 * d0 + d1 * d1 + d2 * d2
}

#[inline]
fn to_point(rgb: [u8; 3]) -> [f64; 3] {
    [rgb[0] as f64, rgb[1] as f64, rgb[2] as f64]
}

/// Distinct colors with their pixel counts, in a stable order.
fn color_histogram(image: &RgbImage) -> Vec<WeightedColor> {
    let mut counts: BTreeMap<[u8; 3], u64> = BTreeMap::new();
    for p in image.pixels() {
        *counts.entry(p.0).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(rgb, weight)| WeightedColor {
            rgb,
            point: to_point(rgb),
            weight,
        })
        .collect()
}

/// Seed candidates from a grid with cell size `bandwidth`.
///
/// Falls back to the colors themselves when binning would not reduce the
/// number of seeds below the pixel count.
fn bin_seeds(colors: &[WeightedColor], pixel_count: u64, bandwidth: f64) -> Vec<[f64; 3]> {
    let mut bins: BTreeMap<[i64; 3], u64> = BTreeMap::new();
    for c in colors {
        let key = [
            (c.point[0] / bandwidth).round_ties_even() as i64,
            (c.point[1] / bandwidth).round_ties_even() as i64,
            (c.point[2] / bandwidth).round_ties_even() as i64,
        ];
        *bins.entry(key).or_insert(0) += c.weight;
    }

    if bins.len() as u64 == pixel_count {
        return colors.iter().map(|c| c.point).collect();
    }
    bins.keys()
        .map(|k| {
            [
                k[0] as f64 * bandwidth,
                k[1] as f64 * bandwidth,
                k[2] as f64 * bandwidth,
            ]
        })
        .collect()
}

/// Shift one seed uphill until it settles. `None` if the kernel around the
/// seed is empty.
fn climb(seed: [f64; 3], colors: &[WeightedColor], bandwidth: f64) -> Option<Mode> {
    let radius_sq = bandwidth * bandwidth;
    let stop = STOP_FRACTION * bandwidth;
    let mut mean = seed;

    for iter in 1..=MAX_ITER {
        let mut sum = [0.0f64; 3];
        let mut support = 0u64;
        for c in colors {
            if dist_sq(c.point, mean) <= radius_sq {
                let w = c.weight as f64;
                sum[0] += c.point[0] * w;
                sum[1] += c.point[1] * w;
                sum[2] += c.point[2] * w;
                support += c.weight;
            }
        }
        if support == 0 {
            return None;
        }

        let previous = mean;
        let n = support as f64;
        mean = [sum[0] / n, sum[1] / n, sum[2] / n];
        if dist_sq(mean, previous).sqrt() <= stop || iter == MAX_ITER {
            return Some(Mode {
                center: mean,
                support,
            });
        }
    }
    None
}

fn compare_modes(a: &Mode, b: &Mode) -> Ordering {
    a.support
        .cmp(&b.support)
        .then_with(|| a.center[0].total_cmp(&b.center[0]))
        .then_with(|| a.center[1].total_cmp(&b.center[1]))
        .then_with(|| a.center[2].total_cmp(&b.center[2]))
}

/// Strongest modes first; a mode within `bandwidth` of a stronger survivor
/// is dropped.
fn suppress_near_duplicates(mut modes: Vec<Mode>, bandwidth: f64) -> Vec<[f64; 3]> {
    modes.sort_by(|a, b| compare_modes(b, a));
    modes.dedup_by(|a, b| a.center == b.center);

    let radius_sq = bandwidth * bandwidth;
    let mut keep = vec![true; modes.len()];
    for i in 0..modes.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..modes.len() {
            if dist_sq(modes[i].center, modes[j].center) <= radius_sq {
                keep[j] = false;
            }
        }
    }

    modes
        .into_iter()
        .zip(keep)
        .filter_map(|(m, k)| k.then_some(m.center))
        .collect()
}

fn nearest_center(point: [f64; 3], centers: &[[f64; 3]]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = dist_sq(point, *c);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Group the pixels of `image` by color similarity.
///
/// `bandwidth` is the flat kernel radius in RGB units: larger values merge
/// more colors into fewer clusters. Every pixel receives exactly one label,
/// and every label has at least one member.
pub fn cluster(image: &RgbImage, bandwidth: f64) -> Result<Clustering> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::EmptyInput { width, height });
    }
    if !(bandwidth.is_finite() && bandwidth > 0.0) {
        return Err(Error::InvalidBandwidth(bandwidth));
    }

    let pixel_count = width as u64 * height as u64;
    let colors = color_histogram(image);
    let seeds = bin_seeds(&colors, pixel_count, bandwidth);
    debug!(
        "mean-shift: {} pixels, {} distinct colors, {} seeds",
        pixel_count,
        colors.len(),
        seeds.len()
    );

    let modes: Vec<Mode> = seeds
        .into_iter()
        .filter_map(|seed| climb(seed, &colors, bandwidth))
        .collect();
    let centers = suppress_near_duplicates(modes, bandwidth);
    if centers.is_empty() {
        return Err(Error::DegenerateCluster {
            pixels: pixel_count as usize,
            bandwidth,
        });
    }

    // Label each distinct color, then drop centers nobody chose.
    let raw: Vec<usize> = colors
        .iter()
        .map(|c| nearest_center(c.point, &centers))
        .collect();
    let mut sums = vec![[0u64; 3]; centers.len()];
    let mut counts = vec![0u64; centers.len()];
    for (c, &label) in colors.iter().zip(&raw) {
        counts[label] += c.weight;
        for ch in 0..3 {
            sums[label][ch] += c.rgb[ch] as u64 * c.weight;
        }
    }

    let mut compact = vec![usize::MAX; centers.len()];
    let mut centroids = Vec::new();
    for (i, &n) in counts.iter().enumerate() {
        if n == 0 {
            continue;
        }
        compact[i] = centroids.len();
        centroids.push([
            (sums[i][0] / n) as u8,
            (sums[i][1] / n) as u8,
            (sums[i][2] / n) as u8,
        ]);
    }

    let by_color: HashMap<[u8; 3], usize> = colors
        .iter()
        .zip(&raw)
        .map(|(c, &label)| (c.rgb, compact[label]))
        .collect();
    let mut labels = Vec::with_capacity(pixel_count as usize);
    for p in image.pixels() {
        match by_color.get(&p.0) {
            Some(&label) => labels.push(label),
            None => {
                return Err(Error::DegenerateCluster {
                    pixels: pixel_count as usize,
                    bandwidth,
                });
            }
        }
    }

    debug!("mean-shift: {} clusters", centroids.len());
    Ok(Clustering {
        width,
        labels,
        centroids,
    })
}
