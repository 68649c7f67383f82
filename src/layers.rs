//! Cluster-to-palette assignment and layer compositing.

use image::{Rgba, RgbaImage, RgbImage};
use log::debug;

use crate::cluster::Clustering;
use crate::colors::Palette;
use crate::config::AlphaDerivation;
use crate::distance::nearest;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// Palette swatches as horizontal bands.
    Legend,
    /// Pixels assigned to one palette entry.
    Color { palette_index: usize, hex: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    kind: LayerKind,
    image: RgbaImage,
}

impl Layer {
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn name(&self) -> String {
        match &self.kind {
            LayerKind::Legend => "Legend".to_string(),
            LayerKind::Color { hex, .. } => hex.clone(),
        }
    }

    pub fn is_opaque_at(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y).0[3] != 0
    }
}

/// Legend first, then one layer per palette entry that received pixels, in
/// palette order.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerStack {
    width: u32,
    height: u32,
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.layers.iter()
    }

    /// Everything after the legend.
    pub fn color_layers(&self) -> &[Layer] {
        &self.layers[1..]
    }

    pub fn into_layers(self) -> Vec<Layer> {
        self.layers
    }

    /// Stack every layer, later over earlier.
    ///
    /// Layer pixels are either fully opaque or fully transparent, so an opaque
    /// pixel simply replaces whatever is below it.
    pub fn flatten(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for layer in &self.layers {
            for (dst, src) in out.pixels_mut().zip(layer.image.pixels()) {
                if src.0[3] != 0 {
                    *dst = *src;
                }
            }
        }
        out
    }
}

/// Which palette entry each cluster maps to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    of_cluster: Vec<usize>,
    by_entry: Vec<Vec<usize>>,
}

impl Assignment {
    /// Palette index chosen for `cluster`.
    pub fn entry_of(&self, cluster: usize) -> usize {
        self.of_cluster[cluster]
    }

    /// Clusters assigned to palette entry `entry`, ascending.
    pub fn clusters_of(&self, entry: usize) -> &[usize] {
        &self.by_entry[entry]
    }
}

/// Map every centroid to its perceptually nearest palette entry.
pub fn assign(centroids: &[[u8; 3]], palette: &Palette) -> Assignment {
    let mut by_entry = vec![Vec::new(); palette.len()];
    let of_cluster = centroids
        .iter()
        .enumerate()
        .map(|(cluster, &centroid)| {
            let (idx, _) = nearest(centroid, palette);
            by_entry[idx].push(cluster);
            idx
        })
        .collect();
    Assignment {
        of_cluster,
        by_entry,
    }
}

/// Opaque palette swatches, one horizontal band per entry.
///
/// Band `i` covers rows `i*H/P .. (i+1)*H/P`, so the last band takes the
/// remainder.
pub fn legend(width: u32, height: u32, palette: &Palette) -> RgbaImage {
    let mut img = RgbaImage::new(width, height);
    let bands = palette.len() as u64;
    for (i, entry) in palette.iter().enumerate() {
        let start = (i as u64 * height as u64 / bands) as u32;
        let end = ((i as u64 + 1) * height as u64 / bands) as u32;
        let [r, g, b] = entry.rgb();
        for y in start..end {
            for x in 0..width {
                img.put_pixel(x, y, Rgba([r, g, b, 255]));
            }
        }
    }
    img
}

/// Build the layer stack from an existing assignment.
///
/// Entries with no opaque pixel are left out of the stack.
pub fn composite(
    image: &RgbImage,
    clustering: &Clustering,
    assignment: &Assignment,
    palette: &Palette,
    alpha: AlphaDerivation,
) -> LayerStack {
    let (width, height) = image.dimensions();
    let mut layers = vec![Layer {
        kind: LayerKind::Legend,
        image: legend(width, height, palette),
    }];

    let labels = clustering.labels();
    debug_assert_eq!(
        labels.len(),
        width as usize * height as usize,
        "clustering does not match the image"
    );
    for (idx, entry) in palette.iter().enumerate() {
        let clusters = assignment.clusters_of(idx);
        if clusters.is_empty() {
            continue;
        }
        let mut selected = vec![false; clustering.len()];
        for &c in clusters {
            selected[c] = true;
        }

        let mut canvas = RgbaImage::new(width, height);
        let mut visible = false;
        for ((x, y, px), &label) in image.enumerate_pixels().zip(labels) {
            if !selected[label] {
                continue;
            }
            let [r, g, b] = px.0;
            let opaque = match alpha {
                AlphaDerivation::ColorSum => r as u16 + g as u16 + b as u16 > 0,
                AlphaDerivation::Membership => true,
            };
            if opaque {
                canvas.put_pixel(x, y, Rgba([r, g, b, 255]));
                visible = true;
            }
        }

        if !visible {
            debug!("layer {} has no visible pixels, skipped", entry.hex());
            continue;
        }
        layers.push(Layer {
            kind: LayerKind::Color {
                palette_index: idx,
                hex: entry.hex(),
            },
            image: canvas,
        });
    }

    LayerStack {
        width,
        height,
        layers,
    }
}

/// Assign clusters to palette entries and composite the layer stack.
pub fn assign_and_composite(
    image: &RgbImage,
    clustering: &Clustering,
    palette: &Palette,
    alpha: AlphaDerivation,
) -> LayerStack {
    let assignment = assign(clustering.centroids(), palette);
    composite(image, clustering, &assignment, palette, alpha)
}
