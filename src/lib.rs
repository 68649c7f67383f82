//! Split a photograph into flat color layers, one per palette color, plus a
//! legend layer showing the palette.
//!
//! Steps performed by [`run`]:
//! 1. Resolve the palette: the built-in reference colors, or dominant colors
//!    extracted from the image.
//! 2. Cluster every pixel by color with mean-shift.
//! 3. Assign each cluster to its perceptually nearest palette entry (CIEDE2000
//!    in Lab).
//! 4. Composite one RGBA layer per palette entry that received pixels, behind
//!    a legend layer.
//!
//! The resulting [`LayerStack`] can be handed to a [`LayerStackWriter`] such as
//! [`PsdWriter`].

use image::RgbImage;
use log::info;

pub mod cluster;
pub mod colors;
pub mod config;
pub mod distance;
pub mod error;
pub mod layers;
pub mod writer;

#[cfg(target_arch = "wasm32")]
mod wasm;

pub use cluster::{Clustering, cluster};
pub use colors::{Palette, PaletteEntry, build_palette};
pub use config::{AlphaDerivation, Bandwidth, Extraction, PaletteSource, SeparationConfig};
pub use distance::{distance, nearest};
pub use error::{Error, Result};
pub use layers::{Layer, LayerKind, LayerStack, assign_and_composite};
pub use writer::{DEFAULT_DPI, LayerStackWriter, PsdWriter, encode_psd};

/// A finished separation together with the palette it was built against.
#[derive(Clone, Debug, PartialEq)]
pub struct Separation {
    pub palette: Palette,
    pub stack: LayerStack,
}

/// Separate `image` into a layer stack.
///
/// Fails fast on an empty image, an invalid bandwidth or color count, or a
/// clustering that finds nothing; no partial stack is returned.
pub fn run(image: &RgbImage, config: &SeparationConfig) -> Result<LayerStack> {
    separate(image, config).map(|s| s.stack)
}

/// Like [`run`], but also returns the resolved palette.
pub fn separate(image: &RgbImage, config: &SeparationConfig) -> Result<Separation> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::EmptyInput { width, height });
    }
    let bandwidth = config.bandwidth.validated()?;

    let palette = build_palette(image, &config.palette)?;
    let clustering = cluster(image, bandwidth)?;
    let stack = assign_and_composite(image, &clustering, &palette, config.alpha);

    info!(
        "{}x{}: {} palette colors, {} clusters, {} layers",
        width,
        height,
        palette.len(),
        clustering.len(),
        stack.len()
    );
    Ok(Separation { palette, stack })
}

/// Decode an encoded image (any format `image` can read) and separate it.
pub fn separate_encoded(input: &[u8], config: &SeparationConfig) -> Result<Separation> {
    let img = image::load_from_memory(input)?;
    separate(&img.to_rgb8(), config)
}

/// Decode, separate and encode the stack as PSD.
///
/// Returns the document bytes and the hex keys of the palette that was used,
/// in legend order.
pub fn separate_bytes(
    input: &[u8],
    config: &SeparationConfig,
    dpi: u32,
) -> Result<(Vec<u8>, Vec<String>)> {
    let separation = separate_encoded(input, config)?;
    Ok((
        encode_psd(&separation.stack, dpi),
        separation.palette.hex_keys(),
    ))
}
