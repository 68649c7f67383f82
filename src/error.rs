//! Error type shared by every stage of the separation pipeline.
//!
//! Each variant names the stage it comes from and the parameter that caused
//! it, so a caller can surface the message verbatim.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The source image has no pixels.
    #[error("clustering: empty input image ({width}x{height})")]
    EmptyInput { width: u32, height: u32 },

    /// Mean-shift found no mode for a non-empty image.
    #[error("clustering: no clusters found for {pixels} pixels at bandwidth {bandwidth}")]
    DegenerateCluster { pixels: usize, bandwidth: f64 },

    /// Dynamic extraction could not distinguish as many colors as requested.
    ///
    /// The pipeline degrades to the smaller palette; this value only carries
    /// the warning message.
    #[error("palette: requested {requested} colors, image yields {available}")]
    PaletteExhaustion { requested: usize, available: usize },

    #[error("clustering: bandwidth must be a positive finite number, got {0}")]
    InvalidBandwidth(f64),

    #[error("palette: color count must be within 1..=255, got {0}")]
    InvalidColorCount(usize),

    #[error("palette: invalid hex color {0:?}")]
    InvalidPaletteColor(String),

    #[error("palette: no entries")]
    EmptyPalette,

    /// I/O failure while serializing the layer stack.
    #[error("writer: failed on {layer}: {source}")]
    Writer {
        layer: String,
        #[source]
        source: io::Error,
    },

    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn writer(layer: impl Into<String>, source: io::Error) -> Self {
        Error::Writer {
            layer: layer.into(),
            source,
        }
    }
}
