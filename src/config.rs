use crate::colors::Palette;
use crate::error::{Error, Result};

/// Kernel radius used when the caller does not pick one.
pub const DEFAULT_BANDWIDTH: f64 = 25.0;

/// Mean-shift kernel radius in 0-255 RGB units.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Bandwidth {
    /// [`DEFAULT_BANDWIDTH`].
    #[default]
    Fixed,
    /// Caller-chosen radius. Smaller values give more layers.
    Custom(f64),
}

impl Bandwidth {
    pub fn value(self) -> f64 {
        match self {
            Bandwidth::Fixed => DEFAULT_BANDWIDTH,
            Bandwidth::Custom(v) => v,
        }
    }

    /// The radius, rejected unless positive and finite.
    pub fn validated(self) -> Result<f64> {
        let v = self.value();
        if v.is_finite() && v > 0.0 {
            Ok(v)
        } else {
            Err(Error::InvalidBandwidth(v))
        }
    }
}

/// Dominant-color algorithm for dynamic palettes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Extraction {
    /// Modified median cut over a reduced RGB histogram.
    #[default]
    MedianCut,
    /// K-means in Lab with a fixed seed.
    KMeans,
}

/// Where the reference palette comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum PaletteSource {
    Fixed(Palette),
    /// Extract `num_colors` dominant colors from the image itself.
    Dynamic { num_colors: usize, method: Extraction },
}

impl Default for PaletteSource {
    fn default() -> Self {
        PaletteSource::Fixed(Palette::reference())
    }
}

/// How a color layer decides which pixels are opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AlphaDerivation {
    /// Opaque wherever the copied RGB is non-zero. Pure black members end up
    /// transparent, matching the historical output.
    #[default]
    ColorSum,
    /// Opaque exactly where a member pixel was copied.
    Membership,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct SeparationConfig {
    pub palette: PaletteSource,
    pub bandwidth: Bandwidth,
    pub alpha: AlphaDerivation,
}

impl SeparationConfig {
    /// Build the configuration from the plain run parameters.
    ///
    /// `num_colors` is only read when `dynamic` is set; `bandwidth` of `None`
    /// selects [`Bandwidth::Fixed`].
    pub fn new(dynamic: bool, num_colors: usize, bandwidth: Option<f64>) -> Self {
        let palette = if dynamic {
            PaletteSource::Dynamic {
                num_colors,
                method: Extraction::default(),
            }
        } else {
            PaletteSource::default()
        };
        Self {
            palette,
            bandwidth: bandwidth.map_or(Bandwidth::Fixed, Bandwidth::Custom),
            alpha: AlphaDerivation::default(),
        }
    }
}
