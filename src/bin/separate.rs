use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use image_to_color_layers::{
    AlphaDerivation, Bandwidth, Extraction, LayerStackWriter, Palette, PaletteSource, PsdWriter,
    SeparationConfig, DEFAULT_DPI, separate,
};
use anyhow::Context;
use anyhow::Result;
use serde_json::json;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Method {
    MedianCut,
    Kmeans,
}

impl From<Method> for Extraction {
    fn from(m: Method) -> Self {
        match m {
            Method::MedianCut => Extraction::MedianCut,
            Method::Kmeans => Extraction::KMeans,
        }
    }
}

/// Split photographs into palette color layers stacked in a PSD file.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Extract the palette from each image instead of using the reference colors
    #[arg(long)]
    dynamic: bool,

    /// Number of colors to extract with --dynamic
    #[arg(short = 'k', long, default_value_t = 8)]
    n_colors: usize,

    /// Dominant-color algorithm for --dynamic
    #[arg(long, value_enum, default_value_t = Method::MedianCut)]
    method: Method,

    /// Comma-separated list of hex colors to use as palette (overrides --dynamic)
    #[arg(short = 'c', long)]
    palette: Option<String>,

    /// Mean-shift kernel radius in RGB units (default 25)
    #[arg(short, long)]
    bandwidth: Option<f64>,

    /// Keep pure black pixels opaque in their layer
    #[arg(long)]
    membership_alpha: bool,

    /// Resolution written into the document
    #[arg(long, default_value_t = DEFAULT_DPI)]
    dpi: u32,

    /// Output directory (defaults to the input's directory)
    #[arg(short = 'd', long)]
    out_dir: Option<PathBuf>,

    /// Also save every layer as a PNG into this directory
    #[arg(short = 'l', long)]
    layers_dir: Option<PathBuf>,

    /// Print a JSON summary per input
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let palette = match &args.palette {
        Some(list) => {
            let hexes: Vec<&str> = list.split(',').map(str::trim).collect();
            PaletteSource::Fixed(Palette::from_hex(&hexes).context("invalid --palette")?)
        }
        None if args.dynamic => PaletteSource::Dynamic {
            num_colors: args.n_colors,
            method: args.method.into(),
        },
        None => PaletteSource::default(),
    };
    let config = SeparationConfig {
        palette,
        bandwidth: args.bandwidth.map_or(Bandwidth::Fixed, Bandwidth::Custom),
        alpha: if args.membership_alpha {
            AlphaDerivation::Membership
        } else {
            AlphaDerivation::ColorSum
        },
    };

    for input in &args.inputs {
        let img = image::open(input)
            .with_context(|| format!("failed to open {}", input.display()))?
            .to_rgb8();
        let separation = separate(&img, &config)
            .with_context(|| format!("separation failed for {}", input.display()))?;
        if let PaletteSource::Dynamic { num_colors, .. } = &config.palette {
            if separation.palette.len() < *num_colors {
                eprintln!(
                    "{}: only {} of {} colors could be extracted",
                    input.display(),
                    separation.palette.len(),
                    num_colors
                );
            }
        }

        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let out_path = match &args.out_dir {
            Some(dir) => dir.join(format!("{stem}.psd")),
            None => input.with_extension("psd"),
        };
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = PsdWriter::new(&out_path);
        if let Some(dir) = &args.layers_dir {
            writer = writer.with_layers_dir(dir.join(&*stem));
        }
        writer.write(&separation.stack, args.dpi)?;

        if args.json {
            let layers: Vec<String> = separation.stack.iter().map(|l| l.name()).collect();
            let summary = json!({
                "input": input.display().to_string(),
                "output": out_path.display().to_string(),
                "palette": separation.palette.hex_keys(),
                "layers": layers,
                "dpi": args.dpi,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!(
                "Saved {} layers → {}",
                separation.stack.len(),
                out_path.display()
            );
        }
    }

    Ok(())
}
