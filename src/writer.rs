//! Serializing a [`LayerStack`] into a layered Photoshop document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use image::ImageFormat;
use log::{debug, info};

use crate::error::{Error, Result};
use crate::layers::LayerStack;

/// Resolution used when the caller has no preference.
pub const DEFAULT_DPI: u32 = 300;

const RESOLUTION_INFO_ID: u16 = 1005;
const COLOR_MODE_RGB: u16 = 3;
const DEPTH: u16 = 8;

/// Destination for a finished layer stack. Implementations must keep the
/// stack order and tag the output with `dpi`.
pub trait LayerStackWriter {
    fn write(&mut self, stack: &LayerStack, dpi: u32) -> Result<()>;
}

/// Writes a `.psd` file, optionally saving each layer as its own PNG.
#[derive(Clone, Debug)]
pub struct PsdWriter {
    output: PathBuf,
    layers_dir: Option<PathBuf>,
}

impl PsdWriter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            layers_dir: None,
        }
    }

    /// Also save every layer as `Layer_{i}.png` inside `dir`.
    pub fn with_layers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.layers_dir = Some(dir.into());
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn save_individual_layers(&self, stack: &LayerStack, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::writer("layers directory", e))?;
        for (i, layer) in stack.iter().enumerate() {
            let path = dir.join(format!("Layer_{i}.png"));
            layer
                .image()
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| Error::writer(format!("layer {i} ({})", layer.name()), io::Error::other(e)))?;
            debug!("saved {}", path.display());
        }
        Ok(())
    }
}

/// Removes a staged file unless it was committed.
struct Staged {
    path: PathBuf,
    committed: bool,
}

impl Staged {
    fn commit(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl LayerStackWriter for PsdWriter {
    fn write(&mut self, stack: &LayerStack, dpi: u32) -> Result<()> {
        let bytes = encode_psd(stack, dpi);

        let mut staged_name = self.output.as_os_str().to_owned();
        staged_name.push(".partial");
        let staged = Staged {
            path: PathBuf::from(staged_name),
            committed: false,
        };
        let mut file = fs::File::create(&staged.path).map_err(|e| Error::writer("document", e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::writer("document", e))?;
        drop(file);

        if let Some(dir) = &self.layers_dir {
            self.save_individual_layers(stack, dir)?;
        }

        staged
            .commit(&self.output)
            .map_err(|e| Error::writer("document", e))?;
        info!(
            "wrote {} layers to {} at {} dpi",
            stack.len(),
            self.output.display(),
            dpi
        );
        Ok(())
    }
}

// ------------------------------------------------------------
// PSD encoding
// ------------------------------------------------------------

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Pascal string padded so that the length byte plus text is a multiple of
/// `align`.
fn put_pascal(out: &mut Vec<u8>, s: &str, align: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(255);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
    let used = len + 1;
    out.resize(out.len() + (align - used % align) % align, 0);
}

fn resolution_resource(dpi: u32) -> Vec<u8> {
    // Fixed-point 16.16 pixels per inch, unit 1 = ppi, display unit 1 = inches.
    let fixed = dpi.min(u16::MAX as u32) << 16;
    let mut res = Vec::new();
    res.extend_from_slice(b"8BIM");
    put_u16(&mut res, RESOLUTION_INFO_ID);
    put_pascal(&mut res, "", 2);
    put_u32(&mut res, 16);
    for _ in 0..2 {
        put_u32(&mut res, fixed);
        put_u16(&mut res, 1);
        put_u16(&mut res, 1);
    }
    res
}

fn layer_info(stack: &LayerStack) -> Vec<u8> {
    let (width, height) = stack.dimensions();
    let plane = width as usize * height as usize;

    let mut info = Vec::new();
    put_u16(&mut info, stack.len() as u16);
    for layer in stack.iter() {
        for v in [0, 0, height, width] {
            put_u32(&mut info, v);
        }
        put_u16(&mut info, 4);
        for id in [0i16, 1, 2, -1] {
            info.extend_from_slice(&id.to_be_bytes());
            put_u32(&mut info, plane as u32 + 2);
        }
        info.extend_from_slice(b"8BIMnorm");
        info.extend_from_slice(&[255, 0, 0, 0]);

        let mut extra = Vec::new();
        put_u32(&mut extra, 0);
        put_u32(&mut extra, 0);
        put_pascal(&mut extra, &layer.name(), 4);
        put_u32(&mut info, extra.len() as u32);
        info.extend_from_slice(&extra);
    }

    for layer in stack.iter() {
        let raw = layer.image().as_raw();
        for channel in [0usize, 1, 2, 3] {
            put_u16(&mut info, 0);
            info.extend(raw.iter().skip(channel).step_by(4));
        }
    }

    if info.len() % 2 == 1 {
        info.push(0);
    }
    info
}

/// Encode `stack` as an 8-bit RGB Photoshop document.
///
/// The first layer of the stack becomes the bottom layer. The merged image
/// section holds the flattened stack.
pub fn encode_psd(stack: &LayerStack, dpi: u32) -> Vec<u8> {
    let (width, height) = stack.dimensions();
    let mut out = Vec::new();

    out.extend_from_slice(b"8BPS");
    put_u16(&mut out, 1);
    out.extend_from_slice(&[0u8; 6]);
    put_u16(&mut out, 3);
    put_u32(&mut out, height);
    put_u32(&mut out, width);
    put_u16(&mut out, DEPTH);
    put_u16(&mut out, COLOR_MODE_RGB);

    // color mode data
    put_u32(&mut out, 0);

    let resources = resolution_resource(dpi);
    put_u32(&mut out, resources.len() as u32);
    out.extend_from_slice(&resources);

    let info = layer_info(stack);
    put_u32(&mut out, info.len() as u32 + 4 + 4);
    put_u32(&mut out, info.len() as u32);
    out.extend_from_slice(&info);
    // global layer mask info
    put_u32(&mut out, 0);

    let flat = stack.flatten();
    let raw = flat.as_raw();
    put_u16(&mut out, 0);
    for channel in 0..3 {
        out.extend(raw.iter().skip(channel).step_by(4));
    }
    out
}
