use image::ImageFormat;
use js_sys::{Array, Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;

use crate::{SeparationConfig, encode_psd, separate_encoded};

/// Separate an encoded image into palette layers.
///
/// Returns `{ psd, palette, layers }`: the PSD document bytes, the palette as
/// hex strings, and every layer as PNG bytes in stack order.
#[wasm_bindgen]
pub fn separate(
    input: Vec<u8>,
    dynamic: bool,
    n_colors: usize,
    bandwidth: Option<f64>,
    dpi: u32,
) -> Result<Object, JsValue> {
    let config = SeparationConfig::new(dynamic, n_colors, bandwidth);
    let separation =
        separate_encoded(&input, &config).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let stack = &separation.stack;
    let psd = encode_psd(stack, dpi);
    let palette_hex = separation.palette.hex_keys();

    let layers_js = Array::new();
    for layer in stack.iter() {
        let mut buf = Vec::new();
        {
            let mut cursor = std::io::Cursor::new(&mut buf);
            layer
                .image()
                .write_to(&mut cursor, ImageFormat::Png)
                .map_err(|e| JsValue::from_str(&format!("PNG encode error: {e}")))?;
        }
        layers_js.push(&Uint8Array::from(buf.as_slice()));
    }

    let palette_js = Array::new();
    for hex in palette_hex {
        palette_js.push(&JsValue::from_str(&hex));
    }

    let result = Object::new();
    Reflect::set(&result, &JsValue::from_str("psd"), &Uint8Array::from(psd.as_slice()))?;
    Reflect::set(&result, &JsValue::from_str("palette"), &palette_js)?;
    Reflect::set(&result, &JsValue::from_str("layers"), &layers_js)?;

    Ok(result)
}
