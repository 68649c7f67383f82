use std::fs;
use std::path::PathBuf;

use image::{Rgb, RgbImage};
use image_to_color_layers::{
    AlphaDerivation, Bandwidth, Error, Extraction, LayerKind, LayerStackWriter, Palette,
    PaletteSource, PsdWriter, SeparationConfig, encode_psd, run, separate, separate_bytes,
};

fn fixed(colors: &[[u8; 3]], bandwidth: Bandwidth) -> SeparationConfig {
    SeparationConfig {
        palette: PaletteSource::Fixed(Palette::from_rgb(colors).unwrap()),
        bandwidth,
        alpha: AlphaDerivation::ColorSum,
    }
}

/// Scene with a few flat regions and some noise around each.
fn scene() -> RgbImage {
    RgbImage::from_fn(24, 18, |x, y| {
        let jitter = ((x * 7 + y * 13) % 9) as u8;
        match (x / 8, y / 9) {
            (0, _) => Rgb([230 + jitter, 20, 25]),
            (1, 0) => Rgb([20, 30 + jitter, 210]),
            (1, 1) => Rgb([240, 235, 40 + jitter]),
            _ => Rgb([30 + jitter, 160, 60]),
        }
    })
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("color-layers-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn two_color_scenario() {
    let pixels = [[255, 0, 0], [255, 0, 0], [0, 0, 255], [0, 0, 255]];
    let img = RgbImage::from_fn(2, 2, |x, y| Rgb(pixels[(y * 2 + x) as usize]));
    let stack = run(&img, &fixed(&[[255, 0, 0], [0, 0, 255]], Bandwidth::Fixed)).unwrap();

    assert_eq!(stack.len(), 3);

    let legend = stack.layers()[0].image();
    assert_eq!(stack.layers()[0].kind(), &LayerKind::Legend);
    assert_eq!(legend.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(legend.get_pixel(1, 0).0, [255, 0, 0, 255]);
    assert_eq!(legend.get_pixel(0, 1).0, [0, 0, 255, 255]);
    assert_eq!(legend.get_pixel(1, 1).0, [0, 0, 255, 255]);

    let red = &stack.layers()[1];
    assert_eq!(red.name(), "#ff0000");
    assert!(red.is_opaque_at(0, 0) && red.is_opaque_at(1, 0));
    assert!(!red.is_opaque_at(0, 1) && !red.is_opaque_at(1, 1));
    assert_eq!(red.image().get_pixel(1, 0).0, [255, 0, 0, 255]);
    assert_eq!(red.image().get_pixel(0, 1).0, [0, 0, 0, 0]);

    let blue = &stack.layers()[2];
    assert_eq!(blue.name(), "#0000ff");
    assert!(blue.is_opaque_at(0, 1) && blue.is_opaque_at(1, 1));
    assert!(!blue.is_opaque_at(0, 0) && !blue.is_opaque_at(1, 0));
}

#[test]
fn unused_palette_entry_is_omitted() {
    let img = RgbImage::from_fn(4, 4, |x, _| if x < 2 { Rgb([250, 0, 0]) } else { Rgb([0, 0, 250]) });
    let palette = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];
    let stack = run(&img, &fixed(&palette, Bandwidth::Fixed)).unwrap();

    assert_eq!(stack.len(), 3);
    let names: Vec<String> = stack.iter().map(|l| l.name()).collect();
    assert_eq!(names, vec!["Legend", "#ff0000", "#0000ff"]);
}

#[test]
fn layers_never_overlap_and_stay_bounded() {
    let img = scene();
    for bandwidth in [10.0, 25.0, 60.0] {
        let palette = Palette::reference();
        let stack = run(
            &img,
            &SeparationConfig {
                palette: PaletteSource::Fixed(palette.clone()),
                bandwidth: Bandwidth::Custom(bandwidth),
                alpha: AlphaDerivation::Membership,
            },
        )
        .unwrap();
        assert!(stack.len() <= palette.len() + 1);

        for (x, y, px) in img.enumerate_pixels() {
            let owners = stack
                .color_layers()
                .iter()
                .filter(|l| l.is_opaque_at(x, y))
                .count();
            assert_eq!(owners, 1, "pixel ({x}, {y}) at bandwidth {bandwidth}");
            let owner = stack.color_layers().iter().find(|l| l.is_opaque_at(x, y)).unwrap();
            let [r, g, b] = px.0;
            assert_eq!(owner.image().get_pixel(x, y).0, [r, g, b, 255]);
        }
    }
}

#[test]
fn legend_matches_palette_bands() {
    let img = RgbImage::from_pixel(3, 7, Rgb([120, 120, 120]));
    let colors = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];
    let stack = run(&img, &fixed(&colors, Bandwidth::Fixed)).unwrap();
    let legend = stack.layers()[0].image();
    let (h, p) = (7u32, colors.len() as u32);
    for (i, c) in colors.iter().enumerate() {
        let i = i as u32;
        for y in i * h / p..(i + 1) * h / p {
            for x in 0..3 {
                assert_eq!(legend.get_pixel(x, y).0, [c[0], c[1], c[2], 255]);
            }
        }
    }
}

#[test]
fn runs_are_idempotent() {
    let img = scene();
    let config = SeparationConfig::new(false, 0, Some(20.0));
    assert_eq!(run(&img, &config).unwrap(), run(&img, &config).unwrap());

    let dynamic = SeparationConfig::new(true, 5, None);
    assert_eq!(separate(&img, &dynamic).unwrap(), separate(&img, &dynamic).unwrap());
}

#[test]
fn dynamic_palette_follows_frequency() {
    let img = RgbImage::from_fn(10, 10, |x, _| match x {
        0..=5 => Rgb([200, 40, 40]),
        6..=8 => Rgb([40, 40, 200]),
        _ => Rgb([40, 200, 40]),
    });
    let config = SeparationConfig {
        palette: PaletteSource::Dynamic {
            num_colors: 3,
            method: Extraction::MedianCut,
        },
        ..SeparationConfig::default()
    };
    let separation = separate(&img, &config).unwrap();
    assert_eq!(
        separation.palette.hex_keys(),
        vec!["#c82828", "#2828c8", "#28c828"]
    );
    assert_eq!(separation.stack.len(), 4);
}

#[test]
fn dynamic_palette_shortfall_is_not_an_error() {
    let img = RgbImage::from_fn(6, 4, |x, _| if x < 4 { Rgb([220, 30, 30]) } else { Rgb([30, 30, 220]) });
    let config = SeparationConfig {
        palette: PaletteSource::Dynamic {
            num_colors: 6,
            method: Extraction::MedianCut,
        },
        ..SeparationConfig::default()
    };
    let separation = separate(&img, &config).unwrap();
    assert_eq!(separation.palette.hex_keys(), vec!["#dc1e1e", "#1e1edc"]);
    assert_eq!(separation.stack.len(), 3);
}

#[test]
fn failures_surface_with_context() {
    let empty = RgbImage::new(0, 0);
    let err = run(&empty, &SeparationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::EmptyInput { .. }));
    assert!(err.to_string().contains("clustering"));

    let img = RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]));
    let err = run(&img, &SeparationConfig::new(false, 0, Some(0.0))).unwrap_err();
    assert!(matches!(err, Error::InvalidBandwidth(_)));

    let err = run(&img, &SeparationConfig::new(true, 300, None)).unwrap_err();
    assert!(matches!(err, Error::InvalidColorCount(300)));
}

#[test]
fn psd_document_layout() {
    let img = RgbImage::from_fn(3, 2, |x, _| if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
    let stack = run(&img, &fixed(&[[255, 0, 0], [0, 0, 255]], Bandwidth::Fixed)).unwrap();
    let bytes = encode_psd(&stack, 300);

    assert_eq!(&bytes[0..4], b"8BPS");
    assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 1);
    assert_eq!(u32::from_be_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]), 2);
    assert_eq!(u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]), 3);

    // header 26 + color mode 4 + resources length 4 + resources 28
    let layer_section = 26 + 4 + 4 + 28;
    let layer_count = i16::from_be_bytes([bytes[layer_section + 8], bytes[layer_section + 9]]);
    assert_eq!(layer_count as usize, stack.len());

    // flattened image: red then two blue columns, both rows
    let merged = &bytes[bytes.len() - 18..];
    assert_eq!(&merged[0..6], &[255, 0, 0, 255, 0, 0]);
    assert_eq!(&merged[12..18], &[0, 255, 255, 0, 255, 255]);
}

#[test]
fn writer_saves_document_and_layers() {
    let dir = temp_dir("writer");
    let out = dir.join("scene.psd");
    let layers_dir = dir.join("layers");

    let stack = run(&scene(), &SeparationConfig::default()).unwrap();
    let mut writer = PsdWriter::new(&out).with_layers_dir(&layers_dir);
    writer.write(&stack, 150).unwrap();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(bytes, encode_psd(&stack, 150));
    assert!(!dir.join("scene.psd.partial").exists());
    for i in 0..stack.len() {
        let layer = image::open(layers_dir.join(format!("Layer_{i}.png"))).unwrap().to_rgba8();
        assert_eq!(&layer, stack.layers()[i].image());
    }
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn writer_failure_names_stage_and_cleans_up() {
    let dir = temp_dir("writer-fail");
    let out = dir.join("missing").join("out.psd");
    let stack = run(&scene(), &SeparationConfig::default()).unwrap();

    let err = PsdWriter::new(&out).write(&stack, 300).unwrap_err();
    assert!(matches!(err, Error::Writer { .. }));
    assert!(err.to_string().contains("document"));
    assert!(!out.exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn staged_document_is_removed_when_layer_saving_fails() {
    let dir = temp_dir("writer-layers-fail");
    let out = dir.join("out.psd");
    let blocker = dir.join("layers");
    fs::write(&blocker, b"not a directory").unwrap();
    let stack = run(&scene(), &SeparationConfig::default()).unwrap();

    let err = PsdWriter::new(&out)
        .with_layers_dir(&blocker)
        .write(&stack, 300)
        .unwrap_err();
    assert!(matches!(err, Error::Writer { .. }));
    assert!(err.to_string().contains("layers directory"), "{err}");
    assert!(!dir.join("out.psd.partial").exists());
    assert!(!out.exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn encoded_input_round_trip() {
    let mut png = Vec::new();
    scene()
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let (psd, palette) = separate_bytes(&png, &SeparationConfig::default(), 72).unwrap();
    assert_eq!(&psd[0..4], b"8BPS");
    assert_eq!(palette.len(), 32);
    assert_eq!(palette[0], "#ff0000");
}
