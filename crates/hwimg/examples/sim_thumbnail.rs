use std::{io::Cursor, sync::Arc};

use hwimg::prelude::*;
use hwimg_component::sim::{SimBackend, SimFaults, SimGraphics};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = std::env::temp_dir().join(format!("hwimg-sim-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let source = dir.join("sunset.jpg");
    let picture = RgbImage::from_fn(1600, 900, |x, y| {
        Rgb([(x * 255 / 1600) as u8, (y * 255 / 900) as u8, 96])
    });
    let mut jpeg = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut jpeg, 90).encode_image(&picture)?;
    std::fs::write(&source, jpeg.into_inner())?;

    let graphics = SimGraphics::new();
    let backend = Arc::new(SimBackend::with_graphics(graphics.clone(), SimFaults::default()));
    let config = HwimgConfig::from_env();

    let thumbs = Thumbnailer::new(backend.clone(), config);
    let thumb = thumbs.create_thumb(&source, 320, 320, dir.join("sunset.tbn.jpg"))?;
    println!(
        "thumbnail {}x{} ({} bytes) in {}",
        thumb.width,
        thumb.height,
        thumb.bytes,
        dir.display()
    );

    let textures = ImageSubsystem::new(backend.clone(), Arc::new(graphics), config);
    textures.initialize()?;
    let file = thumbs.load(&source)?;
    let (width, height) = thumbs.target_size(&file, 640, 360);
    let handle = textures.decode_to_texture(&file, width, height)?;
    if let Some(info) = textures.texture_info(handle) {
        println!(
            "{handle}: {} {}x{} from {}",
            info.texture,
            info.width,
            info.height,
            info.filename.display()
        );
    }
    textures.destroy_texture(handle)?;
    textures.deinitialize()?;

    println!("components created: {}", backend.components_created());
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
