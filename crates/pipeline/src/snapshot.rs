use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;

use crate::resources::{ImageFormat, ImageTarget};
use crate::software::{encode_rgba8, Texel};

/// Converts tightly packed image bytes to 8-bit RGBA.
pub fn to_rgba8(target: &ImageTarget, bytes: &[u8]) -> Vec<u8> {
    match target.format {
        ImageFormat::Rgba8Unorm => bytes.to_vec(),
        ImageFormat::Rgba32Float => {
            let texels: Vec<Texel> = bytes
                .chunks_exact(16)
                .map(bytemuck::pod_read_unaligned::<Texel>)
                .collect();
            encode_rgba8(&texels)
        }
    }
}

/// Writes an image as PNG the way the display stage shows it: texel row 0 at
/// the bottom.
pub fn save_png(path: &Path, target: &ImageTarget, bytes: &[u8]) -> Result<()> {
    let mut image = RgbaImage::from_raw(target.width, target.height, to_rgba8(target, bytes))
        .context("image bytes do not match the target dimensions")?;
    flip_vertical_in_place(&mut image);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to write snapshot to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn float_images_are_quantized() {
        let target = ImageTarget::new(1, 1, ImageFormat::Rgba32Float);
        let bytes = bytemuck::bytes_of(&[1.0f32, 0.2, 0.0, 2.0]).to_vec();
        assert_eq!(to_rgba8(&target, &bytes), vec![255, 51, 0, 255]);
    }

    #[test]
    fn saved_png_puts_row_zero_at_the_bottom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/rows.png");
        let target = ImageTarget::new(1, 2, ImageFormat::Rgba8Unorm);
        let bytes = [255, 0, 0, 255, 0, 0, 255, 255];
        save_png(&path, &target, &bytes).expect("save");

        let loaded = image::open(&path).expect("open").to_rgba8();
        assert_eq!(loaded.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(loaded.get_pixel(0, 1).0, [255, 0, 0, 255]);
    }
}
