/// Skin layout normalisation
///
/// Old 64x32 skins have no separate left limbs and no second layer for the
/// body. The renderer only draws 64x64 skins, so legacy ones are expanded by
/// mirroring the right limbs into the left limb slots, and the opaque layers
/// get their alpha forced on.
use crate::error::{EngineError, EngineResult};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

/// (src x, src y, dx, dy, width, height) of each mirrored limb face
const LIMB_COPIES: [(u32, u32, i32, i32, u32, u32); 12] = [
    (4, 16, 16, 32, 4, 4),
    (8, 16, 16, 32, 4, 4),
    (0, 20, 24, 32, 4, 12),
    (4, 20, 16, 32, 4, 12),
    (8, 20, 8, 32, 4, 12),
    (12, 20, 16, 32, 4, 12),
    (44, 16, -8, 32, 4, 4),
    (48, 16, -8, 32, 4, 4),
    (40, 20, 0, 32, 4, 12),
    (44, 20, -8, 32, 4, 12),
    (48, 20, -16, 32, 4, 12),
    (52, 20, -8, 32, 4, 12),
];

/// Bring a 64x32 or 64x64 skin into the 64x64 layout the renderer draws
pub fn process_skin(source: &RgbaImage) -> RgbaImage {
    let legacy = source.height() == 32;
    let mut skin = RgbaImage::new(64, 64);
    image::imageops::replace(&mut skin, source, 0, 0);

    if legacy {
        for &(x, y, dx, dy, width, height) in &LIMB_COPIES {
            copy_mirrored(&mut skin, x, y, dx, dy, width, height);
        }
    }

    set_no_alpha(&mut skin, 0, 0, 32, 16);
    if legacy {
        clear_opaque_overlay(&mut skin, 32, 0, 64, 32);
    }
    set_no_alpha(&mut skin, 0, 16, 64, 32);
    set_no_alpha(&mut skin, 16, 48, 48, 64);
    skin
}

/// Decode, normalise and re-encode skin PNG bytes
pub fn normalize_skin_png(data: &[u8]) -> EngineResult<Vec<u8>> {
    let source = image::load_from_memory_with_format(data, ImageFormat::Png)
        .map_err(|e| EngineError::TextureStorage(format!("Invalid skin PNG: {}", e)))?
        .to_rgba8();

    let mut bytes = Vec::new();
    process_skin(&source)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| EngineError::TextureStorage(format!("Failed to encode skin: {}", e)))?;
    Ok(bytes)
}

fn copy_mirrored(skin: &mut RgbaImage, x: u32, y: u32, dx: i32, dy: i32, width: u32, height: u32) {
    for row in 0..height {
        for col in 0..width {
            let pixel = *skin.get_pixel(x + col, y + row);
            let target_x = (x + width - 1 - col) as i32 + dx;
            let target_y = (y + row) as i32 + dy;
            skin.put_pixel(target_x as u32, target_y as u32, pixel);
        }
    }
}

fn set_no_alpha(skin: &mut RgbaImage, min_x: u32, min_y: u32, max_x: u32, max_y: u32) {
    for y in min_y..max_y {
        for x in min_x..max_x {
            skin.get_pixel_mut(x, y).0[3] = 0xff;
        }
    }
}

/// Legacy skins often fill the hat layer with an opaque colour. If no pixel
/// in the region is see-through, the whole layer is treated as unused.
fn clear_opaque_overlay(skin: &mut RgbaImage, min_x: u32, min_y: u32, max_x: u32, max_y: u32) {
    for y in min_y..max_y {
        for x in min_x..max_x {
            if skin.get_pixel(x, y).0[3] < 128 {
                return;
            }
        }
    }

    for y in min_y..max_y {
        for x in min_x..max_x {
            skin.get_pixel_mut(x, y).0[3] = 0;
        }
    }
}
