use std::io::Cursor;

use image::{ColorType, DynamicImage, GenericImageView, ImageOutputFormat};

use crate::models::{CoreError, CoreResult};

/// Padding added around each face box before cropping.
pub const FACE_PADDING: i32 = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct ImageInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub mode: String,
}

pub fn load(bytes: &[u8]) -> CoreResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|error| CoreError::invalid_input(error.to_string()))
}

pub fn inspect(bytes: &[u8]) -> CoreResult<ImageInfo> {
    let format = image::guess_format(bytes)
        .map_err(|error| CoreError::invalid_input(error.to_string()))?;
    let decoded = load(bytes)?;
    let (width, height) = decoded.dimensions();
    Ok(ImageInfo {
        format: format!("{format:?}").to_ascii_uppercase(),
        width,
        height,
        mode: color_mode(decoded.color()),
    })
}

fn color_mode(color: ColorType) -> String {
    match color {
        ColorType::L8 | ColorType::L16 => "L".to_string(),
        ColorType::La8 | ColorType::La16 => "LA".to_string(),
        ColorType::Rgb8 | ColorType::Rgb16 => "RGB".to_string(),
        ColorType::Rgba8 | ColorType::Rgba16 => "RGBA".to_string(),
        other => format!("{other:?}"),
    }
}

/// Crops `(x, y, width, height)` grown by `padding` and clamped to the image,
/// returning PNG bytes. Boxes that clamp to nothing yield `None`.
pub fn crop_png(
    image: &DynamicImage,
    (x, y, width, height): (i32, i32, i32, i32),
    padding: i32,
) -> CoreResult<Option<Vec<u8>>> {
    let (image_width, image_height) = image.dimensions();
    let padding = i64::from(padding);
    let left = (i64::from(x) - padding).max(0);
    let top = (i64::from(y) - padding).max(0);
    let crop_width =
        (i64::from(image_width) - left).min(i64::from(width) + 2 * padding);
    let crop_height =
        (i64::from(image_height) - top).min(i64::from(height) + 2 * padding);
    if crop_width <= 0 || crop_height <= 0 {
        return Ok(None);
    }

    let cropped = image.crop_imm(
        left as u32,
        top as u32,
        crop_width as u32,
        crop_height as u32,
    );
    encode_png(&cropped).map(Some)
}

pub fn encode_png(image: &DynamicImage) -> CoreResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|error| CoreError::internal(format!("PNG encoding failed: {error}")))?;
    Ok(cursor.into_inner())
}
