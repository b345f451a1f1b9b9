/// Group crops: cut each group's region out of the screenshot so the
/// labeling step can look at it in isolation, upscaled when tiny.
use base64::Engine as _;

use crate::errors::{SeraphineError, SeraphineResult};
use crate::perception::annotator::encode_png;
use crate::perception::layout::{Group, GroupId, GroupLayout};

pub struct GroupCrop {
    pub group_id: GroupId,
    /// PNG bytes of the (possibly upscaled) crop.
    pub image_bytes: Vec<u8>,
    pub image_base64: String,
    /// Top-left corner of the crop in the source screenshot.
    pub origin_x: u32,
    pub origin_y: u32,
    /// Size of the crop in the source screenshot, before upscaling.
    pub crop_w: u32,
    pub crop_h: u32,
    /// Size of the encoded image.
    pub out_w: u32,
    pub out_h: u32,
}

/// Crop one group with `padding_px` of context on each side, upscaled so
/// both sides are at least `min_size`.
pub fn crop_group(
    img: &image::DynamicImage,
    group_id: GroupId,
    group: &Group,
    padding_px: u32,
    min_size: u32,
) -> SeraphineResult<GroupCrop> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let pad = padding_px as i64;

    let cx1 = (group.bbox.x_min.floor() as i64 - pad).clamp(0, w);
    let cy1 = (group.bbox.y_min.floor() as i64 - pad).clamp(0, h);
    let cx2 = (group.bbox.x_max.ceil() as i64 + pad).clamp(0, w);
    let cy2 = (group.bbox.y_max.ceil() as i64 + pad).clamp(0, h);
    let cw = (cx2 - cx1).max(0) as u32;
    let ch = (cy2 - cy1).max(0) as u32;

    if cw == 0 || ch == 0 {
        return Err(SeraphineError::Perception(format!(
            "group {group_id} lies outside the {w}x{h} image"
        )));
    }

    let cropped = img.crop_imm(cx1 as u32, cy1 as u32, cw, ch);

    let scale = if cw < min_size || ch < min_size {
        let sw = min_size as f32 / cw as f32;
        let sh = min_size as f32 / ch as f32;
        sw.max(sh).max(1.0)
    } else {
        1.0
    };
    let out_w = (cw as f32 * scale).round() as u32;
    let out_h = (ch as f32 * scale).round() as u32;

    let result_img = if scale > 1.0 {
        cropped.resize_exact(out_w, out_h, image::imageops::FilterType::Lanczos3)
    } else {
        cropped
    };

    let png_bytes = encode_png(&result_img)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&png_bytes);

    Ok(GroupCrop {
        group_id,
        image_bytes: png_bytes,
        image_base64: b64,
        origin_x: cx1 as u32,
        origin_y: cy1 as u32,
        crop_w: cw,
        crop_h: ch,
        out_w,
        out_h,
    })
}

/// Crop every group of `layout` out of `src_bytes` (PNG/JPEG).
/// Groups that fall outside the image are skipped with a warning.
pub fn crop_groups(
    src_bytes: &[u8],
    layout: &GroupLayout,
    padding_px: u32,
    min_size: u32,
) -> SeraphineResult<Vec<GroupCrop>> {
    let img = image::load_from_memory(src_bytes)
        .map_err(|e| SeraphineError::Perception(format!("crop load: {e}")))?;

    let mut crops = Vec::with_capacity(layout.len());
    for (id, group) in layout.iter() {
        match crop_group(&img, *id, group, padding_px, min_size) {
            Ok(crop) => crops.push(crop),
            Err(e) => tracing::warn!(group_id = %id, error = %e, "group crop skipped"),
        }
    }
    tracing::debug!(count = crops.len(), "group crops generated");
    Ok(crops)
}

/// Map pixel coordinates inside an encoded crop back to the screenshot.
pub fn crop_to_source(crop_x: f32, crop_y: f32, crop: &GroupCrop) -> (i32, i32) {
    let sx = crop.crop_w as f32 / crop.out_w.max(1) as f32;
    let sy = crop.crop_h as f32 / crop.out_h.max(1) as f32;
    let x = (crop_x * sx + crop.origin_x as f32).round() as i32;
    let y = (crop_y * sy + crop.origin_y as f32).round() as i32;
    (x, y)
}
