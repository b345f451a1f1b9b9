/// Draw the grouped layout onto a screenshot: a thin box per merged
/// detection and a thick, kind-coloured box plus its id per group.
use std::collections::HashMap;

use crate::errors::{SeraphineError, SeraphineResult};
use crate::perception::layout::{GroupKind, GroupLayout};
use crate::perception::types::{BBox, MergeKind, MergedDetection, MergedId};

fn group_colour(kind: GroupKind) -> [u8; 4] {
    match kind {
        GroupKind::Horizontal => [255, 68, 68, 230], // red
        GroupKind::Vertical => [68, 120, 255, 230],  // blue
    }
}

fn detection_colour(kind: MergeKind) -> [u8; 4] {
    match kind {
        MergeKind::Matched => [68, 220, 68, 200],     // green
        MergeKind::ObjectOnly => [255, 170, 0, 200],  // orange
        MergeKind::TextOnly => [170, 170, 170, 200],  // grey
    }
}

pub(crate) fn encode_png(img: &image::DynamicImage) -> SeraphineResult<Vec<u8>> {
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| SeraphineError::Perception(format!("PNG encode: {e}")))?;
    Ok(out)
}

/// Annotate `src_bytes` (JPEG/PNG). Returns PNG bytes.
///
/// Labels are drawn at 2× on screens wider than 1600 px.
pub fn annotate_layout(
    src_bytes: &[u8],
    merged: &[MergedDetection],
    layout: &GroupLayout,
) -> SeraphineResult<Vec<u8>> {
    let img = image::load_from_memory(src_bytes)
        .map_err(|e| SeraphineError::Perception(format!("annotate load: {e}")))?;
    let mut canvas = img.to_rgba8();
    let w = canvas.width();

    let label_scale: u32 = if w > 1600 { 2 } else { 1 };
    let group_thickness: i32 = if w > 1600 { 3 } else { 2 };

    for det in merged {
        let [x1, y1, x2, y2] = pixel_rect(&det.bbox);
        draw_rect(&mut canvas, x1, y1, x2, y2, detection_colour(det.kind), 1);
    }

    for (id, group) in layout.iter() {
        let col = group_colour(id.kind);
        let [x1, y1, x2, y2] = pixel_rect(&group.bbox);
        draw_rect(&mut canvas, x1, y1, x2, y2, col, group_thickness);

        let label_h_px = (5 * label_scale + 4 * label_scale) as i32;
        draw_label_bg(&mut canvas, x1, (y1 - label_h_px).max(0), &id.to_string(), col, label_scale);
    }

    encode_png(&image::DynamicImage::ImageRgba8(canvas))
}

/// Text listing of the layout for a labeling prompt, one group per line:
/// `H1_2: M003 "Save", M004` .
pub fn build_group_list(layout: &GroupLayout, merged: &[MergedDetection]) -> String {
    if layout.is_empty() {
        return "No UI groups detected.".to_string();
    }

    let texts: HashMap<MergedId, &str> = merged
        .iter()
        .filter_map(|m| m.text.as_deref().map(|t| (m.id, t)))
        .collect();

    let mut lines = vec!["Detected groups:".to_string()];
    for (id, group) in layout.iter() {
        let members: Vec<String> = group
            .member_ids
            .iter()
            .map(|m| match texts.get(m) {
                Some(t) if !t.is_empty() => format!("{m} \"{t}\""),
                _ => m.to_string(),
            })
            .collect();
        let b = &group.bbox;
        lines.push(format!(
            "  - {id} [{:.0},{:.0},{:.0},{:.0}]: {}",
            b.x_min,
            b.y_min,
            b.x_max,
            b.y_max,
            members.join(", ")
        ));
    }
    lines.join("\n")
}

fn pixel_rect(b: &BBox) -> [i32; 4] {
    [
        b.x_min.round() as i32,
        b.y_min.round() as i32,
        b.x_max.round() as i32,
        b.y_max.round() as i32,
    ]
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32, y1: i32, x2: i32, y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);
    let in_bounds = |x: i32, y: i32| x >= 0 && x < iw && y >= 0 && y < ih;

    for t in 0..thickness {
        for x in x1..=x2 {
            for y in [y1 + t, y2 - t] {
                if in_bounds(x, y) {
                    set_pixel(canvas, x as u32, y as u32, col);
                }
            }
        }
        for y in y1..=y2 {
            for x in [x1 + t, x2 - t] {
                if in_bounds(x, y) {
                    set_pixel(canvas, x as u32, y as u32, col);
                }
            }
        }
    }
}

fn draw_label_bg(
    canvas: &mut image::RgbaImage,
    x: i32, y: i32,
    text: &str,
    col: [u8; 4],
    scale: u32,
) {
    let (w, h) = canvas.dimensions();
    let x = x.max(0) as u32;
    let y = y.max(0) as u32;
    let step = 5 * scale + 1;
    let pad = 2 * scale;
    let label_w = text.len() as u32 * step + pad * 2;
    let label_h = 5 * scale + pad * 2;

    // Darken the area behind the text.
    for dy in 0..label_h {
        for dx in 0..label_w {
            let (px, py) = (x + dx, y + dy);
            if px < w && py < h {
                let p = canvas.get_pixel_mut(px, py);
                p[0] = (p[0] as f32 * 0.2) as u8;
                p[1] = (p[1] as f32 * 0.2) as u8;
                p[2] = (p[2] as f32 * 0.2) as u8;
                p[3] = 255;
            }
        }
    }

    for (i, c) in text.chars().enumerate() {
        let gx = x + pad + i as u32 * step;
        if gx + 5 * scale >= w {
            break;
        }
        draw_glyph(canvas, c, gx, y + pad, col, scale);
    }
}

fn draw_glyph(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let Some(glyph) = glyph_for(c) else { return };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        set_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 glyphs for the characters that appear in group and detection ids.
/// Each row is a u8 where bit4 is the leftmost pixel.
fn glyph_for(c: char) -> Option<[u8; 5]> {
    const DIGITS: [[u8; 5]; 10] = [
        [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
        [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
        [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
        [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
        [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
        [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
        [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
        [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
        [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
        [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    ];
    match c {
        '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
        'H' => Some([0b10001, 0b10001, 0b11111, 0b10001, 0b10001]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10001, 0b10001]),
        '_' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b11111]),
        _ => None,
    }
}
