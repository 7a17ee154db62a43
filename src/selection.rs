//! Selection geometry rasterized into masks: shapes, magic wand, and the
//! combine modes that merge a new selection with the existing one.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::geom::Rect;
use crate::mask::Mask;
use crate::pixel;

/// How a new selection interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Drop any existing selection, then set the new shape.
    #[default]
    Replace,
    /// Union with the existing mask.
    Add,
    /// Subtract from the existing mask.
    Subtract,
    /// Keep only pixels in both the existing mask and the new shape.
    Intersect,
}

/// Shared workspace selection, one per document. When enabled it limits
/// where color keying removes pixels and gates every layer's adjustment
/// stack; `invert` flips the selected region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub enabled: bool,
    pub invert: bool,
    pub shape: Option<SelectionShape>,
    pub mask: Option<Mask>,
}

impl Selection {
    /// Resolve to a canvas-sized soft mask, or `None` when disabled or
    /// empty. A stored mask wins over the shape when its size matches the
    /// canvas; otherwise the shape is rasterized fresh.
    pub fn resolve(&self, width: u32, height: u32) -> Option<Mask> {
        if !self.enabled {
            return None;
        }
        let mut mask = match (&self.mask, &self.shape) {
            (Some(m), _) if m.size() == (width, height) => m.clone(),
            (_, Some(shape)) => shape.to_mask(width, height),
            _ => return None,
        };
        if self.invert {
            for v in mask.as_bytes_mut() {
                *v = 255 - *v;
            }
        }
        Some(mask)
    }
}

/// Geometric selection shape, rasterized on demand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SelectionShape {
    Rectangle { rect: Rect },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
    Polygon { points: Vec<(f32, f32)> },
}

impl SelectionShape {
    /// Rasterize into a full-size binary mask.
    pub fn to_mask(&self, width: u32, height: u32) -> Mask {
        let mut mask = Mask::new(width, height, 0);
        match self {
            SelectionShape::Rectangle { rect } => {
                let r = rect.clamp(width, height);
                for y in 0..r.h {
                    for x in 0..r.w {
                        mask.set(r.x as u32 + x, r.y as u32 + y, 255);
                    }
                }
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return mask;
                }
                for y in 0..height {
                    for x in 0..width {
                        let dx = (x as f32 + 0.5 - cx) / rx;
                        let dy = (y as f32 + 0.5 - cy) / ry;
                        if dx * dx + dy * dy <= 1.0 {
                            mask.set(x, y, 255);
                        }
                    }
                }
            }
            SelectionShape::Polygon { points } => {
                if points.len() < 3 {
                    return mask;
                }
                // Even-odd scanline fill against pixel centers.
                for y in 0..height {
                    let py = y as f32 + 0.5;
                    let mut crossings = Vec::new();
                    for i in 0..points.len() {
                        let (x0, y0) = points[i];
                        let (x1, y1) = points[(i + 1) % points.len()];
                        if (y0 <= py && y1 > py) || (y1 <= py && y0 > py) {
                            let t = (py - y0) / (y1 - y0);
                            crossings.push(x0 + t * (x1 - x0));
                        }
                    }
                    crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
                    for pair in crossings.chunks_exact(2) {
                        let x0 = pair[0].max(0.0) as u32;
                        let x1 = (pair[1].min(width as f32)).ceil() as u32;
                        for x in x0..x1.min(width) {
                            if (x as f32 + 0.5) >= pair[0] && (x as f32 + 0.5) <= pair[1] {
                                mask.set(x, y, 255);
                            }
                        }
                    }
                }
            }
        }
        mask
    }
}

fn rgb_distance_ok(a: [u8; 4], b: [u8; 4], tolerance: u16) -> bool {
    let dr = a[0] as i32 - b[0] as i32;
    let dg = a[1] as i32 - b[1] as i32;
    let db = a[2] as i32 - b[2] as i32;
    dr * dr + dg * dg + db * db <= (tolerance as i32) * (tolerance as i32)
}

/// Select every pixel within RGB tolerance of the seed color, regardless of
/// adjacency.
pub fn color_range_mask(src: &PixelBuffer, seed: (u32, u32), tolerance: u16) -> Mask {
    let (w, h) = src.size();
    let mut mask = Mask::new(w, h, 0);
    if seed.0 >= w || seed.1 >= h {
        return mask;
    }
    let reference = pixel::unpremultiply(src.pixel(seed.0, seed.1));
    for y in 0..h {
        for x in 0..w {
            let p = pixel::unpremultiply(src.pixel(x, y));
            if rgb_distance_ok(p, reference, tolerance) {
                mask.set(x, y, 255);
            }
        }
    }
    mask
}

/// Magic-wand selection: flood fill from the seed over pixels within RGB
/// tolerance. With `contiguous = false` this is a plain color-range select.
pub fn magic_wand_mask(
    src: &PixelBuffer,
    seed: (u32, u32),
    tolerance: u16,
    contiguous: bool,
) -> Mask {
    if !contiguous {
        return color_range_mask(src, seed, tolerance);
    }
    let (w, h) = src.size();
    let mut mask = Mask::new(w, h, 0);
    if seed.0 >= w || seed.1 >= h {
        return mask;
    }
    let reference = pixel::unpremultiply(src.pixel(seed.0, seed.1));

    let mut queue = VecDeque::new();
    queue.push_back(seed);
    mask.set(seed.0, seed.1, 255);
    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)] {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if mask.get(nx, ny) != 0 {
                continue;
            }
            let p = pixel::unpremultiply(src.pixel(nx, ny));
            if rgb_distance_ok(p, reference, tolerance) {
                mask.set(nx, ny, 255);
                queue.push_back((nx, ny));
            }
        }
    }
    mask
}

/// Merge a new selection mask into the current one. A size disagreement or
/// a missing current selection falls back to the incoming mask.
pub fn combine_selection(current: Option<&Mask>, incoming: &Mask, mode: SelectionMode) -> Mask {
    let current = match current {
        Some(c) if c.size() == incoming.size() && mode != SelectionMode::Replace => c,
        _ => return incoming.clone(),
    };
    let mut out = current.clone();
    for (o, &i) in out.as_bytes_mut().iter_mut().zip(incoming.as_bytes()) {
        *o = match mode {
            SelectionMode::Replace => i,
            SelectionMode::Add => (*o).max(i),
            SelectionMode::Subtract => (*o).min(255 - i),
            SelectionMode::Intersect => (*o).min(i),
        };
    }
    out
}

/// Tight bounding rectangle of the selected pixels, if any.
pub fn bounding_rect(mask: &Mask) -> Option<Rect> {
    let (w, h) = mask.size();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;
    for y in 0..h {
        for x in 0..w {
            if mask.get(x, y) > 0 {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                found = true;
            }
        }
    }
    found.then(|| {
        Rect::new(
            min_x as i32,
            min_y as i32,
            max_x - min_x + 1,
            max_y - min_y + 1,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::Color;

    #[test]
    fn rectangle_rasterizes_exact_bounds() {
        let shape = SelectionShape::Rectangle {
            rect: Rect::new(1, 1, 2, 2),
        };
        let m = shape.to_mask(4, 4);
        assert_eq!(m.get(0, 0), 0);
        assert_eq!(m.get(1, 1), 255);
        assert_eq!(m.get(2, 2), 255);
        assert_eq!(m.get(3, 3), 0);
        assert_eq!(bounding_rect(&m), Some(Rect::new(1, 1, 2, 2)));
    }

    #[test]
    fn wand_respects_contiguity() {
        // Two red regions separated by a blue column.
        let mut buf = PixelBuffer::filled(5, 1, Color::rgba(255, 0, 0, 255));
        buf.set_pixel(2, 0, Color::rgba(0, 0, 255, 255).to_pixel());

        let contiguous = magic_wand_mask(&buf, (0, 0), 10, true);
        assert_eq!(contiguous.get(0, 0), 255);
        assert_eq!(contiguous.get(4, 0), 0);

        let global = magic_wand_mask(&buf, (0, 0), 10, false);
        assert_eq!(global.get(4, 0), 255);
        assert_eq!(global.get(2, 0), 0);
    }

    #[test]
    fn combine_modes() {
        let mut a = Mask::new(2, 1, 0);
        a.set(0, 0, 255);
        let mut b = Mask::new(2, 1, 0);
        b.set(1, 0, 255);

        let added = combine_selection(Some(&a), &b, SelectionMode::Add);
        assert_eq!((added.get(0, 0), added.get(1, 0)), (255, 255));

        let subtracted = combine_selection(Some(&a), &a, SelectionMode::Subtract);
        assert!(subtracted.as_bytes().iter().all(|&v| v == 0));

        let intersected = combine_selection(Some(&a), &b, SelectionMode::Intersect);
        assert!(intersected.as_bytes().iter().all(|&v| v == 0));

        let replaced = combine_selection(Some(&a), &b, SelectionMode::Replace);
        assert_eq!(replaced, b);
    }

    #[test]
    fn selection_resolves_only_when_enabled() {
        let mut sel = Selection {
            shape: Some(SelectionShape::Rectangle {
                rect: Rect::new(0, 0, 2, 4),
            }),
            ..Selection::default()
        };
        assert!(sel.resolve(4, 4).is_none());

        sel.enabled = true;
        let m = sel.resolve(4, 4).unwrap();
        assert_eq!(m.get(1, 1), 255);
        assert_eq!(m.get(3, 1), 0);

        sel.invert = true;
        let flipped = sel.resolve(4, 4).unwrap();
        assert_eq!(flipped.get(1, 1), 0);
        assert_eq!(flipped.get(3, 1), 255);
    }

    #[test]
    fn stored_mask_wins_when_sized_for_the_canvas() {
        let mut stored = Mask::new(4, 4, 0);
        stored.set(3, 3, 200);
        let sel = Selection {
            enabled: true,
            invert: false,
            shape: Some(SelectionShape::Rectangle {
                rect: Rect::new(0, 0, 1, 1),
            }),
            mask: Some(stored),
        };
        let m = sel.resolve(4, 4).unwrap();
        assert_eq!(m.get(3, 3), 200);
        assert_eq!(m.get(0, 0), 0);

        // Wrong-sized mask falls back to the shape.
        let m = sel.resolve(8, 8).unwrap();
        assert_eq!(m.get(0, 0), 255);
        assert_eq!(m.get(3, 3), 0);
    }

    #[test]
    fn polygon_fills_triangle_interior() {
        let shape = SelectionShape::Polygon {
            points: vec![(0.0, 0.0), (8.0, 0.0), (0.0, 8.0)],
        };
        let m = shape.to_mask(8, 8);
        assert_eq!(m.get(1, 1), 255);
        assert_eq!(m.get(7, 7), 0);
    }
}
