//! Single-channel masks and the operations that compute and refine them:
//! color keying, grow/shrink, feather, island removal.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::error::{EngineError, Result};
use crate::geom::Rect;
use crate::pixel;

/// Soft coverage mask; 255 = fully included, 0 = fully excluded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    pub fn new(width: u32, height: u32, fill: u8) -> Self {
        Self {
            width,
            height,
            data: vec![fill; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, v: u8) {
        self.data[(y as usize) * (self.width as usize) + x as usize] = v;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bilinear sample at a continuous coordinate; 0 outside the mask.
    pub fn sample_bilinear(&self, xf: f32, yf: f32) -> u8 {
        let x0f = xf.floor();
        let y0f = yf.floor();
        let fx = xf - x0f;
        let fy = yf - y0f;
        let x0 = x0f as i64;
        let y0 = y0f as i64;

        let fetch = |x: i64, y: i64| -> f32 {
            if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                0.0
            } else {
                self.get(x as u32, y as u32) as f32
            }
        };

        let top = fetch(x0, y0) * (1.0 - fx) + fetch(x0 + 1, y0) * fx;
        let bot = fetch(x0, y0 + 1) * (1.0 - fx) + fetch(x0 + 1, y0 + 1) * fx;
        (top * (1.0 - fy) + bot * fy + 0.5).clamp(0.0, 255.0) as u8
    }

    /// Resample into new dimensions, bilinear or nearest. Used when a layer
    /// source is resized and the mask must be regenerated by the caller.
    pub fn resampled(&self, width: u32, height: u32, bilinear: bool) -> Mask {
        let mut out = Mask::new(width, height, 0);
        if width == 0 || height == 0 || self.width == 0 || self.height == 0 {
            return out;
        }
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        for y in 0..height {
            for x in 0..width {
                let xf = (x as f32 + 0.5) * sx - 0.5;
                let yf = (y as f32 + 0.5) * sy - 0.5;
                let v = if bilinear {
                    self.sample_bilinear(xf, yf)
                } else {
                    let xi = (xf.round().max(0.0) as u32).min(self.width - 1);
                    let yi = (yf.round().max(0.0) as u32).min(self.height - 1);
                    self.get(xi, yi)
                };
                out.set(x, y, v);
            }
        }
        out
    }

    /// Copy a clipped rectangular region into a new mask.
    pub fn extract(&self, rect: Rect) -> Mask {
        let r = rect.clamp(self.width, self.height);
        let mut out = Mask::new(r.w, r.h, 0);
        for row in 0..r.h {
            let src = (r.y as u32 + row) as usize * self.width as usize + r.x as usize;
            let dst = row as usize * r.w as usize;
            let len = r.w as usize;
            out.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        }
        out
    }

    /// Overwrite the region at (`x`, `y`) with `patch`; the patch must fit.
    pub fn blit(&mut self, x: u32, y: u32, patch: &Mask) -> Result<()> {
        if x + patch.width > self.width || y + patch.height > self.height {
            return Err(EngineError::dimensions(
                (self.width, self.height),
                (x + patch.width, y + patch.height),
            ));
        }
        for row in 0..patch.height {
            let dst = (y + row) as usize * self.width as usize + x as usize;
            let src = row as usize * patch.width as usize;
            let len = patch.width as usize;
            self.data[dst..dst + len].copy_from_slice(&patch.data[src..src + len]);
        }
        Ok(())
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// Distance metric for color keying.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColorKeyMetric {
    /// Euclidean distance in RGB, compared against `tolerance`.
    Rgb { tolerance: u16 },
    /// Independent hue/saturation/value tolerances; hue distance is circular.
    Hsv { h_tol: f32, s_tol: f32, v_tol: f32 },
}

/// A palette of key colors plus the metric and edge softness to apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorKeyRule {
    pub palette: Vec<[u8; 3]>,
    pub metric: ColorKeyMetric,
    /// Width of the anti-aliased band as a fraction of the tolerance
    /// (0 = hard edge). Values in the band get intermediate coverage.
    pub edge_softness: f32,
}

impl ColorKeyRule {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.edge_softness) {
            return Err(EngineError::Validation(format!(
                "color key edge_softness {} outside 0..1",
                self.edge_softness
            )));
        }
        match self.metric {
            ColorKeyMetric::Rgb { tolerance } => {
                if tolerance > 442 {
                    return Err(EngineError::Validation(format!(
                        "rgb tolerance {tolerance} exceeds the maximum RGB distance"
                    )));
                }
            }
            ColorKeyMetric::Hsv { h_tol, s_tol, v_tol } => {
                if !(0.0..=180.0).contains(&h_tol)
                    || !(0.0..=255.0).contains(&s_tol)
                    || !(0.0..=255.0).contains(&v_tol)
                {
                    return Err(EngineError::Validation(
                        "hsv tolerances outside h:0..180 s/v:0..255".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let cmax = r.max(g).max(b);
    let cmin = r.min(g).min(b);
    let delta = cmax - cmin;

    let h = if delta <= 1e-8 {
        0.0
    } else if cmax == r {
        (60.0 * ((g - b) / delta)).rem_euclid(360.0)
    } else if cmax == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    let s = if cmax <= 1e-8 { 0.0 } else { (delta / cmax) * 255.0 };
    (h, s, cmax * 255.0)
}

/// Normalized distance of one pixel from one palette entry: <= 1 means
/// "within tolerance" for the rule's metric.
fn key_distance(rule: &ColorKeyRule, entry: [u8; 3], r: u8, g: u8, b: u8) -> f32 {
    match rule.metric {
        ColorKeyMetric::Rgb { tolerance } => {
            if tolerance == 0 {
                return f32::INFINITY;
            }
            let dr = r as f32 - entry[0] as f32;
            let dg = g as f32 - entry[1] as f32;
            let db = b as f32 - entry[2] as f32;
            (dr * dr + dg * dg + db * db).sqrt() / tolerance as f32
        }
        ColorKeyMetric::Hsv { h_tol, s_tol, v_tol } => {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let (h0, s0, v0) = rgb_to_hsv(entry[0], entry[1], entry[2]);
            let dh = {
                let d = (h - h0).abs();
                d.min(360.0 - d)
            };
            let nh = if h_tol <= 0.0 { f32::INFINITY } else { dh / h_tol };
            let ns = if s_tol <= 0.0 { f32::INFINITY } else { (s - s0).abs() / s_tol };
            let nv = if v_tol <= 0.0 { f32::INFINITY } else { (v - v0).abs() / v_tol };
            nh.max(ns).max(nv)
        }
    }
}

/// Build a keep-mask from a color-key rule: pixels matching any palette
/// entry are excluded (0), others included (255), with an anti-aliased
/// band of intermediate coverage when `edge_softness` > 0.
pub fn color_key_mask(src: &PixelBuffer, rule: &ColorKeyRule) -> Result<Mask> {
    rule.validate()?;
    let (w, h) = src.size();
    let mut out = Mask::new(w, h, 255);
    if rule.palette.is_empty() {
        return Ok(out);
    }

    let width = w as usize;
    out.as_bytes_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, v) in row.iter_mut().enumerate() {
                let p = pixel::unpremultiply(src.pixel(x as u32, y as u32));
                let mut best = f32::INFINITY;
                for entry in &rule.palette {
                    let d = key_distance(rule, *entry, p[0], p[1], p[2]);
                    if d < best {
                        best = d;
                    }
                }
                *v = if best <= 1.0 {
                    0
                } else if rule.edge_softness > 0.0 && best < 1.0 + rule.edge_softness {
                    let t = (best - 1.0) / rule.edge_softness;
                    (t * 255.0 + 0.5) as u8
                } else {
                    255
                };
            }
        });
    Ok(out)
}

/// Connectivity rule for connected-component labeling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Four,
    Eight,
}

/// Morphological operation selector for [`morphology`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MorphOp {
    /// Dilate coverage by `radius` iterations of a 3x3 max filter.
    Grow(u32),
    /// Erode coverage by `radius` iterations of a 3x3 min filter.
    Shrink(u32),
    /// Separable box blur of the given radius applied around mask edges.
    Feather(u32),
    /// Zero connected components below `min_area` pixels.
    RemoveIslands {
        min_area: u32,
        connectivity: Connectivity,
    },
}

/// Apply one morphological operation, returning a new mask.
pub fn morphology(mask: &Mask, op: MorphOp) -> Mask {
    match op {
        MorphOp::Grow(radius) => minmax_filter(mask, radius, true),
        MorphOp::Shrink(radius) => minmax_filter(mask, radius, false),
        MorphOp::Feather(radius) => feather(mask, radius),
        MorphOp::RemoveIslands {
            min_area,
            connectivity,
        } => remove_islands(mask, min_area, connectivity),
    }
}

fn minmax_filter(mask: &Mask, radius: u32, grow: bool) -> Mask {
    let mut cur = mask.clone();
    let (w, h) = mask.size();
    if w == 0 || h == 0 {
        return cur;
    }
    let width = w as usize;
    for _ in 0..radius {
        let prev = cur.clone();
        let src = prev.as_bytes();
        cur.as_bytes_mut()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    let mut acc = src[y * width + x];
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let nx = x as i64 + dx;
                            let ny = y as i64 + dy;
                            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                                continue;
                            }
                            let v = src[ny as usize * width + nx as usize];
                            acc = if grow { acc.max(v) } else { acc.min(v) };
                        }
                    }
                    *out = acc;
                }
            });
    }
    cur
}

/// Separable box blur over the mask. Rows and columns that are entirely
/// uniform are copied through untouched, so fully-0 or fully-255 interior
/// regions are never re-filtered.
fn feather(mask: &Mask, radius: u32) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let (w, h) = mask.size();
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let r = radius as i64;
    let width = w as usize;

    // Horizontal pass.
    let src = mask.as_bytes();
    let mut tmp = vec![0u8; src.len()];
    tmp.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let line = &src[y * width..(y + 1) * width];
        let uniform = line.iter().all(|&v| v == line[0]);
        if uniform {
            row.copy_from_slice(line);
            return;
        }
        for x in 0..width {
            let lo = (x as i64 - r).max(0) as usize;
            let hi = ((x as i64 + r) as usize).min(width - 1);
            let sum: u32 = line[lo..=hi].iter().map(|&v| v as u32).sum();
            let count = (hi - lo + 1) as u32;
            row[x] = ((sum + count / 2) / count) as u8;
        }
    });

    // Vertical pass over the horizontal result.
    let mut out = Mask::new(w, h, 0);
    let cols: Vec<usize> = (0..width).collect();
    let column_out: Vec<Vec<u8>> = cols
        .par_iter()
        .map(|&x| {
            let height = h as usize;
            let mut col = vec![0u8; height];
            let first = tmp[x];
            let uniform = (0..height).all(|y| tmp[y * width + x] == first);
            if uniform {
                for (y, c) in col.iter_mut().enumerate() {
                    *c = tmp[y * width + x];
                }
                return col;
            }
            for (y, c) in col.iter_mut().enumerate() {
                let lo = (y as i64 - r).max(0) as usize;
                let hi = ((y as i64 + r) as usize).min(height - 1);
                let mut sum = 0u32;
                for yy in lo..=hi {
                    sum += tmp[yy * width + x] as u32;
                }
                let count = (hi - lo + 1) as u32;
                *c = ((sum + count / 2) / count) as u8;
            }
            col
        })
        .collect();
    for (x, col) in column_out.into_iter().enumerate() {
        for (y, v) in col.into_iter().enumerate() {
            out.as_bytes_mut()[y * width + x] = v;
        }
    }
    out
}

/// One horizontal run of foreground pixels, the unit of component labeling.
#[derive(Clone, Copy, Debug)]
struct Run {
    row: u32,
    start: u32,
    end: u32, // exclusive
}

struct DisjointSet {
    parent: Vec<u32>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
        }
    }

    fn find(&mut self, mut i: u32) -> u32 {
        while self.parent[i as usize] != i {
            let p = self.parent[i as usize];
            self.parent[i as usize] = self.parent[p as usize];
            i = p;
        }
        i
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Smaller root wins so the result is independent of merge order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi as usize] = lo;
        }
    }
}

/// Remove connected foreground components (value > 0) smaller than
/// `min_area` pixels. Run-based two-pass labeling; unions are resolved to
/// the smallest run index, so the result does not depend on row processing
/// order or any parallel tiling of the extraction step.
fn remove_islands(mask: &Mask, min_area: u32, connectivity: Connectivity) -> Mask {
    let mut out = mask.clone();
    if min_area == 0 {
        return out;
    }
    let (w, h) = mask.size();
    if w == 0 || h == 0 {
        return out;
    }
    let width = w as usize;
    let bytes = mask.as_bytes();

    // Extract foreground runs per row (parallel, concatenated in row order).
    let per_row: Vec<Vec<Run>> = (0..h as usize)
        .into_par_iter()
        .map(|y| {
            let line = &bytes[y * width..(y + 1) * width];
            let mut runs = Vec::new();
            let mut x = 0usize;
            while x < width {
                if line[x] > 0 {
                    let start = x;
                    while x < width && line[x] > 0 {
                        x += 1;
                    }
                    runs.push(Run {
                        row: y as u32,
                        start: start as u32,
                        end: x as u32,
                    });
                } else {
                    x += 1;
                }
            }
            runs
        })
        .collect();

    let mut runs: Vec<Run> = Vec::new();
    let mut row_range: Vec<(usize, usize)> = Vec::with_capacity(h as usize);
    for row_runs in &per_row {
        let start = runs.len();
        runs.extend_from_slice(row_runs);
        row_range.push((start, runs.len()));
    }
    if runs.is_empty() {
        return out;
    }

    // Union vertically adjacent runs. 8-connectivity lets runs touch
    // diagonally, which widens the overlap test by one pixel on each side.
    let slack = match connectivity {
        Connectivity::Four => 0i64,
        Connectivity::Eight => 1i64,
    };
    let mut ds = DisjointSet::new(runs.len());
    for y in 1..h as usize {
        let (a0, a1) = row_range[y - 1];
        let (b0, b1) = row_range[y];
        let mut ai = a0;
        for bi in b0..b1 {
            let b = runs[bi];
            while ai < a1 && (runs[ai].end as i64 + slack) <= b.start as i64 {
                ai += 1;
            }
            let mut aj = ai;
            while aj < a1 && (runs[aj].start as i64 - slack) < b.end as i64 {
                ds.union(aj as u32, bi as u32);
                aj += 1;
            }
        }
    }

    // Accumulate component areas and zero out the small ones.
    let mut area: Vec<u32> = vec![0; runs.len()];
    for (i, run) in runs.iter().enumerate() {
        let root = ds.find(i as u32) as usize;
        area[root] += run.end - run.start;
    }
    for (i, run) in runs.iter().enumerate() {
        let root = ds.find(i as u32) as usize;
        if area[root] < min_area {
            let base = run.row as usize * width;
            for x in run.start..run.end {
                out.as_bytes_mut()[base + x as usize] = 0;
            }
        }
    }
    out
}

/// Mask refinement settings carried per layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskRefineSettings {
    /// Positive grows the removed region (shrinks coverage); negative the
    /// opposite. Units are filter iterations.
    pub grow_shrink: i32,
    pub feather_radius: u32,
    pub remove_islands_min_area: u32,
    pub connectivity: Connectivity,
}

impl Default for MaskRefineSettings {
    fn default() -> Self {
        Self {
            grow_shrink: 0,
            feather_radius: 0,
            remove_islands_min_area: 0,
            connectivity: Connectivity::Four,
        }
    }
}

/// Combine a layer's alpha with a keep-mask and refine the result.
///
/// The two masks must share dimensions; a disagreement is the caller's
/// problem to fix (regenerate via [`Mask::resampled`]), not silently
/// resampled here.
pub fn refine_alpha(alpha: &Mask, keep: &Mask, settings: &MaskRefineSettings) -> Result<Mask> {
    if alpha.size() != keep.size() {
        return Err(EngineError::dimensions(alpha.size(), keep.size()));
    }

    let keep = if settings.grow_shrink > 0 {
        morphology(keep, MorphOp::Shrink(settings.grow_shrink as u32))
    } else if settings.grow_shrink < 0 {
        morphology(keep, MorphOp::Grow((-settings.grow_shrink) as u32))
    } else {
        keep.clone()
    };

    let mut out = alpha.clone();
    for (o, k) in out.as_bytes_mut().iter_mut().zip(keep.as_bytes()) {
        *o = ((*o as u32 * *k as u32 + 127) / 255) as u8;
    }

    if settings.remove_islands_min_area > 0 {
        out = morphology(
            &out,
            MorphOp::RemoveIslands {
                min_area: settings.remove_islands_min_area,
                connectivity: settings.connectivity,
            },
        );
    }

    let keyed_any = keep.as_bytes().iter().any(|&v| v < 255);
    if settings.feather_radius > 0 && keyed_any {
        out = morphology(&out, MorphOp::Feather(settings.feather_radius));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::Color;

    fn mask_from_rows(rows: &[&[u8]]) -> Mask {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        let mut m = Mask::new(w, h, 0);
        for (y, row) in rows.iter().enumerate() {
            for (x, &v) in row.iter().enumerate() {
                m.set(x as u32, y as u32, v);
            }
        }
        m
    }

    #[test]
    fn color_key_excludes_palette_colors() {
        let mut buf = PixelBuffer::filled(2, 1, Color::white());
        buf.set_pixel(1, 0, Color::rgba(10, 200, 30, 255).to_pixel());
        let rule = ColorKeyRule {
            palette: vec![[10, 200, 30]],
            metric: ColorKeyMetric::Rgb { tolerance: 20 },
            edge_softness: 0.0,
        };
        let m = color_key_mask(&buf, &rule).unwrap();
        assert_eq!(m.get(0, 0), 255);
        assert_eq!(m.get(1, 0), 0);
    }

    #[test]
    fn color_key_hsv_uses_circular_hue() {
        // Hue 358 and hue 2 are 4 degrees apart, not 356.
        let near_red = Color::from_hsva(358.0 / 360.0, 1.0, 1.0, 1.0);
        let buf = PixelBuffer::filled(1, 1, near_red);
        let rule = ColorKeyRule {
            palette: vec![[255, 9, 0]], // hue ~2
            metric: ColorKeyMetric::Hsv {
                h_tol: 12.0,
                s_tol: 40.0,
                v_tol: 40.0,
            },
            edge_softness: 0.0,
        };
        let m = color_key_mask(&buf, &rule).unwrap();
        assert_eq!(m.get(0, 0), 0);
    }

    #[test]
    fn empty_palette_keeps_everything() {
        let buf = PixelBuffer::filled(3, 3, Color::white());
        let rule = ColorKeyRule {
            palette: vec![],
            metric: ColorKeyMetric::Rgb { tolerance: 30 },
            edge_softness: 0.0,
        };
        let m = color_key_mask(&buf, &rule).unwrap();
        assert!(m.as_bytes().iter().all(|&v| v == 255));
    }

    #[test]
    fn grow_expands_coverage() {
        let m = mask_from_rows(&[
            &[0, 0, 0],
            &[0, 255, 0],
            &[0, 0, 0],
        ]);
        let grown = morphology(&m, MorphOp::Grow(1));
        assert!(grown.as_bytes().iter().all(|&v| v == 255));
    }

    #[test]
    fn shrink_erodes_coverage() {
        let m = Mask::new(3, 3, 255);
        let mut bordered = m.clone();
        bordered.set(0, 0, 0);
        let shrunk = morphology(&bordered, MorphOp::Shrink(1));
        assert_eq!(shrunk.get(1, 1), 0);
    }

    #[test]
    fn feather_leaves_uniform_mask_untouched() {
        let m = Mask::new(16, 16, 255);
        let f = morphology(&m, MorphOp::Feather(3));
        assert_eq!(f, m);
    }

    #[test]
    fn feather_softens_an_edge() {
        let mut m = Mask::new(16, 1, 0);
        for x in 8..16 {
            m.set(x, 0, 255);
        }
        let f = morphology(&m, MorphOp::Feather(2));
        let v = f.get(8, 0);
        assert!(v > 0 && v < 255, "edge value {v} should be intermediate");
    }

    #[test]
    fn island_removal_keeps_large_components_only() {
        // One 500-pixel region (25x20) and one 3-pixel region, threshold 50.
        let mut m = Mask::new(64, 32, 0);
        for y in 0..20 {
            for x in 0..25 {
                m.set(x, y, 255);
            }
        }
        for x in 40..43 {
            m.set(x, 30, 255);
        }
        let cleaned = morphology(
            &m,
            MorphOp::RemoveIslands {
                min_area: 50,
                connectivity: Connectivity::Four,
            },
        );
        assert_eq!(cleaned.get(10, 10), 255);
        assert_eq!(cleaned.get(41, 30), 0);
        let area: u32 = cleaned.as_bytes().iter().map(|&v| (v > 0) as u32).sum();
        assert_eq!(area, 500);
    }

    #[test]
    fn island_removal_eight_connectivity_bridges_diagonals() {
        let m = mask_from_rows(&[
            &[255, 0, 0],
            &[0, 255, 0],
            &[0, 0, 255],
        ]);
        let four = morphology(
            &m,
            MorphOp::RemoveIslands {
                min_area: 2,
                connectivity: Connectivity::Four,
            },
        );
        assert!(four.as_bytes().iter().all(|&v| v == 0));

        let eight = morphology(
            &m,
            MorphOp::RemoveIslands {
                min_area: 2,
                connectivity: Connectivity::Eight,
            },
        );
        assert_eq!(eight.get(0, 0), 255);
        assert_eq!(eight.get(2, 2), 255);
    }

    #[test]
    fn refine_alpha_rejects_dimension_mismatch() {
        let alpha = Mask::new(4, 4, 255);
        let keep = Mask::new(5, 4, 255);
        let err = refine_alpha(&alpha, &keep, &MaskRefineSettings::default());
        assert!(matches!(err, Err(EngineError::DimensionMismatch { .. })));
    }

    #[test]
    fn refine_alpha_multiplies_coverage() {
        let alpha = Mask::new(2, 1, 255);
        let mut keep = Mask::new(2, 1, 255);
        keep.set(1, 0, 0);
        let out = refine_alpha(&alpha, &keep, &MaskRefineSettings::default()).unwrap();
        assert_eq!(out.get(0, 0), 255);
        assert_eq!(out.get(1, 0), 0);
    }
}
