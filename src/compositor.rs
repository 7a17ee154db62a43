//! Layer rendering and document compositing.
//!
//! Each layer is rendered through a fixed pipeline: decode the source,
//! derive the keep-mask (color key plus user mask, source space), map the
//! source onto the canvas through the layer affine, fold the paint bitmap
//! over the result, multiply the mask through, run the adjustment stack,
//! then scale by layer opacity. Layer outputs blend bottom-up.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use rayon::prelude::*;

use crate::buffer::PixelBuffer;
use crate::error::Result;
use crate::geom::Rect;
use crate::layer::{BlendMode, Document, Layer, ResampleQuality};
use crate::mask::{self, Mask};
use crate::pixel::{self, Pixel};

/// Decoded-source cache keyed by path. A source that fails to decode
/// degrades to a transparent placeholder so the rest of the document still
/// renders; the failure is logged, not fatal.
#[derive(Default)]
pub struct SourceCache {
    entries: HashMap<String, Arc<PixelBuffer>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or decode the source at `path`. `placeholder` sizes the
    /// stand-in buffer used when decoding fails.
    pub fn resolve(&mut self, path: &str, placeholder: (u32, u32)) -> Arc<PixelBuffer> {
        if let Some(buf) = self.entries.get(path) {
            return Arc::clone(buf);
        }
        let buf = match PixelBuffer::decode(Path::new(path)) {
            Ok(buf) => Arc::new(buf),
            Err(e) => {
                warn!("source `{path}` unavailable, rendering placeholder: {e}");
                Arc::new(PixelBuffer::new(placeholder.0, placeholder.1))
            }
        };
        self.entries.insert(path.to_string(), Arc::clone(&buf));
        buf
    }

    pub fn evict(&mut self, path: &str) {
        self.entries.remove(path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Attach decoded sources to every layer that names a path but has none
/// loaded. Call after opening a project or adding an image layer.
pub fn attach_sources(doc: &mut Document, cache: &mut SourceCache) {
    let placeholder = doc.size();
    for layer in doc.layers_mut() {
        if layer.source.is_none() {
            if let Some(path) = layer.source_path.clone() {
                layer.source = Some(cache.resolve(&path, placeholder));
            }
        }
    }
}

/// Build the layer's combined source-space mask, if it has one.
///
/// Color keying produces a keep-mask which is refined and folded into the
/// source alpha; the user mask multiplies on top. An active selection of
/// matching size limits where keying removes pixels; outside it the source
/// is kept untouched.
fn combined_source_mask(layer: &Layer, selection: Option<&Mask>) -> Result<Option<Mask>> {
    let Some(source) = layer.source.as_deref() else {
        return Ok(None);
    };
    let keyed = match &layer.color_key {
        Some(rule) => {
            let (w, h) = source.size();
            let mut alpha = Mask::new(w, h, 0);
            for (a, p) in alpha
                .as_bytes_mut()
                .iter_mut()
                .zip(source.as_bytes().chunks_exact(4))
            {
                *a = p[3];
            }
            let mut keep = mask::color_key_mask(source, rule)?;
            if let Some(sel) = selection {
                if sel.size() == keep.size() {
                    for (k, &s) in keep.as_bytes_mut().iter_mut().zip(sel.as_bytes()) {
                        *k = (255 - ((255 - *k as u32) * s as u32 + 127) / 255) as u8;
                    }
                }
            }
            Some(mask::refine_alpha(&alpha, &keep, &layer.mask_refine)?)
        }
        None => None,
    };
    match (keyed, &layer.mask) {
        (Some(mut k), Some(user)) => {
            for (o, u) in k.as_bytes_mut().iter_mut().zip(user.as_bytes()) {
                *o = ((*o as u32 * *u as u32 + 127) / 255) as u8;
            }
            Ok(Some(k))
        }
        (Some(k), None) => Ok(Some(k)),
        (None, Some(user)) => Ok(Some(user.clone())),
        (None, None) => Ok(None),
    }
}

/// Render one layer's contribution over `region` (canvas space).
///
/// The returned buffer matches `region` in size and is already scaled by
/// the layer opacity, ready to blend.
pub fn render_layer_region(
    layer: &Layer,
    canvas: (u32, u32),
    region: Rect,
    selection: Option<&Mask>,
) -> Result<PixelBuffer> {
    let region = region.clamp(canvas.0, canvas.1);
    if region.is_empty() {
        return Ok(PixelBuffer::new(0, 0));
    }

    // Spatial adjustments read outside the region, so render with padding
    // and crop after the stack runs. Node masks and the selection are
    // canvas-sized, so a layer gated by either renders at full size.
    let pad = layer.adjustments.padding();
    let enabled_nodes = layer.adjustments.nodes().iter().any(|n| n.enabled);
    let masked_nodes = layer
        .adjustments
        .nodes()
        .iter()
        .any(|n| n.enabled && n.mask.is_some());
    let full_size = masked_nodes || (selection.is_some() && enabled_nodes);
    let padded = if full_size {
        Rect::of_size(canvas.0, canvas.1)
    } else {
        region.inflate(pad).clamp(canvas.0, canvas.1)
    };

    let source = layer.source.as_deref();
    let source_mask = combined_source_mask(layer, selection)?;

    // Inverse of scale -> rotate -> translate around the source and canvas
    // centers, so an untransformed source lands centered on the canvas.
    let (cw, ch) = canvas;
    let (sw, sh) = source.map_or((0, 0), |s| s.size());
    let scx = (sw as f32 - 1.0) / 2.0;
    let scy = (sh as f32 - 1.0) / 2.0;
    let ccx = (cw as f32 - 1.0) / 2.0;
    let ccy = (ch as f32 - 1.0) / 2.0;
    let theta = -layer.transform.rotation_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let inv_scale = 1.0 / layer.transform.scale;
    let identity = layer.transform.is_identity() && (sw, sh) == (cw, ch);

    let mut out = PixelBuffer::new(padded.w, padded.h);
    let row_len = padded.w as usize * 4;
    out.as_bytes_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, bytes)| {
            let cy = padded.y + row as i32;
            for col in 0..padded.w as usize {
                let cx = padded.x + col as i32;

                let (src_px, mask_val) = if let Some(src) = source {
                    let (sx, sy) = if identity {
                        (cx as f32, cy as f32)
                    } else {
                        let dx = cx as f32 - ccx - layer.transform.offset.x;
                        let dy = cy as f32 - ccy - layer.transform.offset.y;
                        let rx = dx * cos - dy * sin;
                        let ry = dx * sin + dy * cos;
                        (rx * inv_scale + scx, ry * inv_scale + scy)
                    };
                    let px = if identity {
                        if cx >= 0 && cy >= 0 && (cx as u32) < sw && (cy as u32) < sh {
                            src.pixel(cx as u32, cy as u32)
                        } else {
                            pixel::TRANSPARENT
                        }
                    } else {
                        match layer.resample {
                            ResampleQuality::Bilinear => src.sample_bilinear(sx, sy),
                            ResampleQuality::Nearest => src.sample_nearest(sx, sy),
                        }
                    };
                    let mv = match &source_mask {
                        Some(m) => m.sample_bilinear(sx, sy),
                        None => 255,
                    };
                    (px, mv)
                } else {
                    (pixel::TRANSPARENT, 255)
                };

                let merged = match &layer.paint {
                    Some(paint) if cx >= 0 && cy >= 0 && (cx as u32) < cw && (cy as u32) < ch => {
                        pixel::alpha_over(paint.pixel(cx as u32, cy as u32), src_px)
                    }
                    _ => src_px,
                };
                let masked = pixel::scale_alpha(merged, mask_val as u32);
                bytes[col * 4..col * 4 + 4].copy_from_slice(&masked);
            }
        });

    let out = layer
        .adjustments
        .apply(&out, if full_size { selection } else { None })?;

    // Crop the padding back off.
    let mut out = if padded == region {
        out
    } else {
        out.extract(Rect::new(
            region.x - padded.x,
            region.y - padded.y,
            region.w,
            region.h,
        ))
    };

    let opacity = (layer.opacity.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    if opacity < 255 {
        for chunk in out.as_bytes_mut().chunks_exact_mut(4) {
            let scaled = pixel::scale_alpha([chunk[0], chunk[1], chunk[2], chunk[3]], opacity);
            chunk.copy_from_slice(&scaled);
        }
    }
    Ok(out)
}

/// Blend a rendered layer into the accumulator with the given mode.
fn blend_into(base: &mut PixelBuffer, top: &PixelBuffer, mode: BlendMode) {
    debug_assert_eq!(base.size(), top.size());
    let row_len = base.width() as usize * 4;
    base.as_bytes_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let top_row = &top.as_bytes()[y * row_len..(y + 1) * row_len];
            for (dst, src) in row.chunks_exact_mut(4).zip(top_row.chunks_exact(4)) {
                let blended = blend_pixel(
                    mode,
                    [src[0], src[1], src[2], src[3]],
                    [dst[0], dst[1], dst[2], dst[3]],
                );
                dst.copy_from_slice(&blended);
            }
        });
}

/// Blend one premultiplied top pixel over a premultiplied base pixel.
///
/// Non-normal modes compute their mixing function on straight-alpha
/// channels, then composite: `out = f(top, base) * ta + base * ba * (1 - ta)`
/// with `out_a = ta + ba * (1 - ta)`.
pub fn blend_pixel(mode: BlendMode, top: Pixel, base: Pixel) -> Pixel {
    if top[3] == 0 {
        return base;
    }
    if mode == BlendMode::Normal {
        return pixel::alpha_over(top, base);
    }

    let ta = top[3] as f32 / 255.0;
    let ba = base[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);
    if out_a <= 0.0 {
        return pixel::TRANSPARENT;
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let t = top[c] as f32 / 255.0 / ta;
        let b = if ba > 0.0 {
            base[c] as f32 / 255.0 / ba
        } else {
            0.0
        };
        let f = match mode {
            BlendMode::Normal => t,
            BlendMode::Multiply => t * b,
            BlendMode::Screen => 1.0 - (1.0 - t) * (1.0 - b),
            BlendMode::Overlay => {
                if b < 0.5 {
                    2.0 * t * b
                } else {
                    1.0 - 2.0 * (1.0 - t) * (1.0 - b)
                }
            }
        };
        let premul = f * ta + (base[c] as f32 / 255.0) * (1.0 - ta);
        out[c] = (premul * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
    out
}

/// Composite the full document into a canvas-sized premultiplied buffer.
pub fn composite(doc: &Document) -> Result<PixelBuffer> {
    let (_, patch) = composite_region(doc, Rect::of_size(doc.width, doc.height))?;
    Ok(patch)
}

/// Composite only `region`, returning the clipped rectangle and its pixels.
/// Used to refresh dirty areas after a stroke without re-rendering the
/// whole canvas.
pub fn composite_region(doc: &Document, region: Rect) -> Result<(Rect, PixelBuffer)> {
    let region = region.clamp(doc.width, doc.height);
    let selection = doc.selection.resolve(doc.width, doc.height);
    let mut out = PixelBuffer::new(region.w, region.h);
    for layer in doc.layers() {
        if !layer.visible || layer.opacity <= 0.0 {
            continue;
        }
        let rendered = render_layer_region(layer, doc.size(), region, selection.as_ref())?;
        blend_into(&mut out, &rendered, layer.blend_mode);
    }
    Ok((region, out))
}

enum Job {
    Render(u64, Document),
    Shutdown,
}

/// Background compositor. Full-document renders run off-thread; a newer
/// request supersedes any in-flight or queued older one, whose result is
/// dropped instead of delivered.
pub struct CompositeScheduler {
    job_tx: mpsc::Sender<Job>,
    result_rx: mpsc::Receiver<(u64, Result<PixelBuffer>)>,
    generation: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl CompositeScheduler {
    pub fn new() -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel();
        let generation = Arc::new(AtomicU64::new(0));
        let latest = Arc::clone(&generation);

        let worker = thread::Builder::new()
            .name("compositor".into())
            .spawn(move || {
                while let Ok(mut job) = job_rx.recv() {
                    // Collapse the queue down to the newest pending job.
                    while let Ok(next) = job_rx.try_recv() {
                        job = next;
                    }
                    match job {
                        Job::Shutdown => break,
                        Job::Render(generation, doc) => {
                            if generation < latest.load(Ordering::Acquire) {
                                debug!("skipping superseded composite {generation}");
                                continue;
                            }
                            let result = composite(&doc);
                            if result_tx.send((generation, result)).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("spawn compositor thread");

        Self {
            job_tx,
            result_rx,
            generation,
            worker: Some(worker),
        }
    }

    /// Queue a full composite of a document snapshot. Returns the request
    /// generation.
    pub fn request(&self, doc: &Document) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self.job_tx.send(Job::Render(generation, doc.clone()));
        generation
    }

    /// Drain finished renders, returning the newest current one if any.
    /// Results from superseded generations are discarded.
    pub fn poll(&self) -> Option<(u64, Result<PixelBuffer>)> {
        let current = self.generation.load(Ordering::Acquire);
        let mut newest = None;
        while let Ok((generation, result)) = self.result_rx.try_recv() {
            if generation < current {
                debug!("dropping stale composite {generation}");
                continue;
            }
            newest = Some((generation, result));
        }
        newest
    }
}

impl Default for CompositeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompositeScheduler {
    fn drop(&mut self) {
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Layer, LayerTransform};
    use crate::pixel::Color;

    fn doc_with_source(source: PixelBuffer) -> Document {
        let (w, h) = source.size();
        let mut doc = Document::new(w, h).unwrap();
        let id = doc.alloc_id();
        let mut layer = Layer::new(id, "base");
        layer.source = Some(Arc::new(source));
        doc.push_layer(layer).unwrap();
        doc
    }

    #[test]
    fn identity_layer_reproduces_source_exactly() {
        let mut src = PixelBuffer::new(6, 5);
        src.set_pixel(2, 3, pixel::premultiply([200, 40, 90, 180]));
        src.set_pixel(0, 0, pixel::premultiply([1, 2, 3, 255]));
        let doc = doc_with_source(src.clone());
        let out = composite(&doc).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn multiply_by_white_is_identity() {
        let base = PixelBuffer::filled(3, 3, Color::rgba(37, 180, 92, 255));
        let mut doc = doc_with_source(base.clone());
        let id = doc.alloc_id();
        let mut white = Layer::new(id, "white");
        white.source = Some(Arc::new(PixelBuffer::filled(3, 3, Color::white())));
        white.blend_mode = BlendMode::Multiply;
        doc.push_layer(white).unwrap();
        let out = composite(&doc).unwrap();
        assert_eq!(out, base);
    }

    #[test]
    fn screen_with_black_is_identity() {
        let base = PixelBuffer::filled(3, 3, Color::rgba(37, 180, 92, 255));
        let mut doc = doc_with_source(base.clone());
        let id = doc.alloc_id();
        let mut black = Layer::new(id, "black");
        black.source = Some(Arc::new(PixelBuffer::filled(3, 3, Color::black())));
        black.blend_mode = BlendMode::Screen;
        doc.push_layer(black).unwrap();
        let out = composite(&doc).unwrap();
        assert_eq!(out, base);
    }

    #[test]
    fn opacity_scales_contribution() {
        let mut doc = doc_with_source(PixelBuffer::filled(2, 2, Color::white()));
        doc.layers_mut()[0].opacity = 0.5;
        let out = composite(&doc).unwrap();
        let a = out.pixel(0, 0)[3] as i32;
        assert!((a - 128).abs() <= 1, "alpha was {a}");
    }

    #[test]
    fn layer_order_is_not_commutative() {
        let red = PixelBuffer::filled(2, 2, Color::rgba(255, 0, 0, 255));
        let blue = PixelBuffer::filled(2, 2, Color::rgba(0, 0, 255, 255));

        let mut ab = doc_with_source(red.clone());
        let id = ab.alloc_id();
        let mut top = Layer::new(id, "top");
        top.source = Some(Arc::new(blue.clone()));
        ab.push_layer(top).unwrap();

        let mut ba = doc_with_source(blue);
        let id = ba.alloc_id();
        let mut top = Layer::new(id, "top");
        top.source = Some(Arc::new(red));
        ba.push_layer(top).unwrap();

        let out_ab = composite(&ab).unwrap();
        let out_ba = composite(&ba).unwrap();
        assert_eq!(out_ab.pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(out_ba.pixel(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn blend_pixel_matches_closed_forms() {
        let modes = [
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
        ];
        let colors: [[u8; 3]; 4] = [
            [30, 96, 200],
            [220, 140, 10],
            [128, 128, 128],
            [0, 255, 64],
        ];
        for mode in modes {
            for dst in colors {
                for src in colors {
                    for opacity in [0.0f32, 0.5, 1.0] {
                        let base = pixel::premultiply([dst[0], dst[1], dst[2], 255]);
                        let top = pixel::scale_alpha(
                            pixel::premultiply([src[0], src[1], src[2], 255]),
                            (opacity * 255.0 + 0.5) as u32,
                        );
                        let got = blend_pixel(mode, top, base);
                        if top[3] == 0 {
                            assert_eq!(got, base);
                            continue;
                        }
                        let ta = top[3] as f32 / 255.0;
                        for c in 0..3 {
                            let t = top[c] as f32 / top[3] as f32;
                            let b = base[c] as f32 / base[3] as f32;
                            let f = match mode {
                                BlendMode::Normal => t,
                                BlendMode::Multiply => t * b,
                                BlendMode::Screen => 1.0 - (1.0 - t) * (1.0 - b),
                                BlendMode::Overlay => {
                                    if b < 0.5 {
                                        2.0 * t * b
                                    } else {
                                        1.0 - 2.0 * (1.0 - t) * (1.0 - b)
                                    }
                                }
                            };
                            let want =
                                (f * ta + (base[c] as f32 / 255.0) * (1.0 - ta)) * 255.0;
                            assert!(
                                (got[c] as f32 - want).abs() <= 1.5,
                                "{mode:?} dst={dst:?} src={src:?} opacity={opacity}: \
                                 channel {c} got {} want {want}",
                                got[c]
                            );
                        }
                        assert!((got[3] as f32 - 255.0).abs() <= 1.0);
                    }
                }
            }
        }
    }

    #[test]
    fn overlay_reorder_differs_where_multiply_commutes() {
        let backdrop = PixelBuffer::filled(2, 2, Color::rgba(128, 128, 128, 255));
        let dark = PixelBuffer::filled(2, 2, Color::rgba(64, 64, 64, 255));
        let light = PixelBuffer::filled(2, 2, Color::rgba(192, 192, 192, 255));

        let build = |mode: BlendMode, first: &PixelBuffer, second: &PixelBuffer| {
            let mut doc = doc_with_source(backdrop.clone());
            for buf in [first, second] {
                let id = doc.alloc_id();
                let mut layer = Layer::new(id, "blend");
                layer.source = Some(Arc::new(buf.clone()));
                layer.blend_mode = mode;
                doc.push_layer(layer).unwrap();
            }
            composite(&doc).unwrap()
        };

        let mul_ab = build(BlendMode::Multiply, &dark, &light);
        let mul_ba = build(BlendMode::Multiply, &light, &dark);
        for (a, b) in mul_ab.as_bytes().iter().zip(mul_ba.as_bytes()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "multiply did not commute");
        }

        let ov_ab = build(BlendMode::Overlay, &dark, &light);
        let ov_ba = build(BlendMode::Overlay, &light, &dark);
        let diff = (ov_ab.pixel(0, 0)[0] as i32 - ov_ba.pixel(0, 0)[0] as i32).abs();
        assert!(
            diff > 10,
            "overlay order changed nothing: {:?} vs {:?}",
            ov_ab.pixel(0, 0),
            ov_ba.pixel(0, 0)
        );
    }

    #[test]
    fn selection_gates_adjustments() {
        use crate::adjustments::{AdjustmentNode, AdjustmentParams};
        use crate::selection::{Selection, SelectionShape};

        let base = PixelBuffer::filled(8, 8, Color::rgba(100, 100, 100, 255));
        let mut doc = doc_with_source(base.clone());
        doc.layers_mut()[0].adjustments.push(
            AdjustmentNode::new(AdjustmentParams::BrightnessContrast {
                brightness: 1.5,
                contrast: 1.0,
            })
            .unwrap(),
        );
        let adjusted = composite(&doc).unwrap();
        assert_ne!(adjusted.pixel(1, 1), base.pixel(1, 1));

        // Left half selected: only that half gets the adjustment.
        doc.selection = Selection {
            enabled: true,
            invert: false,
            shape: Some(SelectionShape::Rectangle {
                rect: Rect::new(0, 0, 4, 8),
            }),
            mask: None,
        };
        let gated = composite(&doc).unwrap();
        assert_eq!(gated.pixel(1, 1), adjusted.pixel(1, 1));
        assert_eq!(gated.pixel(6, 1), base.pixel(6, 1));

        doc.selection.invert = true;
        let flipped = composite(&doc).unwrap();
        assert_eq!(flipped.pixel(1, 1), base.pixel(1, 1));
        assert_eq!(flipped.pixel(6, 1), adjusted.pixel(6, 1));
    }

    #[test]
    fn selection_limits_color_key_removal() {
        use crate::mask::{ColorKeyMetric, ColorKeyRule};
        use crate::selection::{Selection, SelectionShape};

        let red = PixelBuffer::filled(8, 8, Color::rgba(255, 0, 0, 255));
        let mut doc = doc_with_source(red);
        doc.layers_mut()[0].color_key = Some(ColorKeyRule {
            palette: vec![[255, 0, 0]],
            metric: ColorKeyMetric::Rgb { tolerance: 30 },
            edge_softness: 0.0,
        });
        doc.selection = Selection {
            enabled: true,
            invert: false,
            shape: Some(SelectionShape::Rectangle {
                rect: Rect::new(0, 0, 4, 8),
            }),
            mask: None,
        };
        let out = composite(&doc).unwrap();
        assert_eq!(out.pixel(1, 1), [0, 0, 0, 0]);
        assert_eq!(out.pixel(6, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn region_composite_matches_full_composite() {
        let mut src = PixelBuffer::filled(8, 8, Color::rgba(10, 60, 200, 255));
        src.set_pixel(5, 5, pixel::premultiply([250, 1, 9, 255]));
        let doc = doc_with_source(src);
        let full = composite(&doc).unwrap();
        let (rect, patch) = composite_region(&doc, Rect::new(4, 4, 3, 3)).unwrap();
        assert_eq!(rect, Rect::new(4, 4, 3, 3));
        assert_eq!(patch, full.extract(rect));
    }

    #[test]
    fn missing_source_renders_transparent_placeholder() {
        let mut doc = Document::new(4, 4).unwrap();
        let id = doc.alloc_id();
        let mut layer = Layer::new(id, "ghost");
        layer.source_path = Some("/nonexistent/image.png".into());
        doc.push_layer(layer).unwrap();

        let mut cache = SourceCache::new();
        attach_sources(&mut doc, &mut cache);
        assert_eq!(doc.layers()[0].source_size(), Some((4, 4)));
        let out = composite(&doc).unwrap();
        assert!(out.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn paint_merges_over_transformed_source() {
        let mut doc = doc_with_source(PixelBuffer::filled(4, 4, Color::black()));
        let layer = &mut doc.layers_mut()[0];
        let paint = layer.paint_mut(4, 4);
        paint.set_pixel(1, 1, pixel::premultiply([255, 255, 255, 255]));
        let out = composite(&doc).unwrap();
        assert_eq!(out.pixel(1, 1), [255, 255, 255, 255]);
        assert_eq!(out.pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn translation_moves_source() {
        let mut src = PixelBuffer::new(4, 4);
        src.set_pixel(1, 1, [255, 255, 255, 255]);
        let mut doc = doc_with_source(src);
        doc.layers_mut()[0].transform = LayerTransform {
            offset: crate::geom::Vec2::new(1.0, 0.0),
            ..LayerTransform::default()
        };
        let out = composite(&doc).unwrap();
        assert_eq!(out.pixel(2, 1), [255, 255, 255, 255]);
        assert_eq!(out.pixel(1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn scheduler_delivers_latest_generation() {
        let doc_a = doc_with_source(PixelBuffer::filled(2, 2, Color::black()));
        let doc_b = doc_with_source(PixelBuffer::filled(2, 2, Color::white()));
        let expected = composite(&doc_b).unwrap();

        let scheduler = CompositeScheduler::new();
        scheduler.request(&doc_a);
        let generation = scheduler.request(&doc_b);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if let Some((done, result)) = scheduler.poll() {
                assert_eq!(done, generation);
                assert_eq!(result.unwrap(), expected);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "no composite arrived");
            thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}
