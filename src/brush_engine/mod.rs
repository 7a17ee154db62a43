//! Interactive stroke engine.
//!
//! A stroke runs against a working copy of its target map; the target is
//! never touched until [`BrushEngine::commit`] produces a delta, so a
//! cancelled stroke leaves no trace. Paint and erase build up flow into a
//! per-stroke accumulator capped at the stamp opacity; smudge and mixer
//! drag picked-up color along the stroke (on alpha maps they degrade to
//! plain paint).

pub mod brush;
pub mod stroke;

pub use brush::{BrushDynamics, BrushPreset, StampShape, ToolMode};
pub use stroke::{StampEvent, StrokeWalk};

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::error::{EngineError, Result};
use crate::geom::Rect;
use crate::input::{DeviceCaps, PointerSample};
use crate::mask::Mask;
use crate::pixel::{self, Pixel};

use brush::{StampMask, StampMaskCache};

/// A map a stroke can edit: a layer's color paint or an alpha mask.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PaintMap {
    Rgba(PixelBuffer),
    Alpha(Mask),
}

impl PaintMap {
    pub fn size(&self) -> (u32, u32) {
        match self {
            PaintMap::Rgba(b) => b.size(),
            PaintMap::Alpha(m) => m.size(),
        }
    }

    pub fn extract(&self, rect: Rect) -> PaintMap {
        match self {
            PaintMap::Rgba(b) => PaintMap::Rgba(b.extract(rect)),
            PaintMap::Alpha(m) => PaintMap::Alpha(m.extract(rect)),
        }
    }

    pub fn blit(&mut self, x: u32, y: u32, patch: &PaintMap) -> Result<()> {
        match (self, patch) {
            (PaintMap::Rgba(b), PaintMap::Rgba(p)) => b.blit(x, y, p),
            (PaintMap::Alpha(m), PaintMap::Alpha(p)) => m.blit(x, y, p),
            _ => Err(EngineError::State(
                "paint map kinds disagree".into(),
            )),
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            PaintMap::Rgba(b) => b.byte_size(),
            PaintMap::Alpha(m) => m.byte_size(),
        }
    }
}

/// The committed result of a stroke: the touched rectangle with its pixels
/// before and after. Applying and reverting are both plain blits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeDelta {
    pub rect: Rect,
    before: PaintMap,
    after: PaintMap,
}

impl StrokeDelta {
    pub fn apply(&self, target: &mut PaintMap) -> Result<()> {
        target.blit(self.rect.x as u32, self.rect.y as u32, &self.after)
    }

    pub fn revert(&self, target: &mut PaintMap) -> Result<()> {
        target.blit(self.rect.x as u32, self.rect.y as u32, &self.before)
    }

    pub fn byte_size(&self) -> usize {
        self.before.byte_size() + self.after.byte_size()
    }
}

struct ActiveStroke {
    preset: BrushPreset,
    caps: DeviceCaps,
    working: PaintMap,
    original: PaintMap,
    /// Per-pixel flow accumulation for this stroke, 0..1.
    acc: Vec<f32>,
    /// Color carried by smudge and mixer tools, premultiplied.
    picked: Option<Pixel>,
    dirty: Rect,
    walk: StrokeWalk,
}

/// Stroke state machine: idle until `begin_stroke`, then samples stream in
/// through `add_sample`, and the stroke ends in `commit` or `cancel`.
#[derive(Default)]
pub struct BrushEngine {
    cache: StampMaskCache,
    active: Option<ActiveStroke>,
}

impl BrushEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a stroke against a snapshot of `target`. `seed` drives jitter,
    /// so replaying the same samples with the same seed reproduces the
    /// stroke exactly.
    pub fn begin_stroke(
        &mut self,
        target: &PaintMap,
        preset: BrushPreset,
        caps: DeviceCaps,
        seed: u64,
    ) -> Result<()> {
        if self.active.is_some() {
            return Err(EngineError::State("stroke already active".into()));
        }
        preset.validate()?;
        let (w, h) = target.size();
        self.active = Some(ActiveStroke {
            preset,
            caps,
            working: target.clone(),
            original: target.clone(),
            acc: vec![0.0; w as usize * h as usize],
            picked: None,
            dirty: Rect::new(0, 0, 0, 0),
            walk: StrokeWalk::new(seed),
        });
        Ok(())
    }

    /// Feed one pointer sample. Returns the rectangle dirtied by this
    /// sample's stamps, if any, for incremental preview refresh.
    pub fn add_sample(&mut self, sample: &PointerSample) -> Result<Option<Rect>> {
        let mut active = self
            .active
            .take()
            .ok_or_else(|| EngineError::State("no active stroke".into()))?;

        let mut stamps = Vec::new();
        active.walk.add(&active.preset, &active.caps, sample, &mut stamps);

        let mut dirtied = Rect::new(0, 0, 0, 0);
        for ev in stamps {
            let dynamics = active.preset.dynamics;
            let size_factor = (1.0 - dynamics.pressure_size * (1.0 - ev.pressure))
                * (1.0 + dynamics.tilt_size * ev.tilt);
            let diameter = (active.preset.diameter * size_factor).max(0.5);
            let mask = self
                .cache
                .ensure(diameter, active.preset.hardness, active.preset.shape);
            let rect = stamp(&mut active, mask, &ev);
            dirtied = dirtied.union(rect);
        }

        if !dirtied.is_empty() {
            active.dirty = active.dirty.union(dirtied);
        }
        self.active = Some(active);
        Ok((!dirtied.is_empty()).then_some(dirtied))
    }

    /// The live working copy, for preview rendering.
    pub fn preview(&self) -> Result<&PaintMap> {
        self.active
            .as_ref()
            .map(|a| &a.working)
            .ok_or_else(|| EngineError::State("no active stroke".into()))
    }

    /// End the stroke and return its delta; `None` when nothing was
    /// touched. The caller applies the delta to the real target.
    pub fn commit(&mut self) -> Result<Option<StrokeDelta>> {
        let active = self
            .active
            .take()
            .ok_or_else(|| EngineError::State("no active stroke".into()))?;
        let (w, h) = active.working.size();
        let rect = active.dirty.clamp(w, h);
        if rect.is_empty() {
            return Ok(None);
        }
        Ok(Some(StrokeDelta {
            rect,
            before: active.original.extract(rect),
            after: active.working.extract(rect),
        }))
    }

    /// Abort the stroke. The target was never mutated, so there is nothing
    /// to roll back.
    pub fn cancel(&mut self) {
        self.active = None;
    }
}

/// Rasterize one stamp into the working copy. Returns the clipped
/// rectangle it touched.
fn stamp(active: &mut ActiveStroke, mask: &StampMask, ev: &StampEvent) -> Rect {
    let (w, h) = active.working.size();
    let r = mask.radius;
    let x0 = (ev.pos.x - r).floor() as i32;
    let y0 = (ev.pos.y - r).floor() as i32;
    let bounds = Rect::new(x0, y0, mask.size as u32, mask.size as u32).clamp(w, h);
    if bounds.is_empty() {
        return bounds;
    }

    let dyn_opacity = 1.0 - active.preset.dynamics.pressure_opacity * (1.0 - ev.pressure);
    let cap = active.preset.opacity;
    let add_scale = (active.preset.flow / 100.0) * dyn_opacity * cap;

    let tool = match (&active.working, active.preset.tool) {
        (PaintMap::Alpha(_), ToolMode::Smudge | ToolMode::Mixer) => ToolMode::Paint,
        (_, t) => t,
    };

    // Smudge drags what is already on the working map; mixer picks up from
    // the untouched map so its own deposits never feed back.
    let center = match tool {
        ToolMode::Mixer => sample_center(&active.original, ev),
        _ => sample_center(&active.working, ev),
    };

    let color = match tool {
        ToolMode::Mixer => {
            let picked = active.picked.unwrap_or(center);
            mix_colors(active.preset.color.to_pixel(), picked, active.preset.color_mix)
        }
        _ => active.preset.color.to_pixel(),
    };

    for gy in bounds.y..bounds.bottom() {
        let my = ((gy as f32 + 0.5 - ev.pos.y + r).floor()) as isize;
        if my < 0 || my >= mask.size as isize {
            continue;
        }
        let mask_row = my as usize * mask.size;
        for gx in bounds.x..bounds.right() {
            let mx = ((gx as f32 + 0.5 - ev.pos.x + r).floor()) as isize;
            if mx < 0 || mx >= mask.size as isize {
                continue;
            }
            let m = mask.data[mask_row + mx as usize];
            if m <= 0.0 {
                continue;
            }
            let (gx, gy) = (gx as u32, gy as u32);
            let i = gy as usize * w as usize + gx as usize;

            match tool {
                ToolMode::Paint | ToolMode::Mixer => {
                    active.acc[i] = (active.acc[i] + m * add_scale).min(cap);
                    let a = active.acc[i];
                    match (&mut active.working, &active.original) {
                        (PaintMap::Rgba(work), PaintMap::Rgba(orig)) => {
                            let src = pixel::scale_alpha(color, (a * 255.0 + 0.5) as u32);
                            work.set_pixel(gx, gy, pixel::alpha_over(src, orig.pixel(gx, gy)));
                        }
                        (PaintMap::Alpha(work), PaintMap::Alpha(orig)) => {
                            let o = orig.get(gx, gy) as f32;
                            work.set(gx, gy, (o + (255.0 - o) * a + 0.5) as u8);
                        }
                        _ => unreachable!("working and original share a kind"),
                    }
                }
                ToolMode::Erase => {
                    active.acc[i] = (active.acc[i] + m * add_scale).min(cap);
                    let keep = ((1.0 - active.acc[i]) * 255.0 + 0.5) as u32;
                    match (&mut active.working, &active.original) {
                        (PaintMap::Rgba(work), PaintMap::Rgba(orig)) => {
                            work.set_pixel(gx, gy, pixel::scale_alpha(orig.pixel(gx, gy), keep));
                        }
                        (PaintMap::Alpha(work), PaintMap::Alpha(orig)) => {
                            let o = orig.get(gx, gy) as u32;
                            work.set(gx, gy, ((o * keep + 127) / 255) as u8);
                        }
                        _ => unreachable!("working and original share a kind"),
                    }
                }
                ToolMode::Smudge => {
                    let f = m * active.preset.smudge_strength * dyn_opacity;
                    if let (PaintMap::Rgba(work), Some(picked)) =
                        (&mut active.working, active.picked)
                    {
                        let dst = work.pixel(gx, gy);
                        work.set_pixel(gx, gy, lerp_pixel(dst, picked, f));
                    }
                }
            }
        }
    }

    // Carry color forward for the next stamp. Smudge picks up what it just
    // blended so the drag keeps feeding itself; mixer blends its carried
    // color toward what lies under each stamp.
    match tool {
        ToolMode::Smudge => active.picked = Some(sample_center(&active.working, ev)),
        ToolMode::Mixer => {
            active.picked = Some(match active.picked {
                Some(p) => lerp_pixel(p, center, active.preset.color_mix),
                None => center,
            });
        }
        _ => {}
    }
    bounds
}

fn sample_center(map: &PaintMap, ev: &StampEvent) -> Pixel {
    let (w, h) = map.size();
    let x = (ev.pos.x.floor() as i64).clamp(0, w as i64 - 1) as u32;
    let y = (ev.pos.y.floor() as i64).clamp(0, h as i64 - 1) as u32;
    match map {
        PaintMap::Rgba(b) => b.pixel(x, y),
        PaintMap::Alpha(m) => {
            let v = m.get(x, y);
            [v, v, v, v]
        }
    }
}

fn lerp_pixel(a: Pixel, b: Pixel, t: f32) -> Pixel {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t + 0.5) as u8;
    }
    out
}

fn mix_colors(brush: Pixel, picked: Pixel, mix: f32) -> Pixel {
    // Mix straight colors; a transparent pickup contributes nothing.
    if picked[3] == 0 {
        return brush;
    }
    let bs = pixel::unpremultiply(brush);
    let ps = pixel::unpremultiply(picked);
    let mut out = [0u8; 4];
    for c in 0..3 {
        out[c] = (bs[c] as f32 + (ps[c] as f32 - bs[c] as f32) * mix + 0.5) as u8;
    }
    out[3] = bs[3];
    pixel::premultiply(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::Color;

    fn target(w: u32, h: u32) -> PaintMap {
        PaintMap::Rgba(PixelBuffer::new(w, h))
    }

    fn preset() -> BrushPreset {
        let mut p = BrushPreset::new("test", 8.0, 80.0, Color::rgba(200, 30, 30, 255));
        p.spacing = 25.0;
        p
    }

    fn drag(engine: &mut BrushEngine, from: (f32, f32), to: (f32, f32)) -> Option<Rect> {
        let mut dirty = None;
        for (i, t) in [0.0f32, 0.25, 0.5, 0.75, 1.0].iter().enumerate() {
            let x = from.0 + (to.0 - from.0) * t;
            let y = from.1 + (to.1 - from.1) * t;
            let s = PointerSample::at(x, y, i as u64 * 8);
            if let Some(r) = engine.add_sample(&s).unwrap() {
                dirty = Some(dirty.map_or(r, |d: Rect| d.union(r)));
            }
        }
        dirty
    }

    #[test]
    fn stroke_state_machine_is_enforced() {
        let mut engine = BrushEngine::new();
        assert!(matches!(
            engine.add_sample(&PointerSample::at(0.0, 0.0, 0)),
            Err(EngineError::State(_))
        ));
        let t = target(16, 16);
        engine
            .begin_stroke(&t, preset(), DeviceCaps::MOUSE, 1)
            .unwrap();
        assert!(matches!(
            engine.begin_stroke(&t, preset(), DeviceCaps::MOUSE, 1),
            Err(EngineError::State(_))
        ));
        engine.cancel();
        assert!(engine.commit().is_err());
    }

    #[test]
    fn cancel_never_touches_target() {
        let t = target(16, 16);
        let pristine = t.clone();
        let mut engine = BrushEngine::new();
        engine
            .begin_stroke(&t, preset(), DeviceCaps::MOUSE, 1)
            .unwrap();
        drag(&mut engine, (2.0, 2.0), (13.0, 13.0));
        assert_ne!(*engine.preview().unwrap(), pristine);
        engine.cancel();
        assert_eq!(t, pristine);
    }

    #[test]
    fn commit_delta_applies_and_reverts() {
        let mut t = target(16, 16);
        let pristine = t.clone();
        let mut engine = BrushEngine::new();
        engine
            .begin_stroke(&t, preset(), DeviceCaps::MOUSE, 1)
            .unwrap();
        drag(&mut engine, (2.0, 2.0), (13.0, 13.0));
        let preview = engine.preview().unwrap().clone();
        let delta = engine.commit().unwrap().expect("stroke touched pixels");

        delta.apply(&mut t).unwrap();
        assert_eq!(t, preview);
        delta.revert(&mut t).unwrap();
        assert_eq!(t, pristine);
    }

    #[test]
    fn same_seed_reproduces_identical_pixels() {
        let t = target(32, 32);
        let mut p = preset();
        p.jitter = 2.0;

        let run = |seed| {
            let mut engine = BrushEngine::new();
            engine
                .begin_stroke(&t, p.clone(), DeviceCaps::MOUSE, seed)
                .unwrap();
            drag(&mut engine, (4.0, 4.0), (28.0, 20.0));
            engine.commit().unwrap().unwrap()
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }

    #[test]
    fn flow_buildup_caps_at_stamp_opacity() {
        let t = target(16, 16);
        let mut p = preset();
        p.flow = 20.0;
        p.opacity = 0.6;
        let mut engine = BrushEngine::new();
        engine
            .begin_stroke(&t, p, DeviceCaps::MOUSE, 1)
            .unwrap();
        // Scrub back and forth over the same spot.
        for _ in 0..6 {
            drag(&mut engine, (8.0, 8.0), (9.0, 8.0));
            drag(&mut engine, (9.0, 8.0), (8.0, 8.0));
        }
        let PaintMap::Rgba(work) = engine.preview().unwrap() else {
            unreachable!()
        };
        let max_a = work.as_bytes().chunks_exact(4).map(|p| p[3]).max().unwrap();
        assert!(max_a <= 154, "alpha built past the cap: {max_a}");
        assert!(max_a >= 150, "buildup never reached the cap: {max_a}");
    }

    #[test]
    fn pixels_outside_reported_dirty_rect_are_untouched() {
        let t = target(32, 32);
        let mut engine = BrushEngine::new();
        engine
            .begin_stroke(&t, preset(), DeviceCaps::MOUSE, 1)
            .unwrap();
        let dirty = drag(&mut engine, (8.0, 8.0), (12.0, 12.0)).unwrap();
        let PaintMap::Rgba(work) = engine.preview().unwrap() else {
            unreachable!()
        };
        for y in 0..32 {
            for x in 0..32 {
                if !dirty.contains(x as i32, y as i32) {
                    assert_eq!(work.pixel(x, y), [0, 0, 0, 0], "leak at {x},{y}");
                }
            }
        }
    }

    #[test]
    fn erase_reduces_alpha_on_alpha_maps() {
        let t = PaintMap::Alpha(Mask::new(16, 16, 255));
        let mut p = preset();
        p.tool = ToolMode::Erase;
        let mut engine = BrushEngine::new();
        engine.begin_stroke(&t, p, DeviceCaps::MOUSE, 1).unwrap();
        drag(&mut engine, (8.0, 8.0), (8.0, 8.0));
        let PaintMap::Alpha(work) = engine.preview().unwrap() else {
            unreachable!()
        };
        assert!(work.get(8, 8) < 255);
        assert_eq!(work.get(0, 0), 255);
    }

    #[test]
    fn mixer_pickup_follows_the_stroke() {
        let mut buf = PixelBuffer::new(32, 16);
        for y in 0..16 {
            for x in 0..32 {
                let px = if x < 16 {
                    [255, 0, 0, 255]
                } else {
                    [0, 0, 255, 255]
                };
                buf.set_pixel(x, y, px);
            }
        }
        let t = PaintMap::Rgba(buf);
        let mut p = preset();
        p.tool = ToolMode::Mixer;
        p.color_mix = 1.0;
        p.flow = 100.0;
        p.opacity = 1.0;
        let mut engine = BrushEngine::new();
        engine.begin_stroke(&t, p, DeviceCaps::MOUSE, 1).unwrap();
        drag(&mut engine, (4.0, 8.0), (28.0, 8.0));
        let PaintMap::Rgba(work) = engine.preview().unwrap() else {
            unreachable!()
        };
        // Deposits near the stroke end carry the blue picked up along the
        // way, not the red from the stroke start.
        let end = work.pixel(27, 8);
        assert!(
            end[2] > end[0],
            "pickup stuck at the stroke start: {end:?}"
        );
    }

    #[test]
    fn smudge_drags_color_forward() {
        let mut buf = PixelBuffer::new(32, 16);
        for y in 0..16 {
            for x in 0..8 {
                buf.set_pixel(x, y, [255, 0, 0, 255]);
            }
        }
        let t = PaintMap::Rgba(buf);
        let mut p = preset();
        p.tool = ToolMode::Smudge;
        p.smudge_strength = 1.0;
        let mut engine = BrushEngine::new();
        engine.begin_stroke(&t, p, DeviceCaps::MOUSE, 1).unwrap();
        drag(&mut engine, (6.0, 8.0), (16.0, 8.0));
        let PaintMap::Rgba(work) = engine.preview().unwrap() else {
            unreachable!()
        };
        // Red got pulled past the original boundary at x = 8.
        assert!(work.pixel(10, 8)[0] > 0);
    }
}
