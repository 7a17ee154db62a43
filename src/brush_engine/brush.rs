//! Brush presets and the cached stamp mask.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::pixel::Color;

/// What a stroke does to its target map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToolMode {
    #[default]
    Paint,
    Erase,
    /// Drag existing color along the stroke.
    Smudge,
    /// Paint with the brush color mixed against picked-up color.
    Mixer,
}

/// Footprint of a single stamp.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum StampShape {
    Round,
    /// Elliptical nib at a fixed angle; `roundness` is the minor/major
    /// axis ratio.
    Calligraphy { angle_deg: f32, roundness: f32 },
    /// Round stamp modulated by deterministic grain.
    Textured { strength: f32 },
}

impl Default for StampShape {
    fn default() -> Self {
        StampShape::Round
    }
}

/// How much pressure and tilt modulate the stamp, each 0 (ignore) to 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrushDynamics {
    pub pressure_size: f32,
    pub pressure_opacity: f32,
    pub tilt_size: f32,
}

impl BrushDynamics {
    fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("pressure_size", self.pressure_size),
            ("pressure_opacity", self.pressure_opacity),
            ("tilt_size", self.tilt_size),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(EngineError::Validation(format!(
                    "dynamics {name} {v} outside 0..1"
                )));
            }
        }
        Ok(())
    }
}

/// User-facing brush configuration. Presets are validated when loaded, so
/// the stroke hot path never re-checks ranges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushPreset {
    pub name: String,
    pub tool: ToolMode,
    pub shape: StampShape,
    pub diameter: f32,
    pub hardness: f32, // 0..100
    pub spacing: f32,  // Percentage of diameter
    pub flow: f32,     // 0..100
    pub opacity: f32,  // 0..1
    pub color: Color,
    pub jitter: f32,     // px
    pub stabilizer: f32, // 0..1 (0 = off, 1 = max smoothing)
    pub smudge_strength: f32,
    pub color_mix: f32,
    pub dynamics: BrushDynamics,
}

impl BrushPreset {
    /// A standard round paint brush.
    pub fn new(name: impl Into<String>, diameter: f32, hardness: f32, color: Color) -> Self {
        Self {
            name: name.into(),
            tool: ToolMode::Paint,
            shape: StampShape::Round,
            diameter,
            hardness,
            spacing: 15.0,
            flow: 100.0,
            opacity: 1.0,
            color,
            jitter: 0.0,
            stabilizer: 0.0,
            smudge_strength: 0.5,
            color_mix: 0.5,
            dynamics: BrushDynamics::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::Validation(msg));
        if !self.diameter.is_finite() || !(0.5..=1024.0).contains(&self.diameter) {
            return fail(format!("diameter {} outside 0.5..1024", self.diameter));
        }
        if !(0.0..=100.0).contains(&self.hardness) {
            return fail(format!("hardness {} outside 0..100", self.hardness));
        }
        if !(1.0..=1000.0).contains(&self.spacing) {
            return fail(format!("spacing {} outside 1..1000", self.spacing));
        }
        if !(0.0..=100.0).contains(&self.flow) {
            return fail(format!("flow {} outside 0..100", self.flow));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return fail(format!("opacity {} outside 0..1", self.opacity));
        }
        if !(0.0..=64.0).contains(&self.jitter) {
            return fail(format!("jitter {} outside 0..64", self.jitter));
        }
        if !(0.0..=1.0).contains(&self.stabilizer) {
            return fail(format!("stabilizer {} outside 0..1", self.stabilizer));
        }
        if !(0.0..=1.0).contains(&self.smudge_strength) {
            return fail(format!(
                "smudge strength {} outside 0..1",
                self.smudge_strength
            ));
        }
        if !(0.0..=1.0).contains(&self.color_mix) {
            return fail(format!("color mix {} outside 0..1", self.color_mix));
        }
        match self.shape {
            StampShape::Calligraphy { roundness, .. } => {
                if !(0.05..=1.0).contains(&roundness) {
                    return fail(format!("nib roundness {roundness} outside 0.05..1"));
                }
            }
            StampShape::Textured { strength } => {
                if !(0.0..=1.0).contains(&strength) {
                    return fail(format!("texture strength {strength} outside 0..1"));
                }
            }
            StampShape::Round => {}
        }
        self.dynamics.validate()
    }
}

/// One rasterized stamp footprint, coverage per texel in 0..1.
#[derive(Clone, Debug)]
pub struct StampMask {
    pub size: usize,
    pub radius: f32,
    pub data: Vec<f32>,
}

/// Cached stamp mask, rebuilt only when diameter, hardness or shape change.
#[derive(Clone, Debug, Default)]
pub struct StampMaskCache {
    key: Option<(f32, f32, StampShape)>,
    mask: Option<StampMask>,
}

impl StampMaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a mask exists for the given parameters and return it.
    pub fn ensure(&mut self, diameter: f32, hardness: f32, shape: StampShape) -> &StampMask {
        let stale = match self.key {
            Some((d, h, s)) => {
                (d - diameter).abs() > f32::EPSILON
                    || (h - hardness).abs() > f32::EPSILON
                    || s != shape
            }
            None => true,
        };
        if stale {
            self.mask = Some(build_mask(diameter, hardness, shape));
            self.key = Some((diameter, hardness, shape));
        }
        self.mask.as_ref().unwrap()
    }
}

fn build_mask(diameter: f32, hardness: f32, shape: StampShape) -> StampMask {
    let r = diameter / 2.0;
    let r_ceil = r.ceil() as usize;
    let size = r_ceil * 2 + 2; // little padding for fractional centers
    let hardness = (hardness / 100.0).clamp(0.0, 0.999);

    let (sin, cos, inv_roundness) = match shape {
        StampShape::Calligraphy { angle_deg, roundness } => {
            let (s, c) = angle_deg.to_radians().sin_cos();
            (s, c, 1.0 / roundness)
        }
        _ => (0.0, 1.0, 1.0),
    };

    let mut data = Vec::with_capacity(size * size);
    for y in 0..size {
        let dy = y as f32 + 0.5 - r;
        for x in 0..size {
            let dx = x as f32 + 0.5 - r;

            // Distance in the nib frame; for round shapes this is plain
            // Euclidean distance.
            let ax = dx * cos + dy * sin;
            let ay = (-dx * sin + dy * cos) * inv_roundness;
            let dist = (ax * ax + ay * ay).sqrt();

            let t = dist / r;
            if t > 1.0 {
                data.push(0.0);
                continue;
            }
            let mut alpha = if t < hardness {
                1.0
            } else {
                let v = (t - hardness) / (1.0 - hardness);
                (1.0 - v.clamp(0.0, 1.0)).max(0.0).powf(1.5)
            };
            if let StampShape::Textured { strength } = shape {
                alpha *= 1.0 - strength * grain(x as u32, y as u32);
            }
            data.push(alpha);
        }
    }

    StampMask {
        size,
        radius: r,
        data,
    }
}

/// Deterministic per-texel grain in 0..1 (splitmix-style hash).
fn grain(x: u32, y: u32) -> f32 {
    let mut z = (((x as u64) << 32) | y as u64).wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^= z >> 31;
    (z & 0xffff) as f32 / 65535.0
}
