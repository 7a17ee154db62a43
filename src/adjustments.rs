//! Ordered, toggleable parametric filter nodes applied to a pixel buffer.
//!
//! Each node type is a tagged variant carrying its own strongly-typed
//! parameter payload. Payloads validate against their declared ranges
//! before acceptance; out-of-range values are rejected, never clamped.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::error::{EngineError, Result};
use crate::mask::Mask;
use crate::pixel;

/// Parameter payload for one adjustment type.
///
/// Numeric semantics are fixed per variant so golden-image output is stable:
/// pointwise math runs on straight-alpha channels in 0..255 floats, matching
/// the documented formulas below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AdjustmentParams {
    /// `rgb = (rgb * brightness - 127.5) * contrast + 127.5`.
    BrightnessContrast { brightness: f32, contrast: f32 },
    /// HSV rotation and scale: hue shifted by `hue_deg`, saturation scaled,
    /// value offset by `lightness`.
    HueSaturation {
        hue_deg: f32,
        saturation: f32,
        lightness: f32,
    },
    /// Piecewise-linear remap of [in_black, in_white] onto
    /// [out_black, out_white] with a gamma midpoint, as a 256-entry LUT.
    Levels {
        in_black: u8,
        in_white: u8,
        gamma: f32,
        out_black: u8,
        out_white: u8,
    },
    /// Per-channel curve through control points with strictly increasing x,
    /// interpolated linearly into a 256-entry LUT.
    Curves { points: Vec<(u8, u8)> },
    /// Saturation boost weighted toward low-saturation pixels.
    Vibrance { amount: f32 },
    /// Warm/cool shift: `r += shift * 1.25`, `b -= shift * 1.25`.
    Temperature { shift: i32 },
    /// `rgb = (rgb/255) ^ (1/gamma) * 255`.
    Gamma { gamma: f32 },
    /// Separable box blur of the given radius on premultiplied channels.
    Blur { radius: u32 },
}

impl AdjustmentParams {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BrightnessContrast { .. } => "brightness/contrast",
            Self::HueSaturation { .. } => "hue/saturation",
            Self::Levels { .. } => "levels",
            Self::Curves { .. } => "curves",
            Self::Vibrance { .. } => "vibrance",
            Self::Temperature { .. } => "temperature",
            Self::Gamma { .. } => "gamma",
            Self::Blur { .. } => "blur",
        }
    }

    /// Check the payload against this type's declared ranges.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::Validation(msg));
        match self {
            Self::BrightnessContrast { brightness, contrast } => {
                if !(0.1..=4.0).contains(brightness) {
                    return fail(format!("brightness {brightness} outside 0.1..4"));
                }
                if !(0.1..=4.0).contains(contrast) {
                    return fail(format!("contrast {contrast} outside 0.1..4"));
                }
            }
            Self::HueSaturation {
                hue_deg,
                saturation,
                lightness,
            } => {
                if !(-180.0..=180.0).contains(hue_deg) {
                    return fail(format!("hue {hue_deg} outside -180..180"));
                }
                if !(0.0..=4.0).contains(saturation) {
                    return fail(format!("saturation {saturation} outside 0..4"));
                }
                if !(-1.0..=1.0).contains(lightness) {
                    return fail(format!("lightness {lightness} outside -1..1"));
                }
            }
            Self::Levels {
                in_black,
                in_white,
                gamma,
                ..
            } => {
                if in_black >= in_white {
                    return fail(format!(
                        "levels input range [{in_black}, {in_white}] is empty"
                    ));
                }
                if !(0.1..=10.0).contains(gamma) {
                    return fail(format!("levels gamma {gamma} outside 0.1..10"));
                }
            }
            Self::Curves { points } => {
                if points.is_empty() {
                    return fail("curves needs at least one control point".into());
                }
                for pair in points.windows(2) {
                    if pair[1].0 <= pair[0].0 {
                        return fail(format!(
                            "curve x values must strictly increase ({} then {})",
                            pair[0].0, pair[1].0
                        ));
                    }
                }
            }
            Self::Vibrance { amount } => {
                if !(0.0..=4.0).contains(amount) {
                    return fail(format!("vibrance {amount} outside 0..4"));
                }
            }
            Self::Temperature { shift } => {
                if !(-100..=100).contains(shift) {
                    return fail(format!("temperature {shift} outside -100..100"));
                }
            }
            Self::Gamma { gamma } => {
                if !(0.1..=10.0).contains(gamma) {
                    return fail(format!("gamma {gamma} outside 0.1..10"));
                }
            }
            Self::Blur { radius } => {
                if *radius > 256 {
                    return fail(format!("blur radius {radius} exceeds 256"));
                }
            }
        }
        Ok(())
    }

    /// Padding the node needs around a region of interest (spatial nodes
    /// read neighbors).
    pub fn padding(&self) -> u32 {
        match self {
            Self::Blur { radius } => *radius,
            _ => 0,
        }
    }
}

/// One filter stage: payload, enabled flag, optional gating mask.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentNode {
    pub params: AdjustmentParams,
    pub enabled: bool,
    /// Restricts the node's effect: output is lerped against input using
    /// this mask as the per-pixel factor.
    pub mask: Option<Mask>,
}

impl AdjustmentNode {
    /// Validate and wrap a payload into an enabled node.
    pub fn new(params: AdjustmentParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            enabled: true,
            mask: None,
        })
    }
}

/// Ordered stack of adjustment nodes. Order is user-controlled and explicit;
/// reordering is a first-class operation recorded in history by the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentStack {
    nodes: Vec<AdjustmentNode>,
}

impl AdjustmentStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[AdjustmentNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Append a validated node.
    pub fn push(&mut self, node: AdjustmentNode) {
        self.nodes.push(node);
    }

    pub fn remove(&mut self, index: usize) -> Result<AdjustmentNode> {
        if index >= self.nodes.len() {
            return Err(EngineError::Validation(format!(
                "adjustment index {index} out of range"
            )));
        }
        Ok(self.nodes.remove(index))
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        match self.nodes.get_mut(index) {
            Some(n) => {
                n.enabled = enabled;
                Ok(())
            }
            None => Err(EngineError::Validation(format!(
                "adjustment index {index} out of range"
            ))),
        }
    }

    /// Move the node at `from` to position `to`.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.nodes.len() || to >= self.nodes.len() {
            return Err(EngineError::Validation(format!(
                "reorder {from}->{to} out of range for {} nodes",
                self.nodes.len()
            )));
        }
        let node = self.nodes.remove(from);
        self.nodes.insert(to, node);
        Ok(())
    }

    /// Replace the whole node list (used by undo/redo).
    pub fn set_nodes(&mut self, nodes: Vec<AdjustmentNode>) {
        self.nodes = nodes;
    }

    /// Largest spatial padding any enabled node needs.
    pub fn padding(&self) -> u32 {
        self.nodes
            .iter()
            .filter(|n| n.enabled)
            .map(|n| n.params.padding())
            .max()
            .unwrap_or(0)
    }

    /// Apply nodes in stack order. Each node receives the previous node's
    /// output; masked nodes blend their output against their input.
    ///
    /// An empty or fully-disabled stack returns input bit-identically.
    pub fn apply(&self, buffer: &PixelBuffer, selection: Option<&Mask>) -> Result<PixelBuffer> {
        let mut current = buffer.clone();
        for node in self.nodes.iter().filter(|n| n.enabled) {
            if let Some(mask) = &node.mask {
                if mask.size() != current.size() {
                    return Err(EngineError::dimensions(current.size(), mask.size()));
                }
            }
            if let Some(sel) = selection {
                if sel.size() != current.size() {
                    return Err(EngineError::dimensions(current.size(), sel.size()));
                }
            }
            let output = apply_params(&node.params, &current);
            current = gate(current, output, node.mask.as_ref(), selection);
        }
        Ok(current)
    }
}

/// Blend `output` over `input` using the node mask and selection as
/// per-pixel interpolation factors; outside both, the input shows through.
fn gate(
    input: PixelBuffer,
    output: PixelBuffer,
    mask: Option<&Mask>,
    selection: Option<&Mask>,
) -> PixelBuffer {
    if mask.is_none() && selection.is_none() {
        return output;
    }
    let mut out = input;
    let width = out.width() as usize;
    out.as_bytes_mut()
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let mut factor = 255u32;
                if let Some(m) = mask {
                    factor = factor * m.get(x as u32, y as u32) as u32 / 255;
                }
                if let Some(s) = selection {
                    factor = factor * s.get(x as u32, y as u32) as u32 / 255;
                }
                if factor == 0 {
                    continue;
                }
                let np = output.pixel(x as u32, y as u32);
                let i = x * 4;
                for c in 0..4 {
                    let old = row[i + c] as u32;
                    let new = np[c] as u32;
                    row[i + c] = ((old * (255 - factor) + new * factor + 127) / 255) as u8;
                }
            }
        });
    out
}

fn apply_params(params: &AdjustmentParams, input: &PixelBuffer) -> PixelBuffer {
    match params {
        AdjustmentParams::Blur { radius } => box_blur(input, *radius),
        AdjustmentParams::Levels {
            in_black,
            in_white,
            gamma,
            out_black,
            out_white,
        } => {
            let lut = levels_lut(*in_black, *in_white, *gamma, *out_black, *out_white);
            apply_lut(input, &lut)
        }
        AdjustmentParams::Curves { points } => {
            let lut = curves_lut(points);
            apply_lut(input, &lut)
        }
        AdjustmentParams::BrightnessContrast { brightness, contrast } => {
            let (b, c) = (*brightness, *contrast);
            pointwise(input, move |rgb| {
                rgb.map(|v| (v * b - 127.5) * c + 127.5)
            })
        }
        AdjustmentParams::HueSaturation {
            hue_deg,
            saturation,
            lightness,
        } => {
            let (hd, sat, li) = (*hue_deg, *saturation, *lightness);
            pointwise(input, move |rgb| {
                let c = pixel::Color {
                    r: rgb[0] / 255.0,
                    g: rgb[1] / 255.0,
                    b: rgb[2] / 255.0,
                    a: 1.0,
                };
                let (h, s, v, _) = c.to_hsva();
                let shifted = pixel::Color::from_hsva(
                    h + hd / 360.0,
                    (s * sat).clamp(0.0, 1.0),
                    (v + li).clamp(0.0, 1.0),
                    1.0,
                );
                [shifted.r * 255.0, shifted.g * 255.0, shifted.b * 255.0]
            })
        }
        AdjustmentParams::Vibrance { amount } => {
            let v = *amount;
            pointwise(input, move |rgb| {
                let luma = rgb[0] * 0.299 + rgb[1] * 0.587 + rgb[2] * 0.114;
                let maxc = rgb[0].max(rgb[1]).max(rgb[2]);
                let minc = rgb[0].min(rgb[1]).min(rgb[2]);
                let sat = ((maxc - minc) / 255.0).clamp(0.0, 1.0);
                let amt = (v - 1.0) * (1.0 - sat);
                rgb.map(|ch| luma + (ch - luma) * (1.0 + amt))
            })
        }
        AdjustmentParams::Temperature { shift } => {
            let s = *shift as f32 * 1.25;
            pointwise(input, move |rgb| [rgb[0] + s, rgb[1], rgb[2] - s])
        }
        AdjustmentParams::Gamma { gamma } => {
            let inv = 1.0 / *gamma;
            pointwise(input, move |rgb| {
                rgb.map(|v| (v / 255.0).clamp(0.0, 1.0).powf(inv) * 255.0)
            })
        }
    }
}

/// Run a straight-alpha RGB transform over every pixel. Channels are f32 in
/// 0..255; alpha passes through untouched.
fn pointwise<F>(input: &PixelBuffer, transform: F) -> PixelBuffer
where
    F: Fn([f32; 3]) -> [f32; 3] + Sync,
{
    let mut out = input.clone();
    let width = input.width() as usize;
    out.as_bytes_mut()
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..width {
                let i = x * 4;
                let straight = pixel::unpremultiply([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                let rgb = transform([
                    straight[0] as f32,
                    straight[1] as f32,
                    straight[2] as f32,
                ]);
                let clamped = [
                    rgb[0].round().clamp(0.0, 255.0) as u8,
                    rgb[1].round().clamp(0.0, 255.0) as u8,
                    rgb[2].round().clamp(0.0, 255.0) as u8,
                    straight[3],
                ];
                let p = pixel::premultiply(clamped);
                row[i..i + 4].copy_from_slice(&p);
            }
        });
    out
}

fn apply_lut(input: &PixelBuffer, lut: &[u8; 256]) -> PixelBuffer {
    let mut out = input.clone();
    let width = input.width() as usize;
    out.as_bytes_mut()
        .par_chunks_mut(width * 4)
        .for_each(|row| {
            for chunk in row.chunks_exact_mut(4) {
                let straight =
                    pixel::unpremultiply([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let mapped = [
                    lut[straight[0] as usize],
                    lut[straight[1] as usize],
                    lut[straight[2] as usize],
                    straight[3],
                ];
                chunk.copy_from_slice(&pixel::premultiply(mapped));
            }
        });
    out
}

fn levels_lut(in_black: u8, in_white: u8, gamma: f32, out_black: u8, out_white: u8) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let in_lo = in_black as f32;
    let in_hi = in_white as f32;
    let out_lo = out_black as f32;
    let out_hi = out_white as f32;
    let inv_gamma = 1.0 / gamma;
    for (v, slot) in lut.iter_mut().enumerate() {
        let t = ((v as f32 - in_lo) / (in_hi - in_lo)).clamp(0.0, 1.0);
        let t = t.powf(inv_gamma);
        *slot = (out_lo + t * (out_hi - out_lo)).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

fn curves_lut(points: &[(u8, u8)]) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let v = v as f32;
        let first = points[0];
        let last = points[points.len() - 1];
        *slot = if v <= first.0 as f32 {
            first.1
        } else if v >= last.0 as f32 {
            last.1
        } else {
            let mut out = last.1 as f32;
            for pair in points.windows(2) {
                let (x0, y0) = (pair[0].0 as f32, pair[0].1 as f32);
                let (x1, y1) = (pair[1].0 as f32, pair[1].1 as f32);
                if v >= x0 && v <= x1 {
                    let t = (v - x0) / (x1 - x0);
                    out = y0 + t * (y1 - y0);
                    break;
                }
            }
            out.round().clamp(0.0, 255.0) as u8
        };
    }
    lut
}

/// Separable box blur on premultiplied channels so transparent regions do
/// not darken edges.
fn box_blur(input: &PixelBuffer, radius: u32) -> PixelBuffer {
    if radius == 0 {
        return input.clone();
    }
    let (w, h) = input.size();
    if w == 0 || h == 0 {
        return input.clone();
    }
    let r = radius as i64;
    let width = w as usize;
    let height = h as usize;

    let src = input.as_bytes();
    let mut tmp = vec![0u8; src.len()];
    tmp.par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let line = &src[y * width * 4..(y + 1) * width * 4];
            for x in 0..width {
                let lo = (x as i64 - r).max(0) as usize;
                let hi = ((x as i64 + r) as usize).min(width - 1);
                let count = (hi - lo + 1) as u32;
                for c in 0..4 {
                    let mut sum = 0u32;
                    for xx in lo..=hi {
                        sum += line[xx * 4 + c] as u32;
                    }
                    row[x * 4 + c] = ((sum + count / 2) / count) as u8;
                }
            }
        });

    let mut out = input.clone();
    out.as_bytes_mut()
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let lo = (y as i64 - r).max(0) as usize;
            let hi = ((y as i64 + r) as usize).min(height - 1);
            let count = (hi - lo + 1) as u32;
            for x in 0..width {
                for c in 0..4 {
                    let mut sum = 0u32;
                    for yy in lo..=hi {
                        sum += tmp[(yy * width + x) * 4 + c] as u32;
                    }
                    row[x * 4 + c] = ((sum + count / 2) / count) as u8;
                }
            }
        });
    out
}
