//! Pointer input model. The shell translates whatever device it has into
//! these samples; the engine never talks to hardware.

use serde::{Deserialize, Serialize};

/// One pointer event in canvas coordinates.
///
/// Optional fields are `None` when the device cannot report them; the
/// brush engine substitutes neutral values according to [`DeviceCaps`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f32,
    pub y: f32,
    /// Normalized 0..1 stylus pressure.
    pub pressure: Option<f32>,
    /// Stylus tilt in degrees, (x, y), each -90..90.
    pub tilt: Option<(f32, f32)>,
    /// Milliseconds since stroke start, monotonic per stroke.
    pub time_ms: u64,
}

impl PointerSample {
    pub fn at(x: f32, y: f32, time_ms: u64) -> Self {
        Self {
            x,
            y,
            pressure: None,
            tilt: None,
            time_ms,
        }
    }

    pub fn with_pressure(mut self, pressure: f32) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Pressure with the device-appropriate fallback applied.
    pub fn effective_pressure(&self, caps: &DeviceCaps) -> f32 {
        match self.pressure {
            Some(p) if caps.has_pressure => p.clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    /// Tilt magnitude normalized to 0..1, or 0 without tilt support.
    pub fn effective_tilt(&self, caps: &DeviceCaps) -> f32 {
        match self.tilt {
            Some((tx, ty)) if caps.has_tilt => {
                let mag = (tx * tx + ty * ty).sqrt();
                (mag / 90.0).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

/// What the current pointing device can report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub has_pressure: bool,
    pub has_tilt: bool,
}

impl DeviceCaps {
    pub const MOUSE: DeviceCaps = DeviceCaps {
        has_pressure: false,
        has_tilt: false,
    };

    pub const PEN: DeviceCaps = DeviceCaps {
        has_pressure: true,
        has_tilt: true,
    };
}
