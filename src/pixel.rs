//! Color primitives shared by the compositor and the brush engine.
//!
//! Buffers store premultiplied RGBA bytes; the float [`Color`] is the
//! working representation for blend math and always carries straight alpha.

use serde::{Deserialize, Serialize};

/// One premultiplied RGBA sample.
pub type Pixel = [u8; 4];

pub const TRANSPARENT: Pixel = [0, 0, 0, 0];

/// Simple RGBA color stored as linear floats in 0..1 (straight alpha).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Construct from 0-255 channel values.
    pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    pub const TRANSPARENT: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    /// Solid white convenience color.
    pub fn white() -> Self {
        Self::rgba(255, 255, 255, 255)
    }

    /// Solid black convenience color.
    pub fn black() -> Self {
        Self::rgba(0, 0, 0, 255)
    }

    /// Convert HSVA values (0..1) into an RGBA color.
    pub fn from_hsva(h: f32, s: f32, v: f32, a: f32) -> Self {
        // h is wrapped into [0,1) so callers can pass any float
        let h = ((h % 1.0) + 1.0) % 1.0;
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);
        let a = a.clamp(0.0, 1.0);

        let c = v * s;
        let x = c * (1.0 - (((h * 6.0) % 2.0) - 1.0).abs());
        let m = v - c;

        let (r1, g1, b1) = match (h * 6.0).floor() as i32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        Self {
            r: r1 + m,
            g: g1 + m,
            b: b1 + m,
            a,
        }
    }

    /// Convert RGBA into HSVA.
    pub fn to_hsva(&self) -> (f32, f32, f32, f32) {
        let r = self.r;
        let g = self.g;
        let b = self.b;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let mut h = if delta == 0.0 {
            0.0
        } else if max == r {
            ((g - b) / delta) % 6.0
        } else if max == g {
            ((b - r) / delta) + 2.0
        } else {
            ((r - g) / delta) + 4.0
        };

        h /= 6.0;
        if h < 0.0 {
            h += 1.0;
        }

        let s = if max == 0.0 { 0.0 } else { delta / max };
        let v = max;
        let a = self.a;
        (h, s, v, a)
    }

    /// Convert to a premultiplied 8-bit pixel.
    pub fn to_pixel(&self) -> Pixel {
        let a = self.a.clamp(0.0, 1.0);
        [
            (self.r.clamp(0.0, 1.0) * a * 255.0 + 0.5) as u8,
            (self.g.clamp(0.0, 1.0) * a * 255.0 + 0.5) as u8,
            (self.b.clamp(0.0, 1.0) * a * 255.0 + 0.5) as u8,
            (a * 255.0 + 0.5) as u8,
        ]
    }

    /// Convert from a premultiplied 8-bit pixel to straight-alpha floats.
    pub fn from_pixel(p: Pixel) -> Self {
        let a = p[3] as f32 / 255.0;
        if a <= 0.0 {
            return Self::TRANSPARENT;
        }
        Self {
            r: (p[0] as f32 / 255.0) / a,
            g: (p[1] as f32 / 255.0) / a,
            b: (p[2] as f32 / 255.0) / a,
            a,
        }
    }
}

/// Standard "source over" alpha compositing for premultiplied pixels.
pub fn alpha_over(src: Pixel, dst: Pixel) -> Pixel {
    let src_a = src[3] as u32;
    let dst_a = dst[3] as u32;
    let inv = 255 - src_a;
    let out_a = src_a + (dst_a * inv + 127) / 255;
    if out_a == 0 {
        return TRANSPARENT;
    }

    let out_r = src[0] as u32 + (dst[0] as u32 * inv + 127) / 255;
    let out_g = src[1] as u32 + (dst[1] as u32 * inv + 127) / 255;
    let out_b = src[2] as u32 + (dst[2] as u32 * inv + 127) / 255;

    [
        out_r.min(255) as u8,
        out_g.min(255) as u8,
        out_b.min(255) as u8,
        out_a.min(255) as u8,
    ]
}

/// Erase blend mode: reduce destination alpha by the source alpha.
pub fn blend_erase(src: Pixel, dst: Pixel) -> Pixel {
    let src_a = src[3] as u32;
    let inv = 255 - src_a;
    let out_a = (dst[3] as u32 * inv + 127) / 255;
    let out_r = (dst[0] as u32 * inv + 127) / 255;
    let out_g = (dst[1] as u32 * inv + 127) / 255;
    let out_b = (dst[2] as u32 * inv + 127) / 255;
    [
        out_r.min(255) as u8,
        out_g.min(255) as u8,
        out_b.min(255) as u8,
        out_a.min(255) as u8,
    ]
}

/// Scale every channel of a premultiplied pixel by `scale`/255.
#[inline]
pub fn scale_alpha(p: Pixel, scale: u32) -> Pixel {
    if scale >= 255 {
        return p;
    }
    [
        ((p[0] as u32 * scale + 127) / 255) as u8,
        ((p[1] as u32 * scale + 127) / 255) as u8,
        ((p[2] as u32 * scale + 127) / 255) as u8,
        ((p[3] as u32 * scale + 127) / 255) as u8,
    ]
}

/// Premultiply a straight-alpha 8-bit pixel.
pub fn premultiply(p: [u8; 4]) -> Pixel {
    let a = p[3] as u32;
    if a >= 255 {
        return p;
    }
    [
        ((p[0] as u32 * a + 127) / 255) as u8,
        ((p[1] as u32 * a + 127) / 255) as u8,
        ((p[2] as u32 * a + 127) / 255) as u8,
        p[3],
    ]
}

/// Recover straight alpha from a premultiplied pixel.
pub fn unpremultiply(p: Pixel) -> [u8; 4] {
    let a = p[3] as u32;
    if a == 0 || a >= 255 {
        return p;
    }
    [
        ((p[0] as u32 * 255 + a / 2) / a).min(255) as u8,
        ((p[1] as u32 * 255 + a / 2) / a).min(255) as u8,
        ((p[2] as u32 * 255 + a / 2) / a).min(255) as u8,
        p[3],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_with_opaque_src_replaces_dst() {
        let src = premultiply([200, 10, 30, 255]);
        let dst = premultiply([5, 5, 5, 255]);
        assert_eq!(alpha_over(src, dst), src);
    }

    #[test]
    fn over_with_transparent_src_keeps_dst() {
        let dst = premultiply([90, 14, 200, 180]);
        assert_eq!(alpha_over(TRANSPARENT, dst), dst);
    }

    #[test]
    fn erase_full_alpha_clears() {
        let src = premultiply([0, 0, 0, 255]);
        let dst = premultiply([90, 14, 200, 180]);
        assert_eq!(blend_erase(src, dst), TRANSPARENT);
    }

    #[test]
    fn premultiply_round_trip() {
        let straight = [120, 64, 255, 128];
        let p = premultiply(straight);
        let back = unpremultiply(p);
        for c in 0..4 {
            assert!((straight[c] as i32 - back[c] as i32).abs() <= 1);
        }
    }

    #[test]
    fn hsva_round_trip() {
        let c = Color::rgba(200, 100, 50, 255);
        let (h, s, v, a) = c.to_hsva();
        let back = Color::from_hsva(h, s, v, a);
        assert!((c.r - back.r).abs() < 1e-4);
        assert!((c.g - back.g).abs() < 1e-4);
        assert!((c.b - back.b).abs() < 1e-4);
    }
}
