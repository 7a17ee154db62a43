//! Premultiplied RGBA pixel storage, the atomic unit of image data.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::geom::Rect;
use crate::pixel::{self, Color, Pixel};

/// Owned 2D array of premultiplied RGBA samples.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    /// Create a buffer filled with one color.
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let mut buf = Self::new(width, height);
        buf.fill(color);
        buf
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

    /// Raw premultiplied bytes, row-major RGBA.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    fn idx(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + x as usize) * 4
    }

    /// Read one pixel; callers must stay in bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        let i = self.idx(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, p: Pixel) {
        let i = self.idx(x, y);
        self.data[i..i + 4].copy_from_slice(&p);
    }

    pub fn fill(&mut self, color: Color) {
        let p = color.to_pixel();
        for chunk in self.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&p);
        }
    }

    /// Copy a rectangular region into a new buffer. The rectangle is clipped
    /// to the buffer bounds first.
    pub fn extract(&self, rect: Rect) -> PixelBuffer {
        let r = rect.clamp(self.width, self.height);
        let mut out = PixelBuffer::new(r.w, r.h);
        for row in 0..r.h {
            let src_start = self.idx(r.x as u32, r.y as u32 + row);
            let dst_start = (row as usize) * (r.w as usize) * 4;
            let len = (r.w as usize) * 4;
            out.data[dst_start..dst_start + len]
                .copy_from_slice(&self.data[src_start..src_start + len]);
        }
        out
    }

    /// Overwrite the region at (`x`, `y`) with `patch`. The patch must fit
    /// entirely inside the buffer.
    pub fn blit(&mut self, x: u32, y: u32, patch: &PixelBuffer) -> Result<()> {
        if x + patch.width > self.width || y + patch.height > self.height {
            return Err(EngineError::dimensions(
                (self.width, self.height),
                (x + patch.width, y + patch.height),
            ));
        }
        for row in 0..patch.height {
            let dst_start = self.idx(x, y + row);
            let src_start = (row as usize) * (patch.width as usize) * 4;
            let len = (patch.width as usize) * 4;
            self.data[dst_start..dst_start + len]
                .copy_from_slice(&patch.data[src_start..src_start + len]);
        }
        Ok(())
    }

    /// Merge `top` over `self` with standard source-over compositing.
    /// Used to fold a destructive paint bitmap onto a transformed source.
    pub fn merge_over(&mut self, top: &PixelBuffer) -> Result<()> {
        if top.size() != self.size() {
            return Err(EngineError::dimensions(self.size(), top.size()));
        }
        for (dst, src) in self
            .data
            .chunks_exact_mut(4)
            .zip(top.data.chunks_exact(4))
        {
            let blended = pixel::alpha_over(
                [src[0], src[1], src[2], src[3]],
                [dst[0], dst[1], dst[2], dst[3]],
            );
            dst.copy_from_slice(&blended);
        }
        Ok(())
    }

    /// Bilinear sample at a continuous pixel-center coordinate.
    ///
    /// Interpolation happens on premultiplied channels so transparent
    /// neighbors never bleed color into edges. Coordinates outside the
    /// buffer sample as transparent.
    pub fn sample_bilinear(&self, xf: f32, yf: f32) -> Pixel {
        let x0f = xf.floor();
        let y0f = yf.floor();
        let fx = xf - x0f;
        let fy = yf - y0f;
        let x0 = x0f as i64;
        let y0 = y0f as i64;

        let fetch = |x: i64, y: i64| -> [f32; 4] {
            if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                [0.0; 4]
            } else {
                let p = self.pixel(x as u32, y as u32);
                [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
            }
        };

        let p00 = fetch(x0, y0);
        let p10 = fetch(x0 + 1, y0);
        let p01 = fetch(x0, y0 + 1);
        let p11 = fetch(x0 + 1, y0 + 1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] * (1.0 - fx) + p10[c] * fx;
            let bot = p01[c] * (1.0 - fx) + p11[c] * fx;
            out[c] = (top * (1.0 - fy) + bot * fy + 0.5).clamp(0.0, 255.0) as u8;
        }
        out
    }

    /// Nearest-neighbor sample; transparent outside the buffer.
    pub fn sample_nearest(&self, xf: f32, yf: f32) -> Pixel {
        let x = xf.round() as i64;
        let y = yf.round() as i64;
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            pixel::TRANSPARENT
        } else {
            self.pixel(x as u32, y as u32)
        }
    }

    /// Decode an image file into a premultiplied buffer.
    pub fn decode(path: &std::path::Path) -> Result<PixelBuffer> {
        let img = image::open(path).map_err(|e| EngineError::Resource {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_rgba_image(&img.to_rgba8()))
    }

    /// Premultiply a straight-alpha `image` buffer.
    pub fn from_rgba_image(img: &image::RgbaImage) -> PixelBuffer {
        let (w, h) = img.dimensions();
        let mut out = PixelBuffer::new(w, h);
        for (dst, src) in out
            .data
            .chunks_exact_mut(4)
            .zip(img.as_raw().chunks_exact(4))
        {
            let p = pixel::premultiply([src[0], src[1], src[2], src[3]]);
            dst.copy_from_slice(&p);
        }
        out
    }

    /// Convert back to a straight-alpha `image` buffer for encoding.
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let mut raw = Vec::with_capacity(self.data.len());
        for p in self.data.chunks_exact(4) {
            let s = pixel::unpremultiply([p[0], p[1], p[2], p[3]]);
            raw.extend_from_slice(&s);
        }
        image::RgbaImage::from_raw(self.width, self.height, raw)
            .expect("raw length matches dimensions")
    }

    /// Approximate heap footprint, used for history byte budgeting.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_blit_round_trip() {
        let mut buf = PixelBuffer::new(8, 8);
        buf.set_pixel(3, 4, [10, 20, 30, 255]);
        let patch = buf.extract(Rect::new(2, 3, 4, 4));
        assert_eq!(patch.size(), (4, 4));
        assert_eq!(patch.pixel(1, 1), [10, 20, 30, 255]);

        let mut other = PixelBuffer::new(8, 8);
        other.blit(2, 3, &patch).unwrap();
        assert_eq!(other.pixel(3, 4), [10, 20, 30, 255]);
    }

    #[test]
    fn blit_out_of_bounds_is_rejected() {
        let mut buf = PixelBuffer::new(4, 4);
        let patch = PixelBuffer::new(3, 3);
        assert!(matches!(
            buf.blit(2, 2, &patch),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn extract_clips_to_bounds() {
        let buf = PixelBuffer::new(4, 4);
        let patch = buf.extract(Rect::new(-2, -2, 10, 10));
        assert_eq!(patch.size(), (4, 4));
    }

    #[test]
    fn bilinear_at_integer_coords_is_exact() {
        let mut buf = PixelBuffer::new(3, 3);
        buf.set_pixel(1, 1, [100, 50, 25, 255]);
        assert_eq!(buf.sample_bilinear(1.0, 1.0), [100, 50, 25, 255]);
    }

    #[test]
    fn bilinear_outside_is_transparent() {
        let buf = PixelBuffer::filled(2, 2, Color::white());
        assert_eq!(buf.sample_bilinear(-5.0, -5.0), [0, 0, 0, 0]);
    }

    #[test]
    fn image_round_trip_preserves_opaque_pixels() {
        let mut img = image::RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([210, 3, 64, 255]));
        let buf = PixelBuffer::from_rgba_image(&img);
        let back = buf.to_rgba_image();
        assert_eq!(back.get_pixel(0, 0).0, [210, 3, 64, 255]);
    }
}
