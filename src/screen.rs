use anyhow::Result;
use image::{GenericImageView, RgbaImage};

use crate::config::FracRegion;

/// Read access to the game screen.
///
/// Implementations are blocking; async callers run them on the blocking pool.
pub trait Screen: Send + Sync {
    /// Capture the full primary display.
    fn capture(&self) -> Result<RgbaImage>;

    /// Mean per-pixel brightness (0-255, averaged over R, G and B) of a region.
    fn sample_brightness(&self, region: FracRegion) -> Result<f64> {
        let frame = self.capture()?;
        Ok(region_brightness(&frame, region))
    }
}

/// Average of the R, G and B channels over every pixel of `region`.
pub fn region_brightness(frame: &RgbaImage, region: FracRegion) -> f64 {
    if frame.width() == 0 || frame.height() == 0 {
        return 0.0;
    }

    let (x, y, w, h) = region.to_pixels(frame.width(), frame.height());
    let view = image::imageops::crop_imm(frame, x, y, w, h);

    let mut sum: u64 = 0;
    for (_, _, pixel) in view.pixels() {
        sum += pixel[0] as u64 + pixel[1] as u64 + pixel[2] as u64;
    }

    sum as f64 / (w as u64 * h as u64 * 3) as f64
}
