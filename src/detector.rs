use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};

/// Pixel variance below which an image region counts as flat.
const MIN_VARIANCE: f64 = 1.0;

/// A located template (pixel coordinates of its center, at original scale).
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Grayscale template, downscaled once at load time.
pub struct PreparedTemplate {
    pub gray: GrayImage,
    pub width: u32,
    pub height: u32,
    pub mean: f64,
    /// Sum of squared deviations from `mean`.
    pub energy: f64,
}

/// Prepare a template image for matching at the given downscale factor.
/// Returns `None` if it would be too small or too flat to match reliably.
pub fn prepare_template(img: &DynamicImage, scale_down: u32) -> Option<PreparedTemplate> {
    let scale = scale_down.max(1);
    let w = img.width() / scale;
    let h = img.height() / scale;

    if w < 4 || h < 4 {
        tracing::warn!("template {}x{} too small after downscale, skipping", img.width(), img.height());
        return None;
    }

    let gray = if scale == 1 {
        img.to_luma8()
    } else {
        img.resize_exact(w, h, FilterType::Triangle).to_luma8()
    };

    let n = f64::from(w * h);
    let mean = gray.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    let energy: f64 = gray.pixels().map(|p| (f64::from(p[0]) - mean).powi(2)).sum();
    if energy / n < MIN_VARIANCE {
        tracing::warn!("template {}x{} has no contrast, skipping", img.width(), img.height());
        return None;
    }

    Some(PreparedTemplate {
        gray,
        width: w,
        height: h,
        mean,
        energy,
    })
}

/// Grayscale, downscaled copy of a captured frame.
pub fn prepare_frame(frame: &DynamicImage, scale_down: u32) -> GrayImage {
    let scale = scale_down.max(1);
    if scale == 1 {
        return frame.to_luma8();
    }
    frame
        .resize_exact(frame.width() / scale, frame.height() / scale, FilterType::Triangle)
        .to_luma8()
}

/// Summed-area tables of pixel values and their squares, `(w + 1) x (h + 1)`.
struct WindowSums {
    stride: usize,
    sum: Vec<u64>,
    squares: Vec<u64>,
}

impl WindowSums {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        let stride = w as usize + 1;
        let mut sum = vec![0u64; stride * (h as usize + 1)];
        let mut squares = sum.clone();

        for (y, row) in img.rows().enumerate() {
            let (mut row_sum, mut row_squares) = (0u64, 0u64);
            for (x, pixel) in row.enumerate() {
                let v = u64::from(pixel[0]);
                row_sum += v;
                row_squares += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                squares[i] = squares[i - stride] + row_squares;
            }
        }

        Self { stride, sum, squares }
    }

    /// Sum and sum of squares over the `w`x`h` window at `(x, y)`.
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let rect = |t: &[u64]| {
            (t[y1 * self.stride + x1] + t[y0 * self.stride + x0])
                - t[y0 * self.stride + x1]
                - t[y1 * self.stride + x0]
        };
        (rect(&self.sum) as f64, rect(&self.squares) as f64)
    }
}

/// Correlation coefficient (zero-mean normalized cross-correlation) of
/// `template` at every position of `frame`. Flat windows score 0.
fn coefficient_map(frame: &GrayImage, template: &PreparedTemplate) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let cross = match_template(frame, &template.gray, MatchTemplateMethod::CrossCorrelation);
    let sums = WindowSums::new(frame);
    let n = f64::from(template.width * template.height);

    ImageBuffer::from_fn(cross.width(), cross.height(), |x, y| {
        let (sum, squares) = sums.window(x, y, template.width, template.height);
        let spread = squares - sum * sum / n;
        if spread < MIN_VARIANCE * n {
            return Luma([0.0]);
        }
        let numerator = f64::from(cross.get_pixel(x, y)[0]) - template.mean * sum;
        let score = numerator / (spread * template.energy).sqrt();
        Luma([score.clamp(-1.0, 1.0) as f32])
    })
}

/// Best correlation-coefficient position of `template` in `frame`,
/// regardless of threshold. Coordinates are scaled back to the original frame.
pub fn best_match(frame: &GrayImage, template: &PreparedTemplate, scale_down: u32) -> Option<TemplateMatch> {
    if template.width > frame.width() || template.height > frame.height() {
        tracing::warn!(
            "template {}x{} is too large for frame {}x{}, skipping",
            template.width,
            template.height,
            frame.width(),
            frame.height()
        );
        return None;
    }

    let scores = coefficient_map(frame, template);
    let extremes = find_extremes(&scores);
    let (mx, my) = extremes.max_value_location;
    let scale = scale_down.max(1);

    Some(TemplateMatch {
        x: (mx + template.width / 2) * scale,
        y: (my + template.height / 2) * scale,
        score: extremes.max_value,
    })
}

/// Like [`best_match`], but only if the score reaches `threshold`.
pub fn locate(
    frame: &GrayImage,
    template: &PreparedTemplate,
    scale_down: u32,
    threshold: f32,
) -> Option<TemplateMatch> {
    let m = best_match(frame, template, scale_down)?;
    tracing::debug!(
        "template {}x{}: best_score={:.4} at ({}, {}), threshold {:.2}",
        template.width,
        template.height,
        m.score,
        m.x,
        m.y,
        threshold
    );
    (m.score >= threshold).then_some(m)
}

/// Directories searched for template images, in priority order:
/// 1. the configured assets directory (if any)
/// 2. `./assets/bot_elements`
/// 3. `<exe>/../share/tidepool/assets/bot_elements` (install layout)
pub fn template_search_dirs(assets_dir: Option<&Path>) -> Vec<PathBuf> {
    let bin_share = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent()?.parent().map(|p| p.join("share/tidepool/assets/bot_elements")));

    [
        assets_dir.map(Path::to_path_buf),
        Some(Path::new("assets").join("bot_elements")),
        bin_share,
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Find the first existing file named `name` in `dirs`.
pub fn resolve_template(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| p.exists())
}
