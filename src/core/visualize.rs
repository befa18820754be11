use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};

use crate::core::detector::Detector;
use crate::domain::model::{BBox, DetectionResult, ImageSource};
use crate::utils::error::{DetError, Result};

const PALETTE: [[u8; 3]; 10] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [210, 245, 60],
    [0, 128, 128],
];

#[derive(Debug, Clone, Copy)]
pub struct ShowOptions {
    pub score_thr: f32,
    /// 圖片尺寸 (英吋)
    pub fig_size: (f32, f32),
    pub dpi: f32,
    pub thickness: u32,
}

impl Default for ShowOptions {
    fn default() -> Self {
        Self {
            score_thr: 0.3,
            fig_size: (15.0, 10.0),
            dpi: 100.0,
            thickness: 2,
        }
    }
}

impl ShowOptions {
    pub fn with_score_thr(mut self, score_thr: f32) -> Self {
        self.score_thr = score_thr;
        self
    }

    /// 畫布像素尺寸
    pub fn canvas(&self) -> (u32, u32) {
        (
            (self.fig_size.0 * self.dpi).round().max(1.0) as u32,
            (self.fig_size.1 * self.dpi).round().max(1.0) as u32,
        )
    }
}

pub fn class_color(label: usize) -> Rgb<u8> {
    Rgb(PALETTE[label % PALETTE.len()])
}

/// 在影像副本上畫出分數不低於 `score_thr` 的框
pub fn render_result(
    img: &DynamicImage,
    result: &DetectionResult,
    score_thr: f32,
    thickness: u32,
) -> RgbImage {
    let mut canvas = img.to_rgb8();
    let mut drawn = 0usize;
    for (label, bbox) in result.above(score_thr) {
        draw_box(&mut canvas, bbox, class_color(label), thickness);
        drawn += 1;
    }
    tracing::debug!("Drew {} of {} boxes", drawn, result.len());
    canvas
}

fn draw_box(canvas: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let (x1, y1, x2, y2) = (
        clamp_x(bbox.x1),
        clamp_y(bbox.y1),
        clamp_x(bbox.x2),
        clamp_y(bbox.y2),
    );

    for t in 0..thickness.max(1) {
        let top = (y1 + t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        let left = (x1 + t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for x in x1..=x2 {
            canvas.put_pixel(x, top, color);
            canvas.put_pixel(x, bottom, color);
        }
        for y in y1..=y2 {
            canvas.put_pixel(left, y, color);
            canvas.put_pixel(right, y, color);
        }
    }
}

/// 等比例縮放到畫布內
pub fn fit_to_canvas(img: &RgbImage, canvas: (u32, u32)) -> RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let factor = (canvas.0 as f32 / w as f32).min(canvas.1 as f32 / h as f32);
    let new_w = ((w as f32 * factor).round() as u32).max(1);
    let new_h = ((h as f32 * factor).round() as u32).max(1);
    if (new_w, new_h) == (w, h) {
        return img.clone();
    }
    imageops::resize(img, new_w, new_h, FilterType::Triangle)
}

/// 繪製偵測結果並存檔；`model` 可以是 `Detector` 或 `Arc<Detector>`
pub fn show_result<D: AsRef<Detector>>(
    model: &D,
    img: impl Into<ImageSource>,
    result: &DetectionResult,
    opts: &ShowOptions,
    output: &Path,
) -> Result<PathBuf> {
    let detector = model.as_ref();
    let img = match img.into() {
        ImageSource::Path(path) => image::open(path)?,
        ImageSource::Array(img) => img,
    };

    if let Some(num_classes) = detector.num_classes() {
        if result.bboxes.len() > num_classes {
            return Err(DetError::processing(format!(
                "result has {} classes, detector knows {}",
                result.bboxes.len(),
                num_classes
            )));
        }
    }

    let rendered = render_result(&img, result, opts.score_thr, opts.thickness);
    let figure = fit_to_canvas(&rendered, opts.canvas());

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    figure.save(output)?;

    for (label, bbox) in result.above(opts.score_thr) {
        tracing::info!(
            "{} {:.3} [{:.1}, {:.1}, {:.1}, {:.1}]",
            detector.class_name(label).unwrap_or("?"),
            bbox.score,
            bbox.x1,
            bbox.y1,
            bbox.x2,
            bbox.y2
        );
    }
    tracing::info!("Figure saved to: {}", output.display());
    Ok(output.to_path_buf())
}
