use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::core::detector::{async_inference_detector, inference_detector, Detector};
use crate::core::visualize::{show_result, ShowOptions};
use crate::domain::model::{DetectionResult, ImageSource};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// 單張影像的推論結果摘要
#[derive(Debug, Clone, Serialize)]
pub struct InferenceReport {
    pub image: Option<String>,
    pub num_detections: usize,
    pub result: DetectionResult,
    pub uncertainty_type: Option<String>,
    pub uncertainty: Option<f32>,
    pub figure: Option<PathBuf>,
    pub elapsed_ms: f64,
}

/// 執行推論、選擇性繪圖，並記錄各階段資源使用
pub struct InferenceEngine {
    detector: Arc<Detector>,
    monitor: SystemMonitor,
}

impl InferenceEngine {
    pub fn new(detector: Detector) -> Self {
        Self::new_with_monitoring(detector, false)
    }

    pub fn new_with_monitoring(detector: Detector, enable_monitoring: bool) -> Self {
        Self {
            detector: Arc::new(detector),
            monitor: SystemMonitor::new(enable_monitoring),
        }
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    pub fn run(
        &self,
        img: ImageSource,
        show: Option<(&Path, ShowOptions)>,
    ) -> Result<InferenceReport> {
        let start = Instant::now();
        let image = image_name(&img);
        self.monitor.log_stats("Before inference");

        tracing::info!("🚀 Running inference on {}", image.as_deref().unwrap_or("<array>"));
        let (result, uncertainty) = inference_detector(&self.detector, img.clone())?;
        tracing::info!(
            "✅ {} detections, {} uncertainty: {:.6}",
            result.len(),
            self.detector.cfg.uncertainty_type,
            uncertainty
        );
        self.monitor.log_stats("After inference");

        let figure = match show {
            Some((output, opts)) => Some(show_result(&self.detector, img, &result, &opts, output)?),
            None => None,
        };

        self.monitor.log_final_stats();
        Ok(InferenceReport {
            image,
            num_detections: result.len(),
            result,
            uncertainty_type: Some(self.detector.cfg.uncertainty_type.clone()),
            uncertainty: Some(uncertainty),
            figure,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    pub async fn run_async(&self, img: ImageSource) -> Result<InferenceReport> {
        let start = Instant::now();
        let image = image_name(&img);
        self.monitor.log_stats("Before async inference");

        let result = async_inference_detector(&self.detector, img).await?;
        tracing::info!("✅ {} detections (async)", result.len());

        self.monitor.log_final_stats();
        Ok(InferenceReport {
            image,
            num_detections: result.len(),
            result,
            uncertainty_type: None,
            uncertainty: None,
            figure: None,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

fn image_name(img: &ImageSource) -> Option<String> {
    match img {
        ImageSource::Path(path) => Some(path.display().to_string()),
        ImageSource::Array(_) => None,
    }
}
