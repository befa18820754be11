use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Once};

use crate::config::{ConfigSource, DetectorConfig, TestConfig};
use crate::core::backend::OnnxBackend;
use crate::core::classes::{get_classes, parse_class_list};
use crate::core::pipeline::{build_test_pipeline, collate, Compose};
use crate::core::uncertainty::{image_uncertainty, UncertaintyType};
use crate::domain::model::{
    BBox, Device, DetectionResult, ImageMeta, ImageSource, ModelInput, PipelineData, RawOutput,
};
use crate::domain::ports::{AsyncForward, InferenceBackend};
use crate::utils::error::{DetError, Result};
use crate::utils::validation::Validate;

static MISSING_CLASSES_WARNING: Once = Once::new();

/// 已載入的偵測器：推論後端、配置與類別名稱
pub struct Detector {
    backend: Arc<dyn InferenceBackend>,
    pipeline: Arc<Compose>,
    pub cfg: DetectorConfig,
    pub classes: Option<Vec<String>>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("model", &self.cfg.model.r#type)
            .field("device", &self.backend.device())
            .field("pipeline", &self.pipeline.names())
            .field("classes", &self.classes.as_ref().map(Vec::len))
            .finish()
    }
}

impl AsRef<Detector> for Detector {
    fn as_ref(&self) -> &Detector {
        self
    }
}

impl Detector {
    /// 以已載入的後端建立偵測器；`from_checkpoint` 時從 metadata 讀取類別名稱
    pub fn with_backend(
        cfg: DetectorConfig,
        backend: Arc<dyn InferenceBackend>,
        from_checkpoint: bool,
    ) -> Result<Self> {
        cfg.validate()?;
        let pipeline = build_test_pipeline(&cfg.data.test.pipeline)?;

        let classes = if from_checkpoint {
            match backend.metadata("CLASSES")? {
                Some(raw) => Some(parse_class_list(&raw)),
                None => {
                    MISSING_CLASSES_WARNING.call_once(|| {
                        tracing::warn!(
                            "Class names are not saved in the checkpoint's meta data, use COCO classes by default."
                        );
                    });
                    Some(get_classes("coco")?)
                }
            }
        } else {
            cfg.model.classes.clone()
        };

        if backend.device() == Device::Cpu {
            tracing::warn!("Running {} on CPU; expect slower inference", cfg.model.r#type);
        }

        Ok(Self {
            backend,
            pipeline: Arc::new(pipeline),
            cfg,
            classes,
        })
    }

    pub fn device(&self) -> Device {
        self.backend.device()
    }

    pub fn num_classes(&self) -> Option<usize> {
        self.classes.as_ref().map(Vec::len)
    }

    pub fn class_name(&self, label: usize) -> Option<&str> {
        self.classes
            .as_ref()
            .and_then(|names| names.get(label))
            .map(String::as_str)
    }

    /// 執行資料管線並組成單張批次
    pub fn prepare(&self, img: ImageSource) -> Result<ModelInput> {
        let data = self.pipeline.apply(PipelineData::new(img))?;
        collate(data)
    }

    fn forward_raw(&self, input: &ModelInput) -> Result<RawOutput> {
        self.backend.forward(input)
    }
}

#[async_trait]
impl AsyncForward for Detector {
    async fn aforward_test(&self, img: ImageSource) -> Result<DetectionResult> {
        let backend = Arc::clone(&self.backend);
        let pipeline = Arc::clone(&self.pipeline);
        let test_cfg = self.cfg.test_cfg.clone();
        let num_classes = self.num_classes();

        tokio::task::spawn_blocking(move || {
            let input = collate(pipeline.apply(PipelineData::new(img))?)?;
            let raw = backend.forward(&input)?;
            postprocess(&raw, &input.img_metas, &test_cfg, num_classes)
        })
        .await?
    }
}

/// 從配置 (檔案或物件) 與選擇性的 ONNX checkpoint 建立偵測器
pub fn init_detector(
    config: impl Into<ConfigSource>,
    checkpoint: Option<&Path>,
    device: &str,
) -> Result<Detector> {
    let mut config = config.into().load()?;
    config.model.pretrained = None;

    let device: Device = device.parse()?;
    let graph = config.graph_path(checkpoint)?;
    let backend = OnnxBackend::load(&graph, config.model.io.clone(), device)?;

    Detector::with_backend(config, Arc::new(backend), checkpoint.is_some())
}

/// 單張影像的偵測結果與不確定度
pub fn inference_detector(
    detector: &Detector,
    img: impl Into<ImageSource>,
) -> Result<(DetectionResult, f32)> {
    let input = detector.prepare(img.into())?;
    let raw = detector.forward_raw(&input)?;
    let result = postprocess(
        &raw,
        &input.img_metas,
        &detector.cfg.test_cfg,
        detector.num_classes(),
    )?;

    let kind: UncertaintyType = detector.cfg.uncertainty_type.parse()?;
    let uncertainty = image_uncertainty(kind, &raw.head_f_1, &raw.head_f_2, detector.cfg.k)?;

    tracing::debug!(
        "{} detections, {} = {:.6}",
        result.len(),
        kind,
        uncertainty
    );
    Ok((result, uncertainty))
}

/// 只回傳偵測結果；前處理與前向傳播都在 blocking pool 上執行，
/// 多個請求可以同時進行
pub async fn async_inference_detector(
    detector: &Detector,
    img: impl Into<ImageSource>,
) -> Result<DetectionResult> {
    detector.aforward_test(img.into()).await
}

/// 把 `[N, 5]` 原始偵測框映射回原圖並依類別分組
pub fn postprocess(
    raw: &RawOutput,
    meta: &ImageMeta,
    test_cfg: &TestConfig,
    num_classes: Option<usize>,
) -> Result<DetectionResult> {
    let n = raw.dets.nrows();
    if n > 0 && raw.dets.ncols() < 5 {
        return Err(DetError::processing(format!(
            "dets must have 5 columns, got {}",
            raw.dets.ncols()
        )));
    }
    if raw.labels.len() != n {
        return Err(DetError::processing(format!(
            "{} boxes but {} labels",
            n,
            raw.labels.len()
        )));
    }

    let mut kept: Vec<(usize, BBox)> = Vec::with_capacity(n);
    for (row, &label) in raw.dets.rows().into_iter().zip(raw.labels.iter()) {
        let score = row[4];
        if score < test_cfg.score_thr {
            continue;
        }
        let label = usize::try_from(label)
            .map_err(|_| DetError::processing(format!("negative class label {}", label)))?;
        if let Some(num_classes) = num_classes {
            if label >= num_classes {
                return Err(DetError::processing(format!(
                    "label {} out of range for {} classes",
                    label, num_classes
                )));
            }
        }
        kept.push((label, rescale_box([row[0], row[1], row[2], row[3]], score, meta)));
    }

    kept.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
    kept.truncate(test_cfg.max_per_img);

    let mut result = DetectionResult::with_classes(num_classes.unwrap_or(0));
    for (label, bbox) in kept {
        result.push(label, bbox);
    }
    Ok(result)
}

fn rescale_box(coords: [f32; 4], score: f32, meta: &ImageMeta) -> BBox {
    let [mut x1, y1, mut x2, y2] = coords;
    if meta.flip {
        let w = meta.img_shape[1] as f32;
        (x1, x2) = (w - x2, w - x1);
    }

    let [sx, sy, _, _] = meta.scale_factor;
    let max_x = meta.ori_shape[1] as f32;
    let max_y = meta.ori_shape[0] as f32;
    BBox {
        x1: (x1 / sx).clamp(0.0, max_x),
        y1: (y1 / sy).clamp(0.0, max_y),
        x2: (x2 / sx).clamp(0.0, max_x),
        y2: (y2 / sy).clamp(0.0, max_y),
        score,
    }
}
