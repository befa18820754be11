use image::DynamicImage;
use ndarray::{Array1, Array2, Array3, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::utils::error::{DetError, Result};

/// 影像來源：檔案路徑或已解碼的影像
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Array(DynamicImage),
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::Path(PathBuf::from(path))
    }
}

impl From<String> for ImageSource {
    fn from(path: String) -> Self {
        ImageSource::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&std::path::Path> for ImageSource {
    fn from(path: &std::path::Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(img: DynamicImage) -> Self {
        ImageSource::Array(img)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(i32),
}

impl Device {
    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl FromStr for Device {
    type Err = DetError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            _ => s
                .strip_prefix("cuda:")
                .and_then(|id| id.parse::<i32>().ok())
                .filter(|id| *id >= 0)
                .map(Device::Cuda)
                .ok_or_else(|| DetError::InvalidConfigValueError {
                    field: "device".to_string(),
                    value: s.clone(),
                    reason: "Expected cpu, cuda or cuda:N".to_string(),
                }),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub to_rgb: bool,
}

/// 從資料管線傳到後處理的影像 metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub filename: Option<String>,
    pub ori_filename: Option<String>,
    /// 原圖 `[h, w, c]`
    pub ori_shape: [usize; 3],
    /// 縮放後 `[h, w, c]`
    pub img_shape: [usize; 3],
    /// 補邊後 `[h, w, c]`
    pub pad_shape: [usize; 3],
    /// `Resize` 的縮放比例 `[w, h, w, h]`
    pub scale_factor: [f32; 4],
    pub flip: bool,
    pub img_norm_cfg: Option<NormConfig>,
}

impl Default for ImageMeta {
    fn default() -> Self {
        Self {
            filename: None,
            ori_filename: None,
            ori_shape: [0; 3],
            img_shape: [0; 3],
            pad_shape: [0; 3],
            scale_factor: [1.0; 4],
            flip: false,
            img_norm_cfg: None,
        }
    }
}

/// 在資料管線中傳遞的狀態
#[derive(Debug, Clone, Default)]
pub struct PipelineData {
    pub source: Option<ImageSource>,
    /// `ImageToTensor` 之前為 `[h, w, c]`，之後為 `[c, h, w]`
    pub img: Option<Array3<f32>>,
    pub chw: bool,
    pub img_fields: Vec<String>,
    pub meta: ImageMeta,
    pub scale: Option<[u32; 2]>,
}

impl PipelineData {
    pub fn new(source: ImageSource) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn img(&self) -> Result<&Array3<f32>> {
        self.img
            .as_ref()
            .ok_or_else(|| DetError::processing("pipeline has no image; LoadImage must run first"))
    }
}

/// 單張影像組成的批次，可直接前向傳播
#[derive(Debug, Clone)]
pub struct ModelInput {
    /// `[1, c, h, w]`
    pub img: Array4<f32>,
    pub img_metas: ImageMeta,
}

/// 計算圖對單張影像的原始輸出
#[derive(Debug, Clone)]
pub struct RawOutput {
    /// 網路輸入座標的 `[N, 5]` 框與分數
    pub dets: Array2<f32>,
    /// `[N]`
    pub labels: Array1<i64>,
    /// 兩個分類頭每層各一個 `[N_i, C]` logits
    pub head_f_1: Vec<Array2<f32>>,
    pub head_f_2: Vec<Array2<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// 依類別分組的偵測框
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bboxes: Vec<Vec<BBox>>,
}

impl DetectionResult {
    pub fn with_classes(num_classes: usize) -> Self {
        Self {
            bboxes: vec![Vec::new(); num_classes],
        }
    }

    pub fn push(&mut self, label: usize, bbox: BBox) {
        if label >= self.bboxes.len() {
            self.bboxes.resize(label + 1, Vec::new());
        }
        self.bboxes[label].push(bbox);
    }

    pub fn len(&self) -> usize {
        self.bboxes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 分數不低於 `score_thr` 的 `(label, box)`
    pub fn above(&self, score_thr: f32) -> impl Iterator<Item = (usize, &BBox)> {
        self.bboxes.iter().enumerate().flat_map(move |(label, boxes)| {
            boxes
                .iter()
                .filter(move |b| b.score >= score_thr)
                .map(move |b| (label, b))
        })
    }
}
