#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{array, Array2};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use uncertain_det::domain::model::{Device, ModelInput, RawOutput};
use uncertain_det::domain::ports::InferenceBackend;
use uncertain_det::{DetectorConfig, Result};

pub const CONFIG_TOML: &str = r#"
uncertainty_type = "l2_norm"
k = 2

[model]
type = "MIAOD"
classes = ["cat", "dog", "bird"]

[test_cfg]
score_thr = 0.05
max_per_img = 100

[[data.test.pipeline]]
type = "LoadImageFromFile"

[[data.test.pipeline]]
type = "MultiScaleFlipAug"
img_scale = [64, 32]
flip = false

[[data.test.pipeline.transforms]]
type = "Resize"
keep_ratio = true

[[data.test.pipeline.transforms]]
type = "RandomFlip"

[[data.test.pipeline.transforms]]
type = "Normalize"
mean = [123.675, 116.28, 103.53]
std = [58.395, 57.12, 57.375]
to_rgb = true

[[data.test.pipeline.transforms]]
type = "Pad"
size_divisor = 32

[[data.test.pipeline.transforms]]
type = "ImageToTensor"
keys = ["img"]

[[data.test.pipeline.transforms]]
type = "Collect"
keys = ["img"]
"#;

pub fn config() -> DetectorConfig {
    DetectorConfig::from_toml_str(CONFIG_TOML).unwrap()
}

/// 32x16 漸層影像；上面的管線會放大兩倍
pub fn image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(32, 16, |x, y| {
        Rgb([(x * 8) as u8, (y * 16) as u8, 128])
    }))
}

/// 回傳固定輸出並計算前向傳播次數
pub struct FakeBackend {
    pub head_f_1: Vec<Array2<f32>>,
    pub head_f_2: Vec<Array2<f32>>,
    pub metadata: HashMap<String, String>,
    pub calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(head_f_1: Vec<Array2<f32>>, head_f_2: Vec<Array2<f32>>) -> Self {
        Self {
            head_f_1,
            head_f_2,
            metadata: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn disagreeing() -> Self {
        Self::new(
            vec![array![[0.0_f32, 0.0], [2.0, -2.0]], array![[1.0_f32, 1.0]]],
            vec![array![[0.0_f32, 0.0], [-2.0, 2.0]], array![[1.0_f32, -1.0]]],
        )
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for FakeBackend {
    fn forward(&self, input: &ModelInput) -> Result<RawOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(input.img.shape()[0], 1);

        // 網路座標 (已放大兩倍)
        Ok(RawOutput {
            dets: array![
                [10.0, 4.0, 30.0, 20.0, 0.95],
                [40.0, 0.0, 62.0, 30.0, 0.40],
                [0.0, 0.0, 4.0, 4.0, 0.01]
            ],
            labels: array![0, 2, 1],
            head_f_1: self.head_f_1.clone(),
            head_f_2: self.head_f_2.clone(),
        })
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.metadata.get(key).cloned())
    }
}
