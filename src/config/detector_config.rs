use crate::utils::error::{DetError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_EXTENSIONS: [&str; 2] = ["toml", "json"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// `inference_detector` 使用的不確定度指標，例如 `l2_norm`
    pub uncertainty_type: String,
    /// 取最不確定的前 `k` 個樣本平均；0 代表全部
    pub k: usize,
    pub model: ModelConfig,
    #[serde(default)]
    pub test_cfg: TestConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub r#type: String,
    /// 沒有傳入 checkpoint 時載入的 ONNX 圖
    pub graph: Option<String>,
    pub pretrained: Option<String>,
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub io: ModelIoConfig,
}

/// 計算圖的輸入與輸出名稱
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelIoConfig {
    pub input: String,
    /// `[N, 5]`：`x1, y1, x2, y2, score`
    pub dets: String,
    /// `[N]` 類別索引
    pub labels: String,
    /// 第一個分類頭，每個特徵層一個 `[N_i, C]`
    pub head_f_1: Vec<String>,
    /// 第二個分類頭，格式同 `head_f_1`
    pub head_f_2: Vec<String>,
}

impl Default for ModelIoConfig {
    fn default() -> Self {
        Self {
            input: "img".to_string(),
            dets: "dets".to_string(),
            labels: "labels".to_string(),
            head_f_1: vec!["y_head_f_1".to_string()],
            head_f_2: vec!["y_head_f_2".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub score_thr: f32,
    pub max_per_img: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            score_thr: 0.05,
            max_per_img: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub test: DatasetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub r#type: Option<String>,
    pub pipeline: Vec<TransformSpec>,
}

/// `data.test.pipeline` 的單一步驟
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformSpec {
    LoadImageFromFile,
    MultiScaleFlipAug {
        img_scale: [u32; 2],
        #[serde(default)]
        flip: bool,
        transforms: Vec<TransformSpec>,
    },
    Resize {
        img_scale: Option<[u32; 2]>,
        #[serde(default = "default_true")]
        keep_ratio: bool,
    },
    RandomFlip {
        flip_ratio: Option<f32>,
    },
    Normalize {
        mean: [f32; 3],
        std: [f32; 3],
        #[serde(default = "default_true")]
        to_rgb: bool,
    },
    Pad {
        size_divisor: u32,
    },
    ImageToTensor {
        keys: Vec<String>,
    },
    DefaultFormatBundle,
    Collect {
        keys: Vec<String>,
    },
}

fn default_true() -> bool {
    true
}

impl DetectorConfig {
    /// 從 TOML 或 JSON 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = validation::validate_file_extension(
            "config",
            &path.to_string_lossy(),
            &CONFIG_EXTENSIONS,
        )?;
        let content = std::fs::read_to_string(path)?;

        tracing::debug!("Loading detector config from {}", path.display());
        match extension.as_str() {
            "json" => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| DetError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;
        Ok(serde_json::from_str(&processed_content)?)
    }

    /// 替換環境變數 (例如 ${MODEL_DIR})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| DetError::config(e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("uncertainty_type", &self.uncertainty_type)?;
        validation::validate_range("test_cfg.score_thr", self.test_cfg.score_thr, 0.0, 1.0)?;
        validation::validate_positive_number("test_cfg.max_per_img", self.test_cfg.max_per_img, 1)?;

        if let Some(graph) = &self.model.graph {
            validation::validate_path("model.graph", graph)?;
        }

        let io = &self.model.io;
        validation::validate_non_empty_string("model.io.input", &io.input)?;
        validation::validate_positive_number("model.io.head_f_1", io.head_f_1.len(), 1)?;
        if io.head_f_1.len() != io.head_f_2.len() {
            return Err(DetError::InvalidConfigValueError {
                field: "model.io.head_f_2".to_string(),
                value: io.head_f_2.len().to_string(),
                reason: format!(
                    "Both heads must list the same number of levels ({})",
                    io.head_f_1.len()
                ),
            });
        }

        // 第一個步驟會被 LoadImage 取代，所以至少要有一個
        validation::validate_positive_number("data.test.pipeline", self.data.test.pipeline.len(), 1)?;

        Ok(())
    }

    /// 要載入的計算圖：checkpoint 優先於 `model.graph`
    pub fn graph_path(&self, checkpoint: Option<&Path>) -> Result<PathBuf> {
        match checkpoint {
            Some(path) => Ok(path.to_path_buf()),
            None => validation::validate_required_field("model.graph", &self.model.graph)
                .map(PathBuf::from),
        }
    }
}

impl Validate for DetectorConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

/// `init_detector` 可接受的配置：檔案路徑或配置物件
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Path(PathBuf),
    Config(Box<DetectorConfig>),
}

impl ConfigSource {
    pub fn load(self) -> Result<DetectorConfig> {
        match self {
            ConfigSource::Path(path) => {
                let supported = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
                if !supported {
                    return Err(DetError::TypeError {
                        got: format!("'{}'", path.display()),
                    });
                }
                DetectorConfig::from_file(&path)
            }
            ConfigSource::Config(config) => Ok(*config),
        }
    }
}

impl From<&str> for ConfigSource {
    fn from(path: &str) -> Self {
        ConfigSource::Path(PathBuf::from(path))
    }
}

impl From<String> for ConfigSource {
    fn from(path: String) -> Self {
        ConfigSource::Path(PathBuf::from(path))
    }
}

impl From<&Path> for ConfigSource {
    fn from(path: &Path) -> Self {
        ConfigSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::Path(path)
    }
}

impl From<DetectorConfig> for ConfigSource {
    fn from(config: DetectorConfig) -> Self {
        ConfigSource::Config(Box::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
uncertainty_type = "l2_norm"
k = 10000

[model]
type = "MIAOD"
graph = "work_dirs/miaod.onnx"
pretrained = "torchvision://resnet50"

[model.io]
input = "img"
dets = "dets"
labels = "labels"
head_f_1 = ["f1_p3", "f1_p4"]
head_f_2 = ["f2_p3", "f2_p4"]

[test_cfg]
score_thr = 0.05
max_per_img = 100

[[data.test.pipeline]]
type = "LoadImageFromFile"

[[data.test.pipeline]]
type = "MultiScaleFlipAug"
img_scale = [1000, 600]
flip = false

[[data.test.pipeline.transforms]]
type = "Resize"
keep_ratio = true

[[data.test.pipeline.transforms]]
type = "Normalize"
mean = [123.675, 116.28, 103.53]
std = [58.395, 57.12, 57.375]
to_rgb = true

[[data.test.pipeline.transforms]]
type = "Pad"
size_divisor = 32
"#;

    #[test]
    fn test_parse_basic_toml_config() {
        let config = DetectorConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.uncertainty_type, "l2_norm");
        assert_eq!(config.k, 10000);
        assert_eq!(config.model.io.head_f_1.len(), 2);
        assert_eq!(config.data.test.pipeline.len(), 2);
        match &config.data.test.pipeline[1] {
            TransformSpec::MultiScaleFlipAug {
                img_scale,
                transforms,
                ..
            } => {
                assert_eq!(*img_scale, [1000, 600]);
                assert_eq!(transforms.len(), 3);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("UNCERTAIN_DET_TEST_GRAPH", "/models/miaod.onnx");

        let content = BASIC.replace("work_dirs/miaod.onnx", "${UNCERTAIN_DET_TEST_GRAPH}");
        let config = DetectorConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.model.graph.as_deref(), Some("/models/miaod.onnx"));

        std::env::remove_var("UNCERTAIN_DET_TEST_GRAPH");
    }

    #[test]
    fn test_config_validation() {
        let mut config = DetectorConfig::from_toml_str(BASIC).unwrap();
        config.k = 0;
        assert!(config.validate().is_ok());

        let mut config = DetectorConfig::from_toml_str(BASIC).unwrap();
        config.model.io.head_f_2.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_graph_path_prefers_checkpoint() {
        let mut config = DetectorConfig::from_toml_str(BASIC).unwrap();
        assert_eq!(
            config.graph_path(Some(Path::new("epoch_3.onnx"))).unwrap(),
            PathBuf::from("epoch_3.onnx")
        );
        assert_eq!(
            config.graph_path(None).unwrap(),
            PathBuf::from("work_dirs/miaod.onnx")
        );

        config.model.graph = None;
        assert!(matches!(
            config.graph_path(None),
            Err(DetError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_config_source_from_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = ConfigSource::from(temp_file.path()).load().unwrap();
        assert_eq!(config.model.r#type, "MIAOD");
    }

    #[test]
    fn test_config_source_loads_json() {
        std::env::set_var("UNCERTAIN_DET_JSON_GRAPH", "/models/from_json.onnx");
        let json = r#"{
            "uncertainty_type": "js_divergence",
            "k": 5,
            "model": {
                "type": "MIAOD",
                "graph": "${UNCERTAIN_DET_JSON_GRAPH}",
                "classes": ["car", "person"]
            },
            "test_cfg": { "score_thr": 0.1, "max_per_img": 20 },
            "data": { "test": { "type": "VOCDataset", "pipeline": [
                { "type": "LoadImageFromFile" },
                { "type": "MultiScaleFlipAug", "img_scale": [1000, 600], "flip": false,
                  "transforms": [
                    { "type": "Resize" },
                    { "type": "Pad", "size_divisor": 32 },
                    { "type": "Collect", "keys": ["img"] }
                  ] }
            ] } }
        }"#;
        let mut temp_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();

        let config = ConfigSource::from(temp_file.path()).load().unwrap();
        std::env::remove_var("UNCERTAIN_DET_JSON_GRAPH");

        assert_eq!(config.uncertainty_type, "js_divergence");
        assert_eq!(config.k, 5);
        assert_eq!(config.model.graph.as_deref(), Some("/models/from_json.onnx"));
        assert_eq!(config.model.classes.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.model.io.input, "img");
        assert_eq!(config.test_cfg.max_per_img, 20);
        assert_eq!(config.data.test.pipeline.len(), 2);
        match &config.data.test.pipeline[1] {
            TransformSpec::MultiScaleFlipAug { transforms, .. } => {
                assert!(matches!(
                    transforms[0],
                    TransformSpec::Resize {
                        img_scale: None,
                        keep_ratio: true
                    }
                ));
                assert_eq!(transforms.len(), 3);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_source_rejects_other_types() {
        let temp_file = NamedTempFile::new().unwrap();
        let err = ConfigSource::from(temp_file.path()).load().unwrap_err();
        assert!(matches!(err, DetError::TypeError { .. }));
        assert!(err
            .to_string()
            .starts_with("config must be a filename or Config object, but got"));
    }
}
