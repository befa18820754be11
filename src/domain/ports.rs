use crate::domain::model::{
    Device, DetectionResult, ImageSource, ModelInput, PipelineData, RawOutput,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 測試階段資料管線的一個步驟
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, data: PipelineData) -> Result<PipelineData>;
}

/// 執行匯出的計算圖
pub trait InferenceBackend: Send + Sync {
    fn forward(&self, input: &ModelInput) -> Result<RawOutput>;
    fn device(&self) -> Device;
    /// 權重附帶的自訂 metadata，例如 `CLASSES`
    fn metadata(&self, key: &str) -> Result<Option<String>>;
}

/// 非同步推論：前處理與前向傳播都不在 executor 執行緒上執行
#[async_trait]
pub trait AsyncForward: Send + Sync {
    async fn aforward_test(&self, img: ImageSource) -> Result<DetectionResult>;
}
