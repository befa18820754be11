use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::Tensor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ModelIoConfig;
use crate::domain::model::{Device, ModelInput, RawOutput};
use crate::domain::ports::InferenceBackend;
use crate::utils::error::{DetError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphInfo {
    pub path: PathBuf,
    pub device: Device,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

pub struct OnnxBackend {
    session: Mutex<Session>,
    io: ModelIoConfig,
    info: GraphInfo,
}

impl OnnxBackend {
    pub fn load(path: &Path, io: ModelIoConfig, device: Device) -> Result<Self> {
        tracing::info!("Loading ONNX graph from: {}", path.display());

        if !path.exists() {
            return Err(DetError::model(format!("Model not found: {}", path.display())));
        }

        let provider = match device {
            Device::Cpu => CPUExecutionProvider::default().build(),
            Device::Cuda(id) => CUDAExecutionProvider::default().with_device_id(id).build(),
        };

        let session = Session::builder()
            .map_err(|e| DetError::model(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetError::model(format!("Failed to set optimization: {}", e)))?
            .with_execution_providers([provider])
            .map_err(|e| DetError::model(format!("Failed to register {}: {}", device, e)))?
            .commit_from_file(path)
            .map_err(|e| DetError::model(format!("Failed to load model: {}", e)))?;

        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        check_io_names(&io, &inputs, &outputs)?;

        tracing::info!(
            "ONNX graph loaded ({} inputs, {} outputs) on {}",
            inputs.len(),
            outputs.len(),
            device
        );

        Ok(Self {
            session: Mutex::new(session),
            io,
            info: GraphInfo {
                path: path.to_path_buf(),
                device,
                inputs,
                outputs,
                loaded_at: Utc::now(),
            },
        })
    }

    pub fn info(&self) -> &GraphInfo {
        &self.info
    }
}

impl InferenceBackend for OnnxBackend {
    fn forward(&self, input: &ModelInput) -> Result<RawOutput> {
        let start_time = std::time::Instant::now();
        let tensor = Tensor::from_array(input.img.clone())?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![self.io.input.as_str() => tensor])?;

        let dets = extract_matrix(&outputs, &self.io.dets)?;
        let labels = extract_labels(&outputs, &self.io.labels)?;
        let head_f_1 = self
            .io
            .head_f_1
            .iter()
            .map(|name| extract_matrix(&outputs, name))
            .collect::<Result<Vec<_>>>()?;
        let head_f_2 = self
            .io
            .head_f_2
            .iter()
            .map(|name| extract_matrix(&outputs, name))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Forward pass took {}us ({} raw detections)",
            start_time.elapsed().as_micros(),
            dets.nrows()
        );

        Ok(RawOutput {
            dets,
            labels,
            head_f_1,
            head_f_2,
        })
    }

    fn device(&self) -> Device {
        self.info.device
    }

    fn metadata(&self, key: &str) -> Result<Option<String>> {
        let session = self.session.lock();
        let metadata = session.metadata()?;
        Ok(metadata.custom(key)?)
    }
}

fn check_io_names(io: &ModelIoConfig, inputs: &[String], outputs: &[String]) -> Result<()> {
    if !inputs.contains(&io.input) {
        return Err(DetError::InvalidConfigValueError {
            field: "model.io.input".to_string(),
            value: io.input.clone(),
            reason: format!("Graph inputs are {:?}", inputs),
        });
    }

    let expected = [&io.dets, &io.labels]
        .into_iter()
        .chain(io.head_f_1.iter())
        .chain(io.head_f_2.iter());
    for name in expected {
        if !outputs.contains(name) {
            return Err(DetError::InvalidConfigValueError {
                field: "model.io".to_string(),
                value: name.clone(),
                reason: format!("Graph outputs are {:?}", outputs),
            });
        }
    }
    Ok(())
}

fn output<'a>(outputs: &'a SessionOutputs, name: &str) -> Result<&'a ort::value::DynValue> {
    outputs
        .get(name)
        .ok_or_else(|| DetError::processing(format!("graph produced no output '{}'", name)))
}

fn extract_matrix(outputs: &SessionOutputs, name: &str) -> Result<Array2<f32>> {
    let (shape, data) = output(outputs, name)?.try_extract_tensor::<f32>()?;
    to_matrix(name, &shape, data)
}

/// 類別通常匯出為 int64，也接受 int32 或 float
fn extract_labels(outputs: &SessionOutputs, name: &str) -> Result<Array1<i64>> {
    let value = output(outputs, name)?;
    if let Ok((_, data)) = value.try_extract_tensor::<i64>() {
        return Ok(Array1::from(data.to_vec()));
    }
    if let Ok((_, data)) = value.try_extract_tensor::<i32>() {
        return Ok(data.iter().map(|&v| v as i64).collect());
    }
    let (_, data) = value.try_extract_tensor::<f32>()?;
    Ok(data.iter().map(|&v| v.round() as i64).collect())
}

/// 轉成 `[rows, cols]`，去掉前面大小為 1 的批次軸
pub fn to_matrix(name: &str, shape: &[i64], data: &[f32]) -> Result<Array2<f32>> {
    let mut dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    while dims.len() > 2 && dims[0] == 1 {
        dims.remove(0);
    }
    match dims.as_slice() {
        [rows, cols] => Ok(Array2::from_shape_vec((*rows, *cols), data.to_vec())?),
        other => Err(DetError::processing(format!(
            "output '{}' should be 2-D, got shape {:?}",
            name, other
        ))),
    }
}
