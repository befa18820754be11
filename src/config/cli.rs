use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "uncertain-det")]
#[command(about = "Run a detector on one image and score its uncertainty")]
pub struct CliConfig {
    #[arg(short, long, help = "Path to the TOML or JSON detector config")]
    pub config: String,

    #[arg(long, help = "ONNX checkpoint (defaults to model.graph)")]
    pub checkpoint: Option<String>,

    #[arg(short, long, help = "Image to run inference on")]
    pub image: String,

    #[arg(long, default_value = "cuda:0", help = "cpu, cuda or cuda:N")]
    pub device: String,

    #[arg(long, help = "Write the rendered detections to this PNG")]
    pub show: Option<String>,

    #[arg(long, default_value = "0.3")]
    pub score_thr: f32,

    #[arg(long, help = "Override uncertainty_type from the config")]
    pub uncertainty_type: Option<String>,

    #[arg(long, help = "Override k from the config (0 averages every sample)")]
    pub k: Option<usize>,

    #[arg(long = "async", help = "Run the async inference path (detections only)")]
    pub use_async: bool,

    #[arg(long, help = "Enable system monitoring")]
    pub monitor: bool,

    #[arg(long, help = "Emit JSON logs and print the result as JSON")]
    pub json: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_path("config", &self.config)?;
        validation::validate_path("image", &self.image)?;
        validation::validate_range("score_thr", self.score_thr, 0.0, 1.0)?;

        if let Some(checkpoint) = &self.checkpoint {
            validation::validate_file_extension("checkpoint", checkpoint, &["onnx"])?;
        }
        if let Some(show) = &self.show {
            validation::validate_path("show", show)?;
        }
        Ok(())
    }
}
