use anyhow::Context;
use clap::Parser;
use std::path::Path;
use uncertain_det::utils::error::ErrorSeverity;
use uncertain_det::utils::{logger, validation::Validate};
use uncertain_det::{
    CliConfig, ConfigSource, DetError, Detector, DetectorConfig, ImageSource, InferenceEngine,
    InferenceReport, ShowOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting uncertain-det CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        exit_with(&e);
    }

    let detector_config = match load_config(&config) {
        Ok(detector_config) => detector_config,
        Err(e) => exit_with(&e),
    };

    let detector = match uncertain_det::init_detector(
        detector_config,
        config.checkpoint.as_deref().map(Path::new),
        &config.device,
    ) {
        Ok(detector) => detector,
        Err(e) => exit_with(&e),
    };
    log_detector(&detector);

    let engine = InferenceEngine::new_with_monitoring(detector, config.monitor);
    let image = ImageSource::from(config.image.as_str());

    let outcome = if config.use_async {
        engine.run_async(image).await
    } else {
        let opts = ShowOptions::default().with_score_thr(config.score_thr);
        let show = config.show.as_deref().map(|out| (Path::new(out), opts));
        engine.run(image, show)
    };

    match outcome {
        Ok(report) => print_report(&report, config.json).context("printing report")?,
        Err(e) => exit_with(&e),
    }

    Ok(())
}

/// 載入配置檔並套用命令列覆寫
fn load_config(config: &CliConfig) -> uncertain_det::Result<DetectorConfig> {
    let mut detector_config = ConfigSource::from(config.config.as_str()).load()?;

    if let Some(kind) = &config.uncertainty_type {
        detector_config.uncertainty_type = kind.clone();
        tracing::info!("🔧 uncertainty_type overridden to: {}", kind);
    }
    if let Some(k) = config.k {
        detector_config.k = k;
        tracing::info!("🔧 k overridden to: {}", k);
    }
    Ok(detector_config)
}

fn log_detector(detector: &Detector) {
    tracing::info!(
        "✅ Detector ready: {} on {} ({} classes)",
        detector.cfg.model.r#type,
        detector.device(),
        detector
            .num_classes()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
}

fn print_report(report: &InferenceReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!("✅ {} detections in {:.1}ms", report.num_detections, report.elapsed_ms);
    if let (Some(kind), Some(value)) = (&report.uncertainty_type, report.uncertainty) {
        println!("📈 {} uncertainty: {:.6}", kind, value);
    }
    if let Some(figure) = &report.figure {
        println!("📁 Figure saved to: {}", figure.display());
    }
    Ok(())
}

fn exit_with(e: &DetError) -> ! {
    tracing::error!(
        "❌ Inference failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
