mod common;

use common::{config, image, FakeBackend};
use std::sync::Arc;
use tempfile::TempDir;
use uncertain_det::core::detector::Detector;
use uncertain_det::{
    async_inference_detector, inference_detector, init_detector, show_result, BBox, DetError,
    ImageSource, InferenceEngine, ShowOptions,
};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[test]
fn test_inference_returns_rescaled_detections_and_uncertainty() {
    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Detector::with_backend(config(), backend.clone(), false).unwrap();

    let (result, uncertainty) = inference_detector(&detector, image()).unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(result.bboxes.len(), 3);
    assert_eq!(result.len(), 2);
    assert_eq!(
        result.bboxes[0][0],
        BBox {
            x1: 5.0,
            y1: 2.0,
            x2: 15.0,
            y2: 10.0,
            score: 0.95
        }
    );
    assert!(result.bboxes[1].is_empty());
    assert_eq!(result.bboxes[2][0].x2, 31.0);

    // 三個樣本：0、第二列、第二層；k = 2 取最大的兩個
    let row = (sigmoid(2.0) - sigmoid(-2.0)).powi(2);
    let level = (sigmoid(1.0) - sigmoid(-1.0)).powi(2) / 2.0;
    let expected = (row + level) / 2.0;
    assert!((uncertainty - expected).abs() < 1e-5, "{} vs {}", uncertainty, expected);
}

#[test]
fn test_identical_heads_give_zero_uncertainty() {
    let heads = vec![ndarray::array![[0.3_f32, -1.2, 4.0], [2.0, 0.0, -0.5]]];
    for kind in ["l2_norm", "kl_divergence", "js_divergence"] {
        let mut cfg = config();
        cfg.uncertainty_type = kind.to_string();
        let backend = Arc::new(FakeBackend::new(heads.clone(), heads.clone()));
        let detector = Detector::with_backend(cfg, backend, false).unwrap();

        let (_, uncertainty) = inference_detector(&detector, image()).unwrap();
        assert!(uncertainty.abs() < 1e-6, "{} gave {}", kind, uncertainty);
    }
}

#[test]
fn test_unknown_uncertainty_type_fails_after_forward() {
    let mut cfg = config();
    cfg.uncertainty_type = "entropy".to_string();
    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Detector::with_backend(cfg, backend.clone(), false).unwrap();

    let err = inference_detector(&detector, image()).unwrap_err();
    assert_eq!(backend.calls(), 1);
    assert_eq!(
        err.to_string(),
        "entropy is not valid uncertainty_type. List of possible uncertainty_type: \
         [\"l2_norm\", \"kl_divergence\", \"cross_entropy\", \"js_divergence\", \"focal_loss\"]. \
         Change it in config parameters."
    );
}

#[test]
fn test_classes_from_checkpoint_metadata() {
    let backend = Arc::new(FakeBackend::disagreeing().with_metadata("CLASSES", "a,b,c,d"));
    let detector = Detector::with_backend(config(), backend, true).unwrap();
    assert_eq!(detector.num_classes(), Some(4));
    assert_eq!(detector.class_name(3), Some("d"));
}

#[test]
fn test_missing_checkpoint_classes_fall_back_to_coco() {
    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Detector::with_backend(config(), backend, true).unwrap();
    assert_eq!(detector.num_classes(), Some(80));
    assert_eq!(detector.class_name(0), Some("person"));
}

#[test]
fn test_without_checkpoint_uses_config_classes() {
    let backend = Arc::new(FakeBackend::disagreeing().with_metadata("CLASSES", "x"));
    let detector = Detector::with_backend(config(), backend, false).unwrap();
    assert_eq!(detector.class_name(1), Some("dog"));
}

#[test]
fn test_init_detector_rejects_unsupported_config_type() {
    let err = init_detector("configs/miaod.py", None, "cpu").unwrap_err();
    assert!(matches!(err, DetError::TypeError { .. }));
}

#[test]
fn test_init_detector_rejects_unknown_device() {
    let err = init_detector(config(), None, "tpu:0").unwrap_err();
    assert!(matches!(err, DetError::InvalidConfigValueError { .. }));
}

#[test]
fn test_init_detector_requires_a_graph() {
    let err = init_detector(config(), None, "cpu").unwrap_err();
    assert!(matches!(err, DetError::MissingConfigError { .. }));
}

#[tokio::test]
async fn test_async_inference_returns_detections_only() {
    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Detector::with_backend(config(), backend.clone(), false).unwrap();

    let result = async_inference_detector(&detector, image()).await.unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_async_requests_overlap() {
    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Arc::new(Detector::with_backend(config(), backend.clone(), false).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let detector = Arc::clone(&detector);
            tokio::spawn(async move { async_inference_detector(&detector, image()).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(backend.calls(), 4);
}

#[test]
fn test_show_result_writes_figure() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("figures").join("result.png");

    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Arc::new(Detector::with_backend(config(), backend, false).unwrap());
    let (result, _) = inference_detector(&detector, image()).unwrap();

    let opts = ShowOptions {
        fig_size: (1.28, 0.64),
        ..ShowOptions::default()
    };
    let saved = show_result(&detector, image(), &result, &opts, &output).unwrap();

    assert_eq!(saved, output);
    let figure = image::open(&output).unwrap();
    assert_eq!((figure.width(), figure.height()), (128, 64));
}

#[test]
fn test_engine_run_reports_everything() {
    let temp_dir = TempDir::new().unwrap();
    let image_path = temp_dir.path().join("input.png");
    image().save(&image_path).unwrap();
    let figure_path = temp_dir.path().join("out.png");

    let backend = Arc::new(FakeBackend::disagreeing());
    let detector = Detector::with_backend(config(), backend, false).unwrap();
    let engine = InferenceEngine::new(detector);

    let report = engine
        .run(
            ImageSource::from(image_path.as_path()),
            Some((figure_path.as_path(), ShowOptions::default())),
        )
        .unwrap();

    assert_eq!(report.num_detections, 2);
    assert_eq!(report.image.as_deref(), image_path.to_str());
    assert_eq!(report.uncertainty_type.as_deref(), Some("l2_norm"));
    assert!(report.uncertainty.unwrap() > 0.0);
    assert_eq!(report.figure.as_deref(), Some(figure_path.as_path()));
    assert!(figure_path.exists());
}

#[test]
fn test_engine_run_async_skips_uncertainty() {
    let backend = Arc::new(FakeBackend::disagreeing());
    let engine = InferenceEngine::new(Detector::with_backend(config(), backend, false).unwrap());

    let report = tokio_test::block_on(engine.run_async(image().into())).unwrap();

    assert_eq!(report.num_detections, 2);
    assert!(report.image.is_none());
    assert!(report.uncertainty.is_none());
    assert!(report.figure.is_none());
}

#[test]
fn test_zero_k_scores_all_samples() {
    let mut cfg = config();
    cfg.k = 0;
    let detector =
        Detector::with_backend(cfg, Arc::new(FakeBackend::disagreeing()), false).unwrap();

    let (_, uncertainty) = inference_detector(&detector, image()).unwrap();

    // 三個樣本全部平均
    let row = (sigmoid(2.0) - sigmoid(-2.0)).powi(2);
    let level = (sigmoid(1.0) - sigmoid(-1.0)).powi(2) / 2.0;
    let expected = (row + level) / 3.0;
    assert!((uncertainty - expected).abs() < 1e-5, "{} vs {}", uncertainty, expected);
}
