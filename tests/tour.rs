use briny_autograd::TensorError;
use briny_autograd::tour::{TourConfig, run};

fn seeded(seed: u64) -> TourConfig {
    TourConfig {
        seed: Some(seed),
        ..TourConfig::default()
    }
}

#[test]
fn test_tour_report_facts() {
    let report = run(&seeded(42), &mut std::io::sink()).unwrap();

    assert_eq!(report.mean_grad.data(), &[4.5; 4]);
    assert_eq!(report.sum_grad_fn.as_deref(), Some("SumBackward0"));
    assert_eq!(report.a_requires_grad, (false, true));
    assert!(report.final_norm >= 1000.0);
    assert!(report.doublings >= 1);
    assert_eq!(report.pow_requires_grad, (true, false));
    assert!(!report.detached_requires_grad);
    assert!(report.detached_equal);
}

#[test]
fn test_vjp_scales_seed_vector() {
    let config = seeded(7);
    let report = run(&config, &mut std::io::sink()).unwrap();

    let scale = 2f32.powi(report.doublings as i32);
    for (g, v) in report.vjp_grad.data().iter().zip(&config.seed_vector) {
        assert!((g - v * scale).abs() <= 1e-6 * (v * scale).abs().max(1.0));
    }
}

#[test]
fn test_same_seed_same_transcript() {
    let mut first = Vec::new();
    let mut second = Vec::new();
    run(&seeded(9), &mut first).unwrap();
    run(&seeded(9), &mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_low_threshold_stops_after_first_doubling() {
    let config = TourConfig {
        norm_threshold: 0.0,
        ..seeded(5)
    };
    let report = run(&config, &mut std::io::sink()).unwrap();
    assert_eq!(report.doublings, 1);
}

#[test]
fn test_seed_vector_length_is_checked() {
    let config = TourConfig {
        seed_vector: vec![1.0, 1.0],
        ..seeded(5)
    };
    let mut transcript = Vec::new();
    let err = run(&config, &mut transcript).unwrap_err();
    assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    assert!(transcript.is_empty());
}
