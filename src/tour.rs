//! A guided walk through the autograd API.
//!
//! [`run`] builds tensors, inspects the history recorded for them, runs
//! backward passes (with and without a seed vector) and toggles tracking,
//! writing one `label: value` block per observation to the given writer.
//! The facts worth asserting on are also returned in a [`TourReport`].

use std::io::Write;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::error::{Result, TensorError};
use crate::grad_mode::no_grad;
use crate::tensors::Tensor;

/// Settings for [`run`].
#[derive(Debug, Clone, PartialEq)]
pub struct TourConfig {
    /// Seed for the random tensors; OS entropy when `None`.
    pub seed: Option<u64>,
    /// The doubling loop stops once the vector's norm reaches this.
    pub norm_threshold: f32,
    /// Seed gradient for the vector-Jacobian product, one entry per element.
    pub seed_vector: Vec<f32>,
    /// Upper bound on doublings, so a zero vector cannot loop forever.
    pub max_doublings: usize,
}

/// Length of the random vector doubled in the vector-Jacobian step.
pub const VECTOR_LEN: usize = 3;

impl TourConfig {
    /// Checks the settings that would otherwise only fail mid-transcript.
    pub fn validate(&self) -> Result<()> {
        if self.seed_vector.len() != VECTOR_LEN {
            return Err(TensorError::ShapeMismatch {
                expected: vec![VECTOR_LEN],
                got: vec![self.seed_vector.len()],
            });
        }
        Ok(())
    }
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            seed: None,
            norm_threshold: 1000.0,
            seed_vector: vec![0.1, 1.0, 0.0001],
            max_doublings: 64,
        }
    }
}

/// What the tour observed.
#[derive(Debug, Clone)]
pub struct TourReport {
    /// `d(out)/dx` for `out = mean(3 (x + 2)²)` at `x = ones(2, 2)`.
    pub mean_grad: Tensor,
    /// Name of the history node of `(a * a).sum()`.
    pub sum_grad_fn: Option<String>,
    /// Tracking flag of `a` before and after enabling it in place.
    pub a_requires_grad: (bool, bool),
    /// Multiplications by two applied to the random vector (the first included).
    pub doublings: usize,
    /// Norm of the vector when the loop stopped.
    pub final_norm: f32,
    /// `x.grad` after the vector-Jacobian product.
    pub vjp_grad: Tensor,
    /// `(x ** 2).requires_grad` outside and inside a no-grad scope.
    pub pow_requires_grad: (bool, bool),
    /// `x.detach().requires_grad`.
    pub detached_requires_grad: bool,
    /// Whether `x` and its detached alias compare equal everywhere.
    pub detached_equal: bool,
}

fn show(out: &mut impl Write, label: &str, value: impl std::fmt::Display) -> Result<()> {
    writeln!(out, "{label}: {value}\n")?;
    Ok(())
}

fn show_opt<T: std::fmt::Display>(out: &mut impl Write, label: &str, value: Option<T>) -> Result<()> {
    match value {
        Some(v) => show(out, label, v),
        None => show(out, label, "None"),
    }
}

fn accumulated_grad(x: &Tensor) -> Result<Tensor> {
    x.grad().ok_or(TensorError::MissingGrad)
}

/// Runs every step of the tour, writing the transcript to `out`.
///
/// The config is validated before anything is written.
pub fn run(config: &TourConfig, out: &mut impl Write) -> Result<TourReport> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    info!("tracking a leaf tensor");
    let x = Tensor::ones([2, 2]).requires_grad(true);
    show(out, "x", &x)?;

    let y = &x + 2.0;
    show(out, "y", &y)?;
    show_opt(out, "y.grad_fn", y.grad_fn())?;

    let z = &(&y * &y) * 3.0;
    let mean = z.mean();
    writeln!(out, "z: {z}, out: {mean}\n")?;

    info!("toggling requires_grad in place");
    let a = Tensor::randn([2, 2], &mut rng);
    let a = &(&a * 3.0) / &(&a - 1.0);
    let before = a.is_requires_grad();
    show(out, "a.requires_grad", before)?;
    a.set_requires_grad(true)?;
    let after = a.is_requires_grad();
    show(out, "a.requires_grad", after)?;
    let b = (&a * &a).sum();
    show_opt(out, "b.grad_fn", b.grad_fn())?;

    info!("backpropagating a scalar");
    mean.backward()?;
    let mean_grad = accumulated_grad(&x)?;
    show(out, "x.grad", &mean_grad)?;

    info!("vector-Jacobian product");
    let x = Tensor::randn([VECTOR_LEN], &mut rng).requires_grad(true);
    let mut y = &x * 2.0;
    let mut doublings = 1;
    let mut norm = y.detach().norm().item()?;
    while norm < config.norm_threshold {
        if doublings >= config.max_doublings {
            return Err(TensorError::NormDidNotConverge {
                threshold: config.norm_threshold,
                doublings,
            });
        }
        y = &y * 2.0;
        doublings += 1;
        norm = y.detach().norm().item()?;
    }
    show(out, "y", &y)?;

    let v = Tensor::try_new([VECTOR_LEN], config.seed_vector.clone())?;
    y.backward_with(&v)?;
    let vjp_grad = accumulated_grad(&x)?;
    show(out, "x.grad", &vjp_grad)?;

    info!("suspending tracking");
    show(out, "x.requires_grad", x.is_requires_grad())?;
    let tracked = x.pow(2.0).is_requires_grad();
    show(out, "(x ** 2).requires_grad", tracked)?;
    let untracked = no_grad(|| x.pow(2.0).is_requires_grad());
    show(out, "(x ** 2).requires_grad", untracked)?;

    show(out, "x.requires_grad", x.is_requires_grad())?;
    let detached = x.detach();
    show(out, "y.requires_grad", detached.is_requires_grad())?;
    let equal = x.eq(&detached)?.all();
    show(out, "x.eq(y).all()", equal)?;

    Ok(TourReport {
        mean_grad,
        sum_grad_fn: b.grad_fn().map(|f| f.name().to_string()),
        a_requires_grad: (before, after),
        doublings,
        final_norm: norm,
        vjp_grad,
        pow_requires_grad: (tracked, untracked),
        detached_requires_grad: detached.is_requires_grad(),
        detached_equal: equal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_has_every_label() {
        let config = TourConfig {
            seed: Some(1),
            ..TourConfig::default()
        };
        let mut buf = Vec::new();
        run(&config, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        for label in [
            "x: tensor(",
            "y.grad_fn: <AddBackward0>",
            "z: tensor(",
            "out: tensor(27., grad_fn=<MeanBackward0>)",
            "a.requires_grad: false",
            "a.requires_grad: true",
            "b.grad_fn: <SumBackward0>",
            "x.grad: tensor([[4.5000, 4.5000],",
            "(x ** 2).requires_grad: true",
            "(x ** 2).requires_grad: false",
            "y.requires_grad: false",
            "x.eq(y).all(): true",
        ] {
            assert!(text.contains(label), "missing {label:?} in:\n{text}");
        }
    }

    #[test]
    fn missing_grad_is_reported() {
        let x = Tensor::ones([2]).requires_grad(true);
        assert!(matches!(accumulated_grad(&x), Err(TensorError::MissingGrad)));
        x.sum().backward().unwrap();
        assert_eq!(accumulated_grad(&x).unwrap().data(), &[1.0, 1.0]);
    }

    #[test]
    fn validate_checks_vector_length() {
        assert!(TourConfig::default().validate().is_ok());
        let config = TourConfig {
            seed_vector: vec![1.0; 4],
            ..TourConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TensorError::ShapeMismatch { ref got, .. }) if got == &[4]
        ));
    }

    #[test]
    fn unreachable_threshold_is_bounded() {
        let config = TourConfig {
            seed: Some(3),
            norm_threshold: f32::INFINITY,
            max_doublings: 5,
            ..TourConfig::default()
        };
        let err = run(&config, &mut std::io::sink()).unwrap_err();
        assert!(matches!(err, TensorError::NormDidNotConverge { doublings: 5, .. }));
    }
}
