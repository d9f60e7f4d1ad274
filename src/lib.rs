//! briny_autograd: a small dynamic-graph autograd engine for Rust.
//!
//! Operations on tensors that require grad are recorded as they run. A
//! backward pass then walks that history in reverse, accumulating
//! gradients into the leaf tensors.
//!
//! # Features
//!
//! - `f32` tensors with NumPy-style broadcasting.
//! - History inspection through [`graph::GradFn`] (`AddBackward0`, ...).
//! - Scalar backward or vector-Jacobian products with a seed tensor.
//! - Per-thread no-grad scopes and storage-sharing [`tensors::Tensor::detach`].
//!
//! # Modules
//!
//! - [`tensors`] — Core tensor type, construction and display.
//! - [`backprop`] — Differentiable operations and operator overloads.
//! - [`engine`] — The backward traversal.
//! - [`grad_mode`] — Enabling and suspending recording.
//! - [`tour`] — A guided walk through the whole API.
//!
//! # Example
//!
//! ```rust
//! use briny_autograd::tensors::Tensor;
//!
//! let x = Tensor::from_vec(vec![1.0, 2.0, 3.0]).requires_grad(true);
//! let y = (&x * &x).sum();
//! y.backward()?;
//! assert_eq!(x.grad().unwrap().data(), &[2.0, 4.0, 6.0]);
//! # Ok::<(), briny_autograd::TensorError>(())
//! ```

pub mod approx;
pub mod backprop;
pub mod engine;
pub mod error;
pub mod grad_mode;
pub mod graph;
pub mod ops;
pub mod shape;
pub mod tensors;
pub mod tour;

pub use engine::BackwardOptions;
pub use error::{Result, TensorError};
pub use grad_mode::{NoGradGuard, no_grad};
pub use graph::{GradFn, NextFunction};
pub use shape::Shape;
pub use tensors::Tensor;
