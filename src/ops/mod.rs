//! # Kernel Layer
//!
//! Numeric kernels used by the differentiable operations.
//!
//! ## Submodules
//!
//! - [`cpu`] — multi-threaded CPU routines (the only backend)
//!
//! ## Extending
//!
//! To add a differentiable operation:
//!
//! 1. Implement the raw forward (and, if needed, derivative) kernel in `cpu`
//! 2. Add a `BackwardOp` for it in [`crate::backprop`]
//! 3. Keep shape checks in `backprop`, never in the kernels

pub mod cpu;
