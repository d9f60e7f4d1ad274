//! Gradient-tracking mode.
//!
//! Whether new operations are recorded into the graph is a per-thread flag.
//! It starts enabled. [`NoGradGuard`] suspends recording until it is
//! dropped, restoring whatever state was active before, so guards nest.
//!
//! # Example
//!
//! ```rust
//! use briny_autograd::{grad_mode, tensors::Tensor};
//!
//! let x = Tensor::ones([3]).requires_grad(true);
//! let tracked = &x * 2.0;
//! let untracked = grad_mode::no_grad(|| &x * 2.0);
//! assert!(tracked.is_requires_grad());
//! assert!(!untracked.is_requires_grad());
//! ```

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns `true` when operations on this thread are being recorded.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Sets the recording flag for this thread, returning the previous value.
pub fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|flag| flag.replace(enabled))
}

/// Disables recording for its lifetime.
#[must_use = "gradient tracking is re-enabled as soon as the guard is dropped"]
pub struct NoGradGuard {
    prev: bool,
}

impl NoGradGuard {
    pub fn new() -> Self {
        Self {
            prev: set_grad_enabled(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}

/// Runs `f` with recording disabled.
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    let _guard = NoGradGuard::new();
    f()
}

/// Runs `f` with recording enabled, even inside a [`no_grad`] scope.
pub fn enable_grad<R>(f: impl FnOnce() -> R) -> R {
    let _guard = NoGradGuard {
        prev: set_grad_enabled(true),
    };
    f()
}
