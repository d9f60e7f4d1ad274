//! Error types for tensor construction, arithmetic and backpropagation.

use thiserror::Error;

/// Every failure the engine can report.
#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("shapes {lhs:?} and {rhs:?} cannot be broadcast together")]
    Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("shape {shape:?} is incompatible with {len} data elements")]
    InvalidShape { shape: Vec<usize>, len: usize },

    #[error("expected a single-element tensor, got shape {0:?}")]
    NotScalar(Vec<usize>),

    #[error("grad can be implicitly created only for scalar outputs (shape {0:?}); pass a seed gradient")]
    NonScalarBackward(Vec<usize>),

    #[error("tensor does not require grad and does not have a grad_fn")]
    NoGradFn,

    #[error("no gradient has been accumulated for this tensor")]
    MissingGrad,

    #[error("trying to backward through {0} a second time; its saved values were already freed")]
    GraphReleased(&'static str),

    #[error("you can only change requires_grad flags of leaf tensors; use detach() instead")]
    NonLeafRequiresGrad,

    #[error("norm stayed below {threshold} after {doublings} doublings")]
    NormDidNotConverge { threshold: f32, doublings: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TensorError>;
