//! Tensor shapes and NumPy-style broadcasting.
//!
//! Shapes are row-major. An empty dimension list describes a scalar, which
//! holds exactly one element. Broadcasting aligns dimensions from the
//! trailing end; two sizes are compatible when they are equal or one of
//! them is `1`.

use std::fmt;

use crate::error::{Result, TensorError};

/// Dimension sizes of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of elements, `1` for scalars.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.0.len()];
        for i in (0..self.0.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }

    /// Computes the shape produced by broadcasting `lhs` against `rhs`.
    ///
    /// # Example
    /// ```
    /// use briny_autograd::shape::Shape;
    /// let out = Shape::broadcast(&Shape::new([2, 1, 3]), &Shape::new([4, 1])).unwrap();
    /// assert_eq!(out.dims(), &[2, 4, 3]);
    /// ```
    pub fn broadcast(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let rank = lhs.rank().max(rhs.rank());
        let mut out = vec![0; rank];
        for (i, slot) in out.iter_mut().enumerate() {
            let l = lhs.dim_from_end(rank - 1 - i);
            let r = rhs.dim_from_end(rank - 1 - i);
            *slot = match (l, r) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => {
                    return Err(TensorError::Broadcast {
                        lhs: lhs.0.clone(),
                        rhs: rhs.0.clone(),
                    });
                }
            };
        }
        Ok(Shape(out))
    }

    /// Size of the `k`-th dimension counted from the end, `1` when absent.
    fn dim_from_end(&self, k: usize) -> usize {
        if k < self.0.len() {
            self.0[self.0.len() - 1 - k]
        } else {
            1
        }
    }

    /// Maps every flat index of `out` (a broadcast of `self`) to the flat
    /// index of the element of `self` it reads.
    pub(crate) fn broadcast_index_map(&self, out: &Shape) -> Vec<usize> {
        let rank = out.rank();
        let out_strides = out.strides();
        let own_strides = self.strides();
        // stride of each output axis inside `self`, zero where broadcast
        let mut eff = vec![0usize; rank];
        for (axis, e) in eff.iter_mut().enumerate() {
            let back = rank - 1 - axis;
            if back < self.rank() {
                let own_axis = self.rank() - 1 - back;
                if self.0[own_axis] != 1 {
                    *e = own_strides[own_axis];
                }
            }
        }
        (0..out.numel())
            .map(|flat| {
                let mut rem = flat;
                let mut idx = 0;
                for axis in 0..rank {
                    let coord = rem / out_strides[axis];
                    rem %= out_strides[axis];
                    idx += coord * eff[axis];
                }
                idx
            })
            .collect()
    }

    /// Sums `grad`, laid out in the broadcast shape `from`, back down to `self`.
    pub(crate) fn sum_to(&self, grad: &[f32], from: &Shape) -> Vec<f32> {
        if self == from {
            return grad.to_vec();
        }
        let mut out = vec![0.0; self.numel()];
        for (g, idx) in grad.iter().zip(self.broadcast_index_map(from)) {
            out[idx] += g;
        }
        out
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
