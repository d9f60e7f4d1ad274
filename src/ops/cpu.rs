//! Parallel CPU kernels.
//!
//! # CPU Kernels
//!
//! Raw numeric routines over flat row-major `f32` buffers. They know nothing
//! about gradients; [`crate::backprop`] calls them for both the forward
//! values and the local derivatives it hands to the engine.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - A same-shape fast path for binary maps; broadcasting otherwise goes
//!   through a precomputed index map
//!
//! ## Implemented Kernels
//!
//! - `map` / `binary`: elementwise unary and broadcast binary maps
//! - `sum` / `sum_of_squares`: reductions
//! - `matmul`: `m×k · k×n` with optional transposed operands

use rayon::prelude::*;

use crate::shape::Shape;

/// Applies `f` to every element.
pub fn map(data: &[f32], f: impl Fn(f32) -> f32 + Sync + Send) -> Vec<f32> {
    data.par_iter().map(|&x| f(x)).collect()
}

/// Applies `f` elementwise over `lhs` and `rhs` broadcast to `out`.
///
/// `out` must be the broadcast of the two input shapes.
pub fn binary(
    lhs: &[f32],
    lhs_shape: &Shape,
    rhs: &[f32],
    rhs_shape: &Shape,
    out: &Shape,
    f: impl Fn(f32, f32) -> f32 + Sync + Send,
) -> Vec<f32> {
    if lhs_shape == out && rhs_shape == out {
        return lhs.par_iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect();
    }
    if rhs_shape.numel() == 1 && lhs_shape == out {
        let b = rhs[0];
        return lhs.par_iter().map(|&a| f(a, b)).collect();
    }
    if lhs_shape.numel() == 1 && rhs_shape == out {
        let a = lhs[0];
        return rhs.par_iter().map(|&b| f(a, b)).collect();
    }

    let lhs_idx = lhs_shape.broadcast_index_map(out);
    let rhs_idx = rhs_shape.broadcast_index_map(out);
    lhs_idx
        .par_iter()
        .zip(&rhs_idx)
        .map(|(&i, &j)| f(lhs[i], rhs[j]))
        .collect()
}

pub fn sum(data: &[f32]) -> f32 {
    data.par_iter().sum()
}

pub fn sum_of_squares(data: &[f32]) -> f32 {
    data.par_iter().map(|&x| x * x).sum()
}

/// Matrix product of `a` (`m×k`, or `k×m` when `trans_a`) and `b`
/// (`k×n`, or `n×k` when `trans_b`), giving an `m×n` buffer.
///
/// Rows of the output are computed in parallel.
pub fn matmul(
    a: &[f32],
    b: &[f32],
    m: usize,
    k: usize,
    n: usize,
    trans_a: bool,
    trans_b: bool,
) -> Vec<f32> {
    let mut out = vec![0.0f32; m * n];
    if n == 0 {
        return out;
    }

    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, slot) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for l in 0..k {
                let av = if trans_a { a[l * m + i] } else { a[i * k + l] };
                let bv = if trans_b { b[j * k + l] } else { b[l * n + j] };
                acc += av * bv;
            }
            *slot = acc;
        }
    });

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_broadcasts_scalar_and_rows() {
        let m = Shape::new([2, 2]);
        let out = binary(&[1.0, 2.0, 3.0, 4.0], &m, &[2.0], &Shape::scalar(), &m, |a, b| a + b);
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0]);

        let row = Shape::new([2]);
        let out = binary(&[1.0, 2.0, 3.0, 4.0], &m, &[10.0, 20.0], &row, &m, |a, b| a * b);
        assert_eq!(out, vec![10.0, 40.0, 30.0, 80.0]);
    }

    #[test]
    fn binary_broadcasts_both_sides() {
        let col = Shape::new([2, 1]);
        let row = Shape::new([1, 3]);
        let out_shape = Shape::new([2, 3]);
        let out = binary(&[1.0, 2.0], &col, &[10.0, 20.0, 30.0], &row, &out_shape, |a, b| a + b);
        assert_eq!(out, vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn matmul_plain_and_transposed() {
        // [[1, 2], [3, 4]] · [[5, 6], [7, 8]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert_eq!(matmul(&a, &b, 2, 2, 2, false, false), vec![19.0, 22.0, 43.0, 50.0]);
        // aᵀ · b
        assert_eq!(matmul(&a, &b, 2, 2, 2, true, false), vec![26.0, 30.0, 38.0, 44.0]);
        // a · bᵀ
        assert_eq!(matmul(&a, &b, 2, 2, 2, false, true), vec![17.0, 23.0, 39.0, 53.0]);
    }

    #[test]
    fn reductions() {
        assert_eq!(sum(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(sum_of_squares(&[3.0, 4.0]), 25.0);
    }
}
