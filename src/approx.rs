//! Approximate equality of `f32` values, slices and tensors.

use crate::tensors::Tensor;

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The expected minimum epsilon accepted on `f32`s.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// How close two values are, from best to worst.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`F32_MIN_ERROR`].
    Precise = 0,

    /// Within [`F32_AVG_ERROR`].
    Partial = 1,

    /// Within [`F32_MAX_ERROR`].
    Relative = 2,

    /// Not close.
    Scarce = 3,
}

/// Grades the distance between `self` and `rhs`.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq for f32 {
    fn approx_eq(&self, rhs: &f32) -> ApproxEquality {
        let dif = (self - rhs).abs();

        if dif < F32_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F32_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F32_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

/// The worst grade over all pairs; slices of different length are `Scarce`.
impl RelativeEq for [f32] {
    fn approx_eq(&self, rhs: &[f32]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(a, b)| a.approx_eq(b))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

impl RelativeEq for Tensor {
    fn approx_eq(&self, rhs: &Tensor) -> ApproxEquality {
        if self.shape() != rhs.shape() {
            return ApproxEquality::Scarce;
        }
        self.data().approx_eq(rhs.data())
    }
}

/// `true` when `a` and `b` are [`ApproxEquality::Precise`].
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// `|a - b| <= atol + rtol * |b|` for every pair, with equal lengths.
///
/// # Example
/// ```
/// use briny_autograd::approx::allclose;
/// assert!(allclose(&[1.0, 2.0], &[1.0, 2.000001], 1e-5, 1e-8));
/// assert!(!allclose(&[1.0], &[1.1], 1e-5, 1e-8));
/// ```
pub fn allclose(a: &[f32], b: &[f32], rtol: f32, atol: f32) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= atol + rtol * y.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_scalars() {
        assert_eq!(1.0f32.approx_eq(&1.0), ApproxEquality::Precise);
        assert_eq!(1.0f32.approx_eq(&1.0005), ApproxEquality::Relative);
        assert_eq!(1.0f32.approx_eq(&1.1), ApproxEquality::Scarce);
    }

    #[test]
    fn slice_takes_worst_grade() {
        let a: [f32; 3] = [1.0, 2.0, 3.0];
        let b: [f32; 3] = [1.0, 2.0005, 3.0];
        assert_eq!(a[..].approx_eq(&b[..]), ApproxEquality::Relative);
        assert_eq!(a[..].approx_eq(&b[..2]), ApproxEquality::Scarce);
    }

    #[test]
    fn tensors_compare_shapes() {
        let a = Tensor::ones([2, 2]);
        let b = Tensor::ones([4]);
        assert_eq!(a.approx_eq(&b), ApproxEquality::Scarce);
        assert!(approx_eq(&a, &a.detach()));
    }
}
