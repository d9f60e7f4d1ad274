//! Core tensor type.
//!
//! # Tensors
//!
//! A [`Tensor`] is a handle: cloning it yields another reference to the same
//! tensor, including its gradient slot and tracking flag. The numeric
//! storage is immutable and reference counted, which is what lets
//! [`Tensor::detach`] return an alias that shares data without sharing
//! history.
//!
//! ## Design Highlights
//! - Elements are `f32`, stored flat in row-major order
//! - Leaf tensors own a gradient slot that backward passes accumulate into
//! - Non-leaf tensors carry the [`GradFn`] that produced them
//! - The `tensor!` macro builds tensors from nested array literals
//!
//! ## Example
//!
//! ```rust
//! use briny_autograd::tensors::Tensor;
//! let t = Tensor::new([2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape().dims(), &[2, 3]);
//! assert!(t.is_leaf());
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use briny::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::approx;
use crate::error::{Result, TensorError};
use crate::graph::{GradFn, GradSlot, Node};
use crate::ops::cpu;
use crate::shape::Shape;

/// Shape and data awaiting validation.
struct RawTensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Validate for RawTensor {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.shape.numel() != self.data.len() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

struct TensorImpl {
    storage: Rc<[f32]>,
    shape: Shape,
    requires_grad: Cell<bool>,
    grad: GradSlot,
    grad_fn: Option<Rc<Node>>,
}

/// N-dimensional `f32` array with optional gradient tracking.
#[derive(Clone)]
pub struct Tensor {
    inner: Rc<TensorImpl>,
}

impl Tensor {
    fn from_parts(storage: Rc<[f32]>, shape: Shape, requires_grad: bool, grad_fn: Option<Rc<Node>>) -> Self {
        Self {
            inner: Rc::new(TensorImpl {
                storage,
                shape,
                requires_grad: Cell::new(requires_grad),
                grad: Rc::new(RefCell::new(None)),
                grad_fn,
            }),
        }
    }

    /// Output of a recorded operation.
    pub(crate) fn from_op(data: Vec<f32>, shape: Shape, grad_fn: Option<Rc<Node>>) -> Self {
        let tracked = grad_fn.is_some();
        Self::from_parts(data.into(), shape, tracked, grad_fn)
    }

    /// Creates a leaf tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape.
    pub fn new(shape: impl Into<Shape>, data: Vec<f32>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.numel(),
            data.len(),
            "shape {} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self::from_parts(data.into(), shape, false, None)
    }

    /// Fallible form of [`Tensor::new`].
    pub fn try_new(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        let raw = RawTensor {
            shape: shape.into(),
            data,
        };
        let len = raw.data.len();
        let dims = raw.shape.dims().to_vec();
        let trusted = TrustedData::new(raw)
            .map_err(|_| TensorError::InvalidShape { shape: dims, len })?;
        let RawTensor { shape, data } = trusted.into_inner();
        Ok(Self::from_parts(data.into(), shape, false, None))
    }

    /// Rank-0 tensor holding `value`.
    pub fn scalar(value: f32) -> Self {
        Self::from_parts(Rc::from([value]), Shape::scalar(), false, None)
    }

    /// One-dimensional tensor over `data`.
    pub fn from_vec(data: Vec<f32>) -> Self {
        let shape = Shape::new([data.len()]);
        Self::from_parts(data.into(), shape, false, None)
    }

    pub fn full(shape: impl Into<Shape>, value: f32) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.numel()];
        Self::from_parts(data.into(), shape, false, None)
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Samples a tensor from the standard normal distribution.
    pub fn randn<R: Rng + ?Sized>(shape: impl Into<Shape>, rng: &mut R) -> Self {
        let shape = shape.into();
        let data: Vec<f32> = (0..shape.numel())
            .map(|_| -> f32 { StandardNormal.sample(rng) })
            .collect();
        Self::from_parts(data.into(), shape, false, None)
    }

    /// Builder form of [`Tensor::set_requires_grad`] for freshly created leaves.
    ///
    /// # Panics
    /// Panics when clearing the flag on a non-leaf tensor.
    pub fn requires_grad(self, flag: bool) -> Self {
        if let Err(err) = self.set_requires_grad(flag) {
            panic!("{err}");
        }
        self
    }

    /// Changes the tracking flag in place.
    ///
    /// Leaves accept either value. A non-leaf already requires grad, so
    /// `true` is a no-op and `false` is rejected: use [`Tensor::detach`].
    pub fn set_requires_grad(&self, flag: bool) -> Result<()> {
        if !self.is_leaf() {
            return if flag {
                Ok(())
            } else {
                Err(TensorError::NonLeafRequiresGrad)
            };
        }
        self.inner.requires_grad.set(flag);
        Ok(())
    }

    pub fn is_requires_grad(&self) -> bool {
        self.inner.requires_grad.get()
    }

    /// `true` for tensors not produced by a recorded operation.
    pub fn is_leaf(&self) -> bool {
        self.inner.grad_fn.is_none()
    }

    pub fn grad_fn(&self) -> Option<GradFn> {
        self.inner.grad_fn.as_ref().map(|node| GradFn(Rc::clone(node)))
    }

    pub(crate) fn node(&self) -> Option<&Rc<Node>> {
        self.inner.grad_fn.as_ref()
    }

    pub(crate) fn grad_slot(&self) -> &GradSlot {
        &self.inner.grad
    }

    /// Accumulated gradient of a leaf, `None` until a backward pass reaches it.
    pub fn grad(&self) -> Option<Tensor> {
        self.inner
            .grad
            .borrow()
            .as_ref()
            .map(|g| Tensor::new(self.inner.shape.clone(), g.clone()))
    }

    /// Clears the accumulated gradient.
    pub fn zero_grad(&self) {
        self.inner.grad.borrow_mut().take();
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn numel(&self) -> usize {
        self.inner.shape.numel()
    }

    pub fn data(&self) -> &[f32] {
        &self.inner.storage
    }

    /// Shared handle to the storage, for saving operands without copying.
    pub(crate) fn storage_rc(&self) -> Rc<[f32]> {
        Rc::clone(&self.inner.storage)
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.inner.storage.to_vec()
    }

    /// Value of a single-element tensor.
    pub fn item(&self) -> Result<f32> {
        match self.data() {
            [value] => Ok(*value),
            _ => Err(TensorError::NotScalar(self.shape().dims().to_vec())),
        }
    }

    /// New leaf sharing this tensor's storage, with no history and no tracking.
    pub fn detach(&self) -> Tensor {
        Self::from_parts(Rc::clone(&self.inner.storage), self.inner.shape.clone(), false, None)
    }

    /// `true` when both tensors read the same underlying buffer.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }

    /// `true` when both handles refer to the same tensor.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Elementwise equality as `1.0`/`0.0`, broadcasting. Never tracked.
    pub fn eq(&self, other: &Tensor) -> Result<Tensor> {
        let out = Shape::broadcast(self.shape(), other.shape())?;
        let data = cpu::binary(
            self.data(),
            self.shape(),
            other.data(),
            other.shape(),
            &out,
            |a, b| if a == b { 1.0 } else { 0.0 },
        );
        Ok(Tensor::new(out, data))
    }

    /// `true` when every element is non-zero.
    pub fn all(&self) -> bool {
        self.data().iter().all(|&x| x != 0.0)
    }

    /// Same shape and every pair within `atol + rtol * |other|`.
    pub fn allclose(&self, other: &Tensor, rtol: f32, atol: f32) -> bool {
        self.shape() == other.shape() && approx::allclose(self.data(), other.data(), rtol, atol)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", self.shape())
            .field("data", &self.data())
            .field("requires_grad", &self.is_requires_grad())
            .field("grad_fn", &self.grad_fn().map(|g| g.name()))
            .finish()
    }
}

/// Width of the `tensor(` prefix, used to align nested rows.
const PREFIX_WIDTH: usize = 7;

fn format_element(x: f32, integral: bool) -> String {
    if integral {
        format!("{x:.0}.")
    } else {
        format!("{x:.4}")
    }
}

fn write_nested(
    f: &mut fmt::Formatter<'_>,
    cells: &[String],
    dims: &[usize],
    depth: usize,
    width: usize,
) -> fmt::Result {
    let Some((&len, rest)) = dims.split_first() else {
        return write!(f, "{:>width$}", cells[0]);
    };
    write!(f, "[")?;
    if len > 0 {
        let chunk = cells.len() / len;
        for i in 0..len {
            if i > 0 {
                write!(f, ",")?;
                if rest.is_empty() {
                    write!(f, " ")?;
                } else {
                    for _ in 0..rest.len() {
                        writeln!(f)?;
                    }
                    write!(f, "{:indent$}", "", indent = PREFIX_WIDTH + depth + 1)?;
                }
            }
            write_nested(f, &cells[i * chunk..(i + 1) * chunk], rest, depth + 1, width)?;
        }
    }
    write!(f, "]")
}

impl fmt::Display for Tensor {
    /// Renders as `tensor([[1., 1.],\n        [1., 1.]], requires_grad=True)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data();
        let integral = data.iter().all(|x| x.is_finite() && x.fract() == 0.0);
        let cells: Vec<String> = data.iter().map(|&x| format_element(x, integral)).collect();
        let width = cells.iter().map(String::len).max().unwrap_or(0);

        write!(f, "tensor(")?;
        write_nested(f, &cells, self.shape().dims(), 0, width)?;
        if let Some(grad_fn) = self.grad_fn() {
            write!(f, ", grad_fn={grad_fn}")?;
        } else if self.is_requires_grad() {
            write!(f, ", requires_grad=True")?;
        }
        write!(f, ")")
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
/// Elements may be negated (`-2.0`).
///
/// # Example
/// ```
/// use briny_autograd::tensor;
/// let t = tensor!([[1.0, -2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// assert_eq!(t.data()[1], -2.0);
/// ```
#[macro_export]
macro_rules! tensor {
    (@row [$($acc:expr),*]) => {
        vec![$($acc),*]
    };

    (@row [$($acc:expr),*] - $lit:literal $(, $($rest:tt)*)?) => {
        $crate::tensor!(@row [$($acc,)* $crate::tensor!(- $lit)] $($($rest)*)?)
    };

    (@row [$($acc:expr),*] $head:tt $(, $($rest:tt)*)?) => {
        $crate::tensor!(@row [$($acc,)* $crate::tensor!($head)] $($($rest)*)?)
    };

    (- $lit:literal) => {
        $crate::tensors::Tensor::scalar(-($lit as f32))
    };

    ($lit:literal) => {
        $crate::tensors::Tensor::scalar($lit as f32)
    };

    ([ $($body:tt)+ ]) => {{
        let children: Vec<$crate::tensors::Tensor> = $crate::tensor!(@row [] $($body)+);
        let first_shape = children[0].shape().clone();
        assert!(children.iter().all(|c| *c.shape() == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut dims = vec![children.len()];
        dims.extend_from_slice(first_shape.dims());
        let mut data = Vec::with_capacity(children.len() * first_shape.numel());
        for c in &children { data.extend_from_slice(c.data()); }
        $crate::tensors::Tensor::new(dims, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_rejects_mismatched_data() {
        let err = Tensor::try_new([2, 2], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, TensorError::InvalidShape { len: 3, .. }));
        assert!(Tensor::try_new([3], vec![1.0, 2.0, 3.0]).is_ok());
    }

    #[test]
    fn detach_aliases_storage() {
        let x = Tensor::ones([2]).requires_grad(true);
        let y = x.detach();
        assert!(y.shares_storage(&x));
        assert!(!y.ptr_eq(&x));
        assert!(!y.is_requires_grad());
        assert!(y.is_leaf());
    }

    #[test]
    fn item_needs_one_element() {
        assert_eq!(Tensor::scalar(2.5).item().unwrap(), 2.5);
        assert_eq!(Tensor::ones([1, 1]).item().unwrap(), 1.0);
        assert!(matches!(Tensor::ones([2]).item(), Err(TensorError::NotScalar(_))));
    }

    #[test]
    fn display_matrix_with_flag() {
        let x = Tensor::ones([2, 2]).requires_grad(true);
        assert_eq!(
            x.to_string(),
            "tensor([[1., 1.],\n        [1., 1.]], requires_grad=True)"
        );
    }

    #[test]
    fn display_fractional_and_scalar() {
        assert_eq!(Tensor::from_vec(vec![0.5, -1.25]).to_string(), "tensor([ 0.5000, -1.2500])");
        assert_eq!(Tensor::scalar(27.0).to_string(), "tensor(27.)");
    }

    #[test]
    fn display_rank3_separates_blocks() {
        let t = Tensor::zeros([2, 1, 2]);
        assert_eq!(t.to_string(), "tensor([[[0., 0.]],\n\n        [[0., 0.]]])");
    }

    #[test]
    fn randn_is_seeded() {
        use rand::SeedableRng;
        let a = Tensor::randn([5], &mut rand::rngs::StdRng::seed_from_u64(7));
        let b = Tensor::randn([5], &mut rand::rngs::StdRng::seed_from_u64(7));
        assert_eq!(a.data(), b.data());
        assert_eq!(a.numel(), 5);
        assert!(a.data().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn eq_and_all() {
        let a = crate::tensor!([1.0, 2.0, 3.0]);
        let b = crate::tensor!([1.0, 2.0, 4.0]);
        assert_eq!(a.eq(&b).unwrap().data(), &[1.0, 1.0, 0.0]);
        assert!(!a.eq(&b).unwrap().all());
        assert!(a.eq(&a.detach()).unwrap().all());
    }

    #[test]
    fn literal_accepts_negative_elements() {
        assert_eq!(crate::tensor!(-3.0).item().unwrap(), -3.0);

        let v = crate::tensor!([1.0, -2.0, 0.5]);
        assert_eq!(v.data(), &[1.0, -2.0, 0.5]);

        let m = crate::tensor!([[-1.0, 2.0], [3, -4.5],]);
        assert_eq!(m.shape().dims(), &[2, 2]);
        assert_eq!(m.data(), &[-1.0, 2.0, 3.0, -4.5]);
    }

    #[test]
    fn saved_storage_is_shared() {
        let x = crate::tensor!([1.0, 2.0]);
        assert!(Rc::ptr_eq(&x.storage_rc(), &x.detach().storage_rc()));
    }

    #[test]
    #[should_panic(expected = "ragged")]
    fn ragged_literal_panics() {
        let _ = crate::tensor!([[1.0, 2.0], [3.0]]);
    }
}
