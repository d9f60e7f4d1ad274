//! Differentiable operations.
//!
//! # Recorded Operations
//!
//! Each operation computes its forward value with the [`crate::ops::cpu`]
//! kernels and, when tracking applies, records a graph node holding the
//! minimal saved state its backward rule needs.
//!
//! Tracking applies when grad mode is enabled **and** at least one input
//! requires grad. Otherwise the result is a plain leaf and nothing is saved.
//!
//! ## Broadcasting
//!
//! Binary operations follow NumPy broadcasting. Gradients flowing into a
//! broadcast input are summed back down to that input's shape.
//!
//! ## Usage Guidelines
//!
//! - Operator overloads (`+ - * /`, unary `-`) **panic** on incompatible
//!   shapes; the `try_*` methods return [`TensorError`] instead.
//! - Scalars on either side of an operator become rank-0 constants.
//!
//! # Example
//! ```rust
//! use briny_autograd::tensors::Tensor;
//!
//! let x = Tensor::ones([2, 2]).requires_grad(true);
//! let y = &x + 2.0;
//! assert_eq!(y.grad_fn().unwrap().name(), "AddBackward0");
//! let out = (&(&y * &y) * 3.0).mean();
//! out.backward().unwrap();
//! assert_eq!(x.grad().unwrap().data(), &[4.5; 4]);
//! ```

use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

use tracing::trace;

use crate::error::{Result, TensorError};
use crate::grad_mode::is_grad_enabled;
use crate::graph::{BackwardOp, Edge, Node};
use crate::ops::cpu;
use crate::shape::Shape;
use crate::tensors::Tensor;

/// Builds the result of an operation, recording a node when tracking applies.
///
/// `make_op` runs only when the node is actually recorded.
fn record<F>(name: &'static str, data: Vec<f32>, shape: Shape, inputs: &[&Tensor], make_op: F) -> Tensor
where
    F: FnOnce() -> Box<dyn BackwardOp>,
{
    let tracked = is_grad_enabled() && inputs.iter().any(|t| t.is_requires_grad());
    if !tracked {
        return Tensor::from_op(data, shape, None);
    }

    let edges = inputs
        .iter()
        .map(|t| {
            if !t.is_requires_grad() {
                None
            } else if let Some(node) = t.node() {
                Some(Edge::Node(Rc::clone(node)))
            } else {
                Some(Edge::Leaf(Rc::clone(t.grad_slot())))
            }
        })
        .collect();

    trace!(op = name, shape = %shape, "recording node");
    let node = Node::new(name, shape.clone(), make_op(), edges);
    Tensor::from_op(data, shape, Some(Rc::new(node)))
}

/// Shapes involved in a broadcast binary op.
#[derive(Clone)]
struct BinaryShapes {
    lhs: Shape,
    rhs: Shape,
    out: Shape,
}

impl BinaryShapes {
    fn of(lhs: &Tensor, rhs: &Tensor) -> Result<Self> {
        Ok(Self {
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
            out: Shape::broadcast(lhs.shape(), rhs.shape())?,
        })
    }

    fn lhs_grad(&self, full: &[f32]) -> Vec<f32> {
        self.lhs.sum_to(full, &self.out)
    }

    fn rhs_grad(&self, full: &[f32]) -> Vec<f32> {
        self.rhs.sum_to(full, &self.out)
    }
}

struct AddBackward {
    shapes: BinaryShapes,
    rhs_sign: f32,
}

impl BackwardOp for AddBackward {
    fn backward(&self, grad: &[f32], needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        let lhs = needs[0].then(|| self.shapes.lhs_grad(grad));
        let rhs = needs[1].then(|| {
            if self.rhs_sign < 0.0 {
                self.shapes.rhs_grad(&cpu::map(grad, |g| -g))
            } else {
                self.shapes.rhs_grad(grad)
            }
        });
        vec![lhs, rhs]
    }
}

struct MulBackward {
    shapes: BinaryShapes,
    lhs: Rc<[f32]>,
    rhs: Rc<[f32]>,
}

impl BackwardOp for MulBackward {
    fn backward(&self, grad: &[f32], needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        let s = &self.shapes;
        let lhs = needs[0].then(|| {
            let full = cpu::binary(grad, &s.out, &self.rhs, &s.rhs, &s.out, |g, b| g * b);
            s.lhs_grad(&full)
        });
        let rhs = needs[1].then(|| {
            let full = cpu::binary(grad, &s.out, &self.lhs, &s.lhs, &s.out, |g, a| g * a);
            s.rhs_grad(&full)
        });
        vec![lhs, rhs]
    }
}

struct DivBackward {
    shapes: BinaryShapes,
    lhs: Rc<[f32]>,
    rhs: Rc<[f32]>,
}

impl BackwardOp for DivBackward {
    fn backward(&self, grad: &[f32], needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        let s = &self.shapes;
        let lhs = needs[0].then(|| {
            let full = cpu::binary(grad, &s.out, &self.rhs, &s.rhs, &s.out, |g, b| g / b);
            s.lhs_grad(&full)
        });
        let rhs = needs[1].then(|| {
            // -g * a / b²
            let ga = cpu::binary(grad, &s.out, &self.lhs, &s.lhs, &s.out, |g, a| -g * a);
            let full = cpu::binary(&ga, &s.out, &self.rhs, &s.rhs, &s.out, |t, b| t / (b * b));
            s.rhs_grad(&full)
        });
        vec![lhs, rhs]
    }
}

struct NegBackward;

impl BackwardOp for NegBackward {
    fn backward(&self, grad: &[f32], _needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        vec![Some(cpu::map(grad, |g| -g))]
    }
}

struct PowBackward {
    input: Rc<[f32]>,
    exponent: f32,
}

impl BackwardOp for PowBackward {
    fn backward(&self, grad: &[f32], _needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        let p = self.exponent;
        let scale = cpu::map(&self.input, |x| if p == 0.0 { 0.0 } else { p * x.powf(p - 1.0) });
        vec![Some(grad.iter().zip(&scale).map(|(g, s)| g * s).collect())]
    }
}

struct ExpBackward {
    output: Rc<[f32]>,
}

impl BackwardOp for ExpBackward {
    fn backward(&self, grad: &[f32], _needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        vec![Some(grad.iter().zip(self.output.iter()).map(|(g, y)| g * y).collect())]
    }
}

/// Backward of `sum` (`scale = 1`) and `mean` (`scale = 1/n`).
struct ReduceBackward {
    numel: usize,
    scale: f32,
}

impl BackwardOp for ReduceBackward {
    fn backward(&self, grad: &[f32], _needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        vec![Some(vec![grad[0] * self.scale; self.numel])]
    }
}

struct NormBackward {
    input: Rc<[f32]>,
    norm: f32,
}

impl BackwardOp for NormBackward {
    fn backward(&self, grad: &[f32], _needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        let g = grad[0];
        let out = if self.norm == 0.0 {
            vec![0.0; self.input.len()]
        } else {
            let k = g / self.norm;
            cpu::map(&self.input, |x| x * k)
        };
        vec![Some(out)]
    }
}

struct MmBackward {
    lhs: Rc<[f32]>,
    rhs: Rc<[f32]>,
    m: usize,
    k: usize,
    n: usize,
}

impl BackwardOp for MmBackward {
    fn backward(&self, grad: &[f32], needs: &[bool]) -> Vec<Option<Vec<f32>>> {
        let (m, k, n) = (self.m, self.k, self.n);
        // dA = G · Bᵀ, dB = Aᵀ · G
        let lhs = needs[0].then(|| cpu::matmul(grad, &self.rhs, m, n, k, false, true));
        let rhs = needs[1].then(|| cpu::matmul(&self.lhs, grad, k, m, n, true, false));
        vec![lhs, rhs]
    }
}

impl Tensor {
    pub fn try_add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.add_signed(rhs, 1.0, "AddBackward0")
    }

    pub fn try_sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.add_signed(rhs, -1.0, "SubBackward0")
    }

    fn add_signed(&self, rhs: &Tensor, sign: f32, name: &'static str) -> Result<Tensor> {
        let shapes = BinaryShapes::of(self, rhs)?;
        let data = cpu::binary(self.data(), &shapes.lhs, rhs.data(), &shapes.rhs, &shapes.out, |a, b| {
            a + sign * b
        });
        let out = shapes.out.clone();
        Ok(record(name, data, out, &[self, rhs], || {
            Box::new(AddBackward {
                shapes,
                rhs_sign: sign,
            })
        }))
    }

    pub fn try_mul(&self, rhs: &Tensor) -> Result<Tensor> {
        let shapes = BinaryShapes::of(self, rhs)?;
        let data = cpu::binary(self.data(), &shapes.lhs, rhs.data(), &shapes.rhs, &shapes.out, |a, b| a * b);
        let out = shapes.out.clone();
        Ok(record("MulBackward0", data, out, &[self, rhs], || {
            Box::new(MulBackward {
                shapes,
                lhs: self.storage_rc(),
                rhs: rhs.storage_rc(),
            })
        }))
    }

    pub fn try_div(&self, rhs: &Tensor) -> Result<Tensor> {
        let shapes = BinaryShapes::of(self, rhs)?;
        let data = cpu::binary(self.data(), &shapes.lhs, rhs.data(), &shapes.rhs, &shapes.out, |a, b| a / b);
        let out = shapes.out.clone();
        Ok(record("DivBackward0", data, out, &[self, rhs], || {
            Box::new(DivBackward {
                shapes,
                lhs: self.storage_rc(),
                rhs: rhs.storage_rc(),
            })
        }))
    }

    /// Elementwise `self ** exponent`.
    pub fn pow(&self, exponent: f32) -> Tensor {
        let data = cpu::map(self.data(), |x| x.powf(exponent));
        record("PowBackward0", data, self.shape().clone(), &[self], || {
            Box::new(PowBackward {
                input: self.storage_rc(),
                exponent,
            })
        })
    }

    pub fn exp(&self) -> Tensor {
        let data = cpu::map(self.data(), f32::exp);
        let output: Rc<[f32]> = Rc::from(data.as_slice());
        record("ExpBackward0", data, self.shape().clone(), &[self], || {
            Box::new(ExpBackward { output })
        })
    }

    /// Sum of all elements as a rank-0 tensor.
    pub fn sum(&self) -> Tensor {
        let total = cpu::sum(self.data());
        let numel = self.numel();
        record("SumBackward0", vec![total], Shape::scalar(), &[self], || {
            Box::new(ReduceBackward { numel, scale: 1.0 })
        })
    }

    /// Mean of all elements as a rank-0 tensor. `NaN` for empty tensors.
    pub fn mean(&self) -> Tensor {
        let numel = self.numel();
        let mean = cpu::sum(self.data()) / numel as f32;
        record("MeanBackward0", vec![mean], Shape::scalar(), &[self], || {
            Box::new(ReduceBackward {
                numel,
                scale: 1.0 / numel as f32,
            })
        })
    }

    /// Euclidean (L2) norm over all elements as a rank-0 tensor.
    ///
    /// The gradient at the origin is taken as zero.
    pub fn norm(&self) -> Tensor {
        let norm = cpu::sum_of_squares(self.data()).sqrt();
        record("NormBackward1", vec![norm], Shape::scalar(), &[self], || {
            Box::new(NormBackward {
                input: self.storage_rc(),
                norm,
            })
        })
    }

    /// Matrix product of two 2-D tensors.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let (a, b) = (self.shape().dims(), rhs.shape().dims());
        let (&[m, k], &[k2, n]) = (a, b) else {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.first().copied().unwrap_or(0), b.first().copied().unwrap_or(0)],
                got: a.iter().chain(b).copied().collect(),
            });
        };
        if k != k2 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![k, n],
                got: b.to_vec(),
            });
        }
        let data = cpu::matmul(self.data(), rhs.data(), m, k, n, false, false);
        Ok(record("MmBackward0", data, Shape::new([m, n]), &[self, rhs], || {
            Box::new(MmBackward {
                lhs: self.storage_rc(),
                rhs: rhs.storage_rc(),
                m,
                k,
                n,
            })
        }))
    }
}

impl Neg for &Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        let data = cpu::map(self.data(), |x| -x);
        record("NegBackward0", data, self.shape().clone(), &[self], || Box::new(NegBackward))
    }
}

impl Neg for Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        -&self
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $try:ident) => {
        impl $trait<&Tensor> for &Tensor {
            type Output = Tensor;

            fn $method(self, rhs: &Tensor) -> Tensor {
                match self.$try(rhs) {
                    Ok(out) => out,
                    Err(err) => panic!("{err}"),
                }
            }
        }

        impl $trait<Tensor> for Tensor {
            type Output = Tensor;

            fn $method(self, rhs: Tensor) -> Tensor {
                (&self).$method(&rhs)
            }
        }

        impl $trait<&Tensor> for Tensor {
            type Output = Tensor;

            fn $method(self, rhs: &Tensor) -> Tensor {
                (&self).$method(rhs)
            }
        }

        impl $trait<Tensor> for &Tensor {
            type Output = Tensor;

            fn $method(self, rhs: Tensor) -> Tensor {
                self.$method(&rhs)
            }
        }

        impl $trait<f32> for &Tensor {
            type Output = Tensor;

            fn $method(self, rhs: f32) -> Tensor {
                self.$method(&Tensor::scalar(rhs))
            }
        }

        impl $trait<f32> for Tensor {
            type Output = Tensor;

            fn $method(self, rhs: f32) -> Tensor {
                (&self).$method(&Tensor::scalar(rhs))
            }
        }

        impl $trait<&Tensor> for f32 {
            type Output = Tensor;

            fn $method(self, rhs: &Tensor) -> Tensor {
                (&Tensor::scalar(self)).$method(rhs)
            }
        }

        impl $trait<Tensor> for f32 {
            type Output = Tensor;

            fn $method(self, rhs: Tensor) -> Tensor {
                (&Tensor::scalar(self)).$method(&rhs)
            }
        }
    };
}

binary_operator!(Add, add, try_add);
binary_operator!(Sub, sub, try_sub);
binary_operator!(Mul, mul, try_mul);
binary_operator!(Div, div, try_div);
