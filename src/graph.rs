//! Operation history.
//!
//! Every tracked operation records a [`Node`]: the backward rule for that
//! operation plus one edge per input. An edge either points at the node that
//! produced the input, or at the gradient slot of a leaf tensor (shown as
//! `AccumulateGrad`, the way leaves appear in a history listing). Inputs
//! that did not require grad have no edge.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::shape::Shape;

/// Gradient buffer of a leaf tensor, shared between the tensor and every
/// edge that feeds it.
pub(crate) type GradSlot = Rc<RefCell<Option<Vec<f32>>>>;

/// Local derivative of one recorded operation.
pub(crate) trait BackwardOp {
    /// Maps `dL/d(out)` to `dL/d(input)` for every input whose `needs` entry
    /// is set. Returned gradients have the input's shape.
    fn backward(&self, grad: &[f32], needs: &[bool]) -> Vec<Option<Vec<f32>>>;
}

pub(crate) enum Edge {
    Node(Rc<Node>),
    Leaf(GradSlot),
}

pub(crate) struct Node {
    name: &'static str,
    shape: Shape,
    op: RefCell<Option<Box<dyn BackwardOp>>>,
    edges: Vec<Option<Edge>>,
}

impl Node {
    pub(crate) fn new(
        name: &'static str,
        shape: Shape,
        op: Box<dyn BackwardOp>,
        edges: Vec<Option<Edge>>,
    ) -> Self {
        Self {
            name,
            shape,
            op: RefCell::new(Some(op)),
            edges,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn shape(&self) -> &Shape {
        &self.shape
    }

    pub(crate) fn edges(&self) -> &[Option<Edge>] {
        &self.edges
    }

    pub(crate) fn is_released(&self) -> bool {
        self.op.borrow().is_none()
    }

    /// Runs the backward rule, or `None` if saved state was already freed.
    pub(crate) fn apply(&self, grad: &[f32]) -> Option<Vec<Option<Vec<f32>>>> {
        let needs: Vec<bool> = self.edges.iter().map(Option::is_some).collect();
        self.op
            .borrow()
            .as_ref()
            .map(|op| op.backward(grad, &needs))
    }

    /// Drops the saved tensors of this node.
    pub(crate) fn release(&self) {
        self.op.borrow_mut().take();
    }
}

impl Drop for Node {
    /// Unlinks upstream nodes with an explicit stack; a recursive drop of a
    /// long chain would exhaust the thread's stack.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_node_edges(&mut self.edges, &mut pending);
        while let Some(node) = pending.pop() {
            // shared nodes are still reachable elsewhere, only the count drops
            if let Ok(mut node) = Rc::try_unwrap(node) {
                take_node_edges(&mut node.edges, &mut pending);
            }
        }
    }
}

fn take_node_edges(edges: &mut Vec<Option<Edge>>, pending: &mut Vec<Rc<Node>>) {
    pending.extend(edges.drain(..).filter_map(|edge| match edge {
        Some(Edge::Node(node)) => Some(node),
        _ => None,
    }));
}

/// Public handle to the operation that produced a tensor.
///
/// Displayed as `<AddBackward0>`.
#[derive(Clone)]
pub struct GradFn(pub(crate) Rc<Node>);

impl GradFn {
    /// Name of the backward rule, e.g. `MulBackward0`.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Shape of the tensor this node produced.
    pub fn shape(&self) -> &Shape {
        self.0.shape()
    }

    /// Upstream functions, one per input of the recorded operation.
    pub fn next_functions(&self) -> Vec<NextFunction> {
        self.0
            .edges()
            .iter()
            .map(|edge| match edge {
                Some(Edge::Node(node)) => NextFunction::Node(GradFn(Rc::clone(node))),
                Some(Edge::Leaf(_)) => NextFunction::AccumulateGrad,
                None => NextFunction::Untracked,
            })
            .collect()
    }

    /// Whether a previous backward already freed this node's saved values.
    pub fn is_released(&self) -> bool {
        self.0.is_released()
    }

    /// `true` when both handles refer to the same recorded operation.
    pub fn ptr_eq(&self, other: &GradFn) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for GradFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name())
    }
}

impl fmt::Debug for GradFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradFn")
            .field("name", &self.name())
            .field("shape", self.shape())
            .field("released", &self.is_released())
            .finish()
    }
}

/// One input edge of a [`GradFn`].
#[derive(Debug, Clone)]
pub enum NextFunction {
    /// Input was produced by another tracked operation.
    Node(GradFn),
    /// Input is a leaf that requires grad; its gradient is accumulated.
    AccumulateGrad,
    /// Input did not require grad.
    Untracked,
}

impl NextFunction {
    pub fn name(&self) -> &'static str {
        match self {
            NextFunction::Node(f) => f.name(),
            NextFunction::AccumulateGrad => "AccumulateGrad",
            NextFunction::Untracked => "None",
        }
    }
}
