//! Reverse-mode traversal.
//!
//! A backward pass walks the recorded history from a root tensor in
//! topological order, so every node fires exactly once, after the gradients
//! from all of its consumers have been summed. Leaf gradients are added to
//! whatever the leaf already holds.
//!
//! Unless [`BackwardOptions::retain_graph`] is set, each node's saved values
//! are freed once it fires, and a later pass through it fails with
//! [`TensorError::GraphReleased`].

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{Result, TensorError};
use crate::grad_mode::NoGradGuard;
use crate::graph::{Edge, GradSlot, Node};
use crate::tensors::Tensor;

/// Knobs for a backward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackwardOptions {
    /// Keep saved values so the same graph can be differentiated again.
    pub retain_graph: bool,
}

impl Tensor {
    /// Backpropagates from a single-element tensor with seed `1.0`.
    pub fn backward(&self) -> Result<()> {
        self.backward_with_options(None, BackwardOptions::default())
    }

    /// Backpropagates `seed` (`dL/dself`), computing a vector-Jacobian product.
    pub fn backward_with(&self, seed: &Tensor) -> Result<()> {
        self.backward_with_options(Some(seed), BackwardOptions::default())
    }

    pub fn backward_with_options(&self, seed: Option<&Tensor>, options: BackwardOptions) -> Result<()> {
        let seed = match seed {
            Some(seed) => {
                if seed.shape() != self.shape() {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape().dims().to_vec(),
                        got: seed.shape().dims().to_vec(),
                    });
                }
                seed.to_vec()
            }
            None => {
                if self.numel() != 1 {
                    return Err(TensorError::NonScalarBackward(self.shape().dims().to_vec()));
                }
                vec![1.0]
            }
        };

        if !self.is_requires_grad() {
            return Err(TensorError::NoGradFn);
        }

        let _guard = NoGradGuard::new();
        match self.node() {
            Some(root) => run(root, seed, options),
            None => {
                accumulate(self.grad_slot(), &seed);
                Ok(())
            }
        }
    }
}

fn key(node: &Rc<Node>) -> usize {
    Rc::as_ptr(node) as usize
}

fn accumulate(slot: &GradSlot, grad: &[f32]) {
    let mut slot = slot.borrow_mut();
    match slot.as_mut() {
        Some(existing) => existing.iter_mut().zip(grad).for_each(|(e, g)| *e += g),
        None => *slot = Some(grad.to_vec()),
    }
}

/// Nodes reachable from `root`, consumers before producers.
fn topological_order(root: &Rc<Node>) -> Vec<Rc<Node>> {
    let mut visited = HashSet::new();
    let mut post = Vec::new();
    // (node, children already pushed)
    let mut stack = vec![(Rc::clone(root), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            post.push(node);
            continue;
        }
        if !visited.insert(key(&node)) {
            continue;
        }
        stack.push((Rc::clone(&node), true));
        for edge in node.edges().iter().flatten() {
            if let Edge::Node(child) = edge {
                if !visited.contains(&key(child)) {
                    stack.push((Rc::clone(child), false));
                }
            }
        }
    }

    post.reverse();
    post
}

fn run(root: &Rc<Node>, seed: Vec<f32>, options: BackwardOptions) -> Result<()> {
    let order = topological_order(root);
    debug!(
        root = root.name(),
        nodes = order.len(),
        retain_graph = options.retain_graph,
        "starting backward pass"
    );

    let mut pending: HashMap<usize, Vec<f32>> = HashMap::new();
    pending.insert(key(root), seed);

    for node in &order {
        let Some(grad) = pending.remove(&key(node)) else {
            continue;
        };
        trace!(node = node.name(), "applying backward rule");
        let input_grads = node
            .apply(&grad)
            .ok_or(TensorError::GraphReleased(node.name()))?;

        for (edge, input_grad) in node.edges().iter().zip(input_grads) {
            let (Some(edge), Some(input_grad)) = (edge, input_grad) else {
                continue;
            };
            match edge {
                Edge::Node(child) => match pending.get_mut(&key(child)) {
                    Some(existing) => existing.iter_mut().zip(&input_grad).for_each(|(e, g)| *e += g),
                    None => {
                        pending.insert(key(child), input_grad);
                    }
                },
                Edge::Leaf(slot) => accumulate(slot, &input_grad),
            }
        }

        if !options.retain_graph {
            node.release();
        }
    }

    debug!(root = root.name(), "backward pass finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn scalar_seed_required_without_vector() {
        let x = Tensor::ones([3]).requires_grad(true);
        let y = &x * 2.0;
        assert!(matches!(y.backward(), Err(TensorError::NonScalarBackward(_))));
    }

    #[test]
    fn seed_shape_must_match() {
        let x = Tensor::ones([3]).requires_grad(true);
        let y = &x * 2.0;
        let err = y.backward_with(&Tensor::ones([2])).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn untracked_root_is_rejected() {
        let x = Tensor::ones([1]);
        assert!(matches!(x.backward(), Err(TensorError::NoGradFn)));
    }

    #[test]
    fn leaf_root_receives_seed() {
        let x = Tensor::scalar(3.0).requires_grad(true);
        x.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[1.0]);
    }

    #[test]
    fn diamond_fires_shared_node_once() {
        // y = x * 2 feeds both branches; d(y*y + y)/dx = (2y + 1) * 2
        let x = tensor!([1.0, 2.0]).requires_grad(true);
        let y = &x * 2.0;
        let out = (&(&y * &y) + &y).sum();
        out.backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[10.0, 18.0]);
    }

    #[test]
    fn gradients_accumulate_across_passes() {
        let x = tensor!([1.0, 2.0]).requires_grad(true);
        (&x * 3.0).sum().backward().unwrap();
        (&x * 3.0).sum().backward().unwrap();
        assert_eq!(x.grad().unwrap().data(), &[6.0, 6.0]);
        x.zero_grad();
        assert!(x.grad().is_none());
    }

    #[test]
    fn second_pass_needs_retained_graph() {
        let x = tensor!([1.0, 2.0]).requires_grad(true);
        let out = (&x * &x).sum();
        out.backward().unwrap();
        assert!(out.grad_fn().unwrap().is_released());
        assert!(matches!(out.backward(), Err(TensorError::GraphReleased("SumBackward0"))));

        let out = (&x * &x).sum();
        x.zero_grad();
        let retain = BackwardOptions { retain_graph: true };
        out.backward_with_options(None, retain).unwrap();
        out.backward_with_options(None, retain).unwrap();
        assert_eq!(x.grad().unwrap().data(), &[4.0, 8.0]);
    }

    #[test]
    fn gradients_do_not_require_grad() {
        let x = tensor!([1.0]).requires_grad(true);
        (&x * 5.0).sum().backward().unwrap();
        let g = x.grad().unwrap();
        assert!(!g.is_requires_grad());
        assert!(g.grad_fn().is_none());
    }
}
