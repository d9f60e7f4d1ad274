use briny_autograd::grad_mode::{NoGradGuard, is_grad_enabled, no_grad};
use briny_autograd::{Shape, tensor, tensors::Tensor};

#[test]
fn test_tensor_creation() {
    let t = Tensor::new([2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(t.shape(), &Shape::new([2, 2]));
    assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0]);
    assert!(!t.is_requires_grad());
    assert!(t.grad().is_none());
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape().dims(), &[2, 2]);
    assert_eq!(t.data(), &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_grad_fn_display() {
    let x = Tensor::ones([2, 2]).requires_grad(true);
    let y = &x + 2.0;
    assert_eq!(y.grad_fn().unwrap().to_string(), "<AddBackward0>");
    assert_eq!(
        y.to_string(),
        "tensor([[3., 3.],\n        [3., 3.]], grad_fn=<AddBackward0>)"
    );
    assert!(x.grad_fn().is_none());
}

#[test]
fn test_no_grad_scope() {
    let x = Tensor::from_vec(vec![1.0, 2.0, 3.0]).requires_grad(true);
    assert!(x.pow(2.0).is_requires_grad());
    assert!(!no_grad(|| x.pow(2.0).is_requires_grad()));

    {
        let _guard = NoGradGuard::new();
        assert!(!is_grad_enabled());
        let y = &x * 2.0;
        assert!(y.grad_fn().is_none());
    }
    assert!(is_grad_enabled());
    // the flag on x itself never changes
    assert!(x.is_requires_grad());
}

#[test]
fn test_detach() {
    let x = Tensor::from_vec(vec![0.5, -1.0, 2.0]).requires_grad(true);
    let y = x.detach();
    assert!(x.is_requires_grad());
    assert!(!y.is_requires_grad());
    assert!(y.shares_storage(&x));
    assert!(x.eq(&y).unwrap().all());

    // history built on the alias never reaches x
    let z = &y * 3.0;
    assert!(z.grad_fn().is_none());
}

#[test]
fn test_broadcast_gradient_matches_shape() {
    let bias = tensor!([[1.0], [2.0]]).requires_grad(true);
    let m = Tensor::ones([2, 3]);
    (&m * &bias).sum().backward().unwrap();
    let grad = bias.grad().unwrap();
    assert_eq!(grad.shape().dims(), &[2, 1]);
    assert_eq!(grad.data(), &[3.0, 3.0]);
}
