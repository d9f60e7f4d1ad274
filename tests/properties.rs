use briny_autograd::{Shape, Tensor};
use proptest::prelude::*;

fn values(len: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, len)
}

proptest! {
    #[test]
    fn broadcast_is_symmetric(a in prop::collection::vec(1usize..4, 0..4),
                              b in prop::collection::vec(1usize..4, 0..4)) {
        let (sa, sb) = (Shape::new(a), Shape::new(b));
        let ab = Shape::broadcast(&sa, &sb).ok();
        let ba = Shape::broadcast(&sb, &sa).ok();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn repeated_backward_accumulates_linearly(data in values(6), passes in 1usize..4) {
        let x = Tensor::new([2, 3], data.clone()).requires_grad(true);
        for _ in 0..passes {
            (&x * 2.0).sum().backward().unwrap();
        }
        let grad = x.grad().unwrap();
        prop_assert!(grad.data().iter().all(|&g| g == 2.0 * passes as f32));
    }

    #[test]
    fn detach_keeps_values(data in values(5)) {
        let x = Tensor::from_vec(data).requires_grad(true);
        let y = x.detach();
        prop_assert!(!y.is_requires_grad());
        prop_assert!(x.eq(&y).unwrap().all());
    }

    #[test]
    fn product_rule_matches_formula(a in values(4), b in values(4)) {
        let ta = Tensor::new([4], a.clone()).requires_grad(true);
        let tb = Tensor::new([4], b.clone()).requires_grad(true);
        (&ta * &tb).sum().backward().unwrap();
        prop_assert_eq!(ta.grad().unwrap().to_vec(), b);
        prop_assert_eq!(tb.grad().unwrap().to_vec(), a);
    }
}
