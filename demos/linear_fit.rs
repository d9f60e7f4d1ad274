use briny_autograd::{Tensor, no_grad};
use std::error::Error;

/// Plain gradient step; returns a fresh leaf that requires grad.
fn sgd(param: &Tensor, lr: f32) -> Result<Tensor, Box<dyn Error>> {
    let grad = param.grad().ok_or("parameter has no gradient")?;
    let next = no_grad(|| param - &(&grad * lr));
    Ok(next.requires_grad(true))
}

fn main() -> Result<(), Box<dyn Error>> {
    // prepare training data: y = 2x + 1
    let x = Tensor::new([4, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let y = Tensor::new([4, 1], vec![3.0, 5.0, 7.0, 9.0]);

    let mut w = Tensor::new([1, 1], vec![0.5]).requires_grad(true);
    let mut b = Tensor::new([1], vec![0.0]).requires_grad(true);

    let learning_rate = 0.05;
    let epochs = 1000;

    for epoch in 0..epochs {
        // forward: y_pred = x @ w + b
        let pred = &x.matmul(&w)? + &b;
        let loss = (&pred - &y).pow(2.0).mean();

        loss.backward()?;

        w = sgd(&w, learning_rate)?;
        b = sgd(&b, learning_rate)?;

        if epoch % 100 == 0 {
            println!("Epoch {:4} Loss {:.6}", epoch, loss.item()?);
        }
    }

    println!("w = {w}");
    println!("b = {b}");

    Ok(())
}
