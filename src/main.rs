use std::io::Write;

use anyhow::Context;
use briny_autograd::Result;
use briny_autograd::tour::{self, TourConfig};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Walk through tensor construction, recorded history, backward passes and
/// gradient-tracking toggles, printing what each step observes.
#[derive(Parser, Debug)]
#[command(name = "autograd-tour", version)]
struct Args {
    /// Seed for the random tensors (OS entropy when omitted)
    #[arg(long, env = "AUTOGRAD_TOUR_SEED")]
    seed: Option<u64>,

    /// Keep doubling the random vector until its norm reaches this value
    #[arg(long, env = "AUTOGRAD_TOUR_THRESHOLD", default_value_t = 1000.0)]
    threshold: f32,

    /// Seed gradient for the vector-Jacobian product (three values)
    #[arg(long, value_delimiter = ',', default_values_t = [0.1, 1.0, 0.0001])]
    vector: Vec<f32>,

    /// Give up after this many doublings
    #[arg(long, default_value_t = 64)]
    max_doublings: usize,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn tour_config(&self) -> Result<TourConfig> {
        let config = TourConfig {
            seed: self.seed,
            norm_threshold: self.threshold,
            seed_vector: self.vector.clone(),
            max_doublings: self.max_doublings,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.tour_config().context("invalid --vector")?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?config, "starting tour");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let report = tour::run(&config, &mut out).context("autograd tour failed")?;
    out.flush().context("flushing transcript")?;

    debug!(doublings = report.doublings, final_norm = report.final_norm, "tour finished");
    Ok(())
}
