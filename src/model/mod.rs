use anyhow::Result;

pub mod forest;

/// A loaded, immutable prediction capability. Handlers receive one at startup
/// and never mutate it, so a shared reference is all they need.
pub trait Predict: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64>;
}
