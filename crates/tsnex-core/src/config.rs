//! Engine configuration
//!
//! Fixed for the lifetime of a session. Live tunables that the dispatcher or
//! the client may flip mid-run live in [`crate::status::StatusRecord`] instead.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Optimizer and kernel parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Effective number of neighbours used to build P (default: 30)
    pub perplexity: f64,
    /// Gradient step size (default: 100)
    pub learning_rate: f64,
    /// P multiplier during the exploration phase (default: 12)
    pub early_exaggeration: f64,
    /// Length of the exploration phase in iterations (default: 250)
    pub exploration_iters: u64,
    /// Momentum during exploration (default: 0.5)
    pub exploration_momentum: f64,
    /// Momentum after exploration (default: 0.8)
    pub momentum: f64,
    /// Total iteration budget, `None` runs until stopped
    pub max_iter: Option<u64>,
    /// Cadence of the convergence check (default: 50)
    pub n_iter_check: u64,
    /// Iterations without a new best error before the phase counts as converged
    pub n_iter_without_progress: u64,
    /// Lower clip for the adaptive gains (default: 0.01)
    pub min_gain: f64,
    /// Gradient norm under which the phase counts as converged (default: 1e-7)
    pub min_grad_norm: f64,
    /// End the run when converged instead of refining until stopped
    pub stop_on_convergence: bool,
    /// Weight of the pinned-neighbourhood penalty (default: 1e-3)
    pub reg_param: f64,
    /// Share of N used as the neighbourhood of a pinned point (default: 0.05)
    pub pin_neighbor_fraction: f64,
    /// Number of neighbours receiving a pinned point's gradient (default: 10)
    pub share_k: usize,
    /// Neighbourhood size for the quality measures (default: 10)
    pub measure_k: usize,
    /// Seed for the random initial embedding
    pub seed: u64,
    /// Slots in the snapshot channel; older snapshots are overwritten (default: 1)
    pub snapshot_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            learning_rate: 100.0,
            early_exaggeration: 12.0,
            exploration_iters: 250,
            exploration_momentum: 0.5,
            momentum: 0.8,
            max_iter: None,
            n_iter_check: 50,
            n_iter_without_progress: 500,
            min_gain: 0.01,
            min_grad_norm: 1e-7,
            stop_on_convergence: false,
            reg_param: 1e-3,
            pin_neighbor_fraction: 0.05,
            share_k: 10,
            measure_k: 10,
            seed: 0,
            snapshot_capacity: 1,
        }
    }
}

impl EngineConfig {
    /// Reject parameters the optimizer cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::Config(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )))
            }
        }

        positive("perplexity", self.perplexity)?;
        positive("learning_rate", self.learning_rate)?;
        positive("early_exaggeration", self.early_exaggeration)?;
        positive("min_gain", self.min_gain)?;

        for (name, value) in [
            ("momentum", self.momentum),
            ("exploration_momentum", self.exploration_momentum),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }

        if !(self.pin_neighbor_fraction > 0.0 && self.pin_neighbor_fraction <= 1.0) {
            return Err(EngineError::Config(format!(
                "pin_neighbor_fraction must be in (0, 1], got {}",
                self.pin_neighbor_fraction
            )));
        }
        if self.reg_param < 0.0 || !self.reg_param.is_finite() {
            return Err(EngineError::Config(format!(
                "reg_param must be non-negative, got {}",
                self.reg_param
            )));
        }
        if self.n_iter_check == 0 {
            return Err(EngineError::Config("n_iter_check must be at least 1".into()));
        }
        if self.share_k == 0 {
            return Err(EngineError::Config("share_k must be at least 1".into()));
        }
        if self.measure_k == 0 {
            return Err(EngineError::Config("measure_k must be at least 1".into()));
        }
        if self.snapshot_capacity == 0 {
            return Err(EngineError::Config(
                "snapshot_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_perplexity() {
        let config = EngineConfig {
            perplexity: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_momentum_of_one() {
        let config = EngineConfig {
            momentum: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"learning_rate": 200.0, "max_iter": 300}"#).unwrap();
        assert_eq!(config.learning_rate, 200.0);
        assert_eq!(config.max_iter, Some(300));
        assert_eq!(config.perplexity, 30.0);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let parsed: std::result::Result<EngineConfig, _> =
            serde_json::from_str(r#"{"learning_rat": 200.0}"#);
        assert!(parsed.is_err());
    }
}
