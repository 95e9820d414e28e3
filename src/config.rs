//! Training configuration.
//!
//! Every knob of a training run lives in one immutable [`TrainingConfig`] that is handed to the
//! trainer when it is built. It can be read from a JSON file; any field left out of the file
//! takes its default.
//!
//! ```json
//! {
//!   "layer_sizes": [784, 512, 512, 10],
//!   "learning_rate": 10.0,
//!   "epochs": 5,
//!   "batch_size": 100
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Width of every layer, input first and class count last.
    pub layer_sizes: Vec<usize>,
    /// Fixed step size of plain gradient descent.
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed of the root key all initial parameters are drawn from.
    pub seed: u64,
    /// Factor applied to every standard normal draw at initialization.
    pub init_scale: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            layer_sizes: vec![784, 512, 512, 10],
            learning_rate: 10.0,
            epochs: 5,
            batch_size: 100,
            seed: 0,
            init_scale: 0.01,
        }
    }
}

impl TrainingConfig {
    /// Reads a JSON config file and validates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: TrainingConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layer_sizes.len() < 2 {
            return Err(Error::InvalidConfiguration(format!(
                "layer_sizes needs an input and an output size, got {:?}",
                self.layer_sizes
            )));
        }
        if let Some(index) = self.layer_sizes.iter().position(|&size| size == 0) {
            return Err(Error::InvalidConfiguration(format!(
                "layer_sizes[{index}] must be > 0"
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "batch_size must be > 0".to_owned(),
            ));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfiguration("epochs must be > 0".to_owned()));
        }
        if !(self.init_scale.is_finite() && self.init_scale > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "init_scale must be finite and > 0, got {}",
                self.init_scale
            )));
        }
        Ok(())
    }
}
