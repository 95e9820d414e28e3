//! A small fully-connected digit classifier trained with plain mini-batch gradient descent.
//!
//! The pieces, from the bottom up:
//!
//! - [`mnist`]: loading the IDX archives, one-hot labels and the [`Dataset`] pair.
//! - [`batch`]: contiguous, in-order mini-batches.
//! - [`key`]: splittable random keys for reproducible initialization.
//! - [`network`]: parameters, the forward pass and backpropagation.
//! - [`loss`]: loss, accuracy and the objectives the trainer descends.
//! - [`train`]: the epoch loop.
//!
//! ```no_run
//! use mnist_mlp::{MnistData, Trainer, TrainingConfig};
//!
//! # fn main() -> mnist_mlp::Result<()> {
//! let data = MnistData::load("data")?;
//! let mut trainer = Trainer::new(TrainingConfig::default())?;
//! let reports = trainer.fit(&data.training, &data.validation)?;
//! println!("{:?}", reports.last());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod loss;
pub mod mnist;
pub mod network;
pub mod train;

pub use batch::{Batch, Batcher};
pub use config::TrainingConfig;
pub use error::{Error, Result};
pub use key::Key;
pub use loss::{LogSoftmaxCrossEntropy, MeanSquaredError, Objective, accuracy, loss, update};
pub use mnist::{Dataset, MnistData, one_hot};
pub use network::{
    Gradients, LayerParameters, NetworkParameters, batched_predict, init_network_params, predict,
};
pub use train::{EpochReport, Trainer, TrainerState};
