use crate::batch::Batcher;
use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::loss::{LogSoftmaxCrossEntropy, Objective, accuracy, update};
use crate::mnist::Dataset;
use crate::network::{NetworkParameters, init_network_params};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initialized,
    Training { completed: usize },
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// Zero-based index of the epoch.
    pub epoch: usize,
    pub duration: Duration,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// Drives full-dataset epochs of mini-batch gradient descent.
///
/// Each batch replaces the parameters with the result of one pure update step. After every
/// epoch the whole training and validation splits are evaluated in a single pass each.
pub struct Trainer<O: Objective = LogSoftmaxCrossEntropy> {
    config: TrainingConfig,
    objective: O,
    params: NetworkParameters,
    state: TrainerState,
}

impl Trainer<LogSoftmaxCrossEntropy> {
    pub fn new(config: TrainingConfig) -> Result<Trainer<LogSoftmaxCrossEntropy>> {
        Trainer::with_objective(config, LogSoftmaxCrossEntropy)
    }
}

impl<O: Objective> Trainer<O> {
    /// Validates `config` and draws the initial parameters from its seed.
    pub fn with_objective(config: TrainingConfig, objective: O) -> Result<Trainer<O>> {
        config.validate()?;
        let params = init_network_params(
            &config.layer_sizes,
            Key::new(config.seed),
            config.init_scale,
        )?;
        Ok(Trainer {
            config,
            objective,
            params,
            state: TrainerState::Initialized,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn params(&self) -> &NetworkParameters {
        &self.params
    }

    pub fn into_params(self) -> NetworkParameters {
        self.params
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    fn completed_epochs(&self) -> usize {
        match self.state {
            TrainerState::Initialized => 0,
            TrainerState::Training { completed } => completed,
            TrainerState::Done => self.config.epochs,
        }
    }

    // The datasets must be non-empty and match the network at both ends.
    fn check_dataset(&self, dataset: &Dataset, split: &str) -> Result<()> {
        if dataset.is_empty() {
            return Err(Error::EmptyDataset(format!("{split} split has no examples")));
        }
        if dataset.input_dim() != self.params.input_dim() {
            return Err(Error::ShapeMismatch(format!(
                "{split} inputs have {} values but the first layer expects {}",
                dataset.input_dim(),
                self.params.input_dim()
            )));
        }
        if dataset.n_classes() != self.params.output_dim() {
            return Err(Error::ShapeMismatch(format!(
                "{split} labels have {} classes but the network outputs {}",
                dataset.n_classes(),
                self.params.output_dim()
            )));
        }
        Ok(())
    }

    /// Runs one epoch over `train` in its original order, then reports loss and accuracy on both
    /// splits. On error the parameters and state are left as they were.
    pub fn train_epoch(&mut self, train: &Dataset, valid: &Dataset) -> Result<EpochReport> {
        if self.state == TrainerState::Done {
            return Err(Error::TrainingComplete {
                epochs: self.config.epochs,
            });
        }
        self.check_dataset(train, "training")?;
        self.check_dataset(valid, "validation")?;

        let epoch = self.completed_epochs();
        let batcher = Batcher::from_dataset(train, self.config.batch_size)?;
        let start = Instant::now();

        let mut params = self.params.clone();
        for (index, batch) in batcher.iter().enumerate() {
            params = update(
                &params,
                batch.inputs,
                batch.labels,
                self.config.learning_rate,
                &self.objective,
            )?;
            debug!(epoch, batch = index, size = batch.len(), "applied update");
        }

        let duration = start.elapsed();
        let (train_inputs, train_labels) = (train.inputs().view(), train.labels().view());
        let (valid_inputs, valid_labels) = (valid.inputs().view(), valid.labels().view());
        let report = EpochReport {
            epoch,
            duration,
            train_loss: self.objective.value(&params, train_inputs, train_labels)?,
            train_accuracy: accuracy(&params, train_inputs, train_labels)?,
            valid_loss: self.objective.value(&params, valid_inputs, valid_labels)?,
            valid_accuracy: accuracy(&params, valid_inputs, valid_labels)?,
        };
        self.params = params;

        info!("Epoch {} in {:0.2} sec", epoch, duration.as_secs_f64());
        info!(
            "Training set loss {:.6}, accuracy {:.4}",
            report.train_loss, report.train_accuracy
        );
        info!(
            "Validation set loss {:.6}, accuracy {:.4}",
            report.valid_loss, report.valid_accuracy
        );

        self.state = if epoch + 1 >= self.config.epochs {
            TrainerState::Done
        } else {
            TrainerState::Training {
                completed: epoch + 1,
            }
        };
        Ok(report)
    }

    /// Runs every remaining epoch and returns their reports in order.
    pub fn fit(&mut self, train: &Dataset, valid: &Dataset) -> Result<Vec<EpochReport>> {
        let remaining = self.config.epochs - self.completed_epochs();
        let mut reports = Vec::with_capacity(remaining);
        while self.state != TrainerState::Done {
            reports.push(self.train_epoch(train, valid)?);
        }
        Ok(reports)
    }
}
