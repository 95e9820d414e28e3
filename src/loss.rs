//! Loss, accuracy and the objectives the trainer descends.
//!
//! The classification loss is `-mean(log_probs * one_hot)` taken over the whole
//! `batch x classes` grid. Only one entry per row is non-zero, so this is the usual negative
//! log-likelihood divided once more by the number of classes.

use crate::error::{Error, Result};
use crate::network::{
    Gradients, NetworkParameters, backprop, batched_predict, forward_trace, log_softmax, map_rows,
};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Index of the largest entry. Ties go to the lowest index, and an empty row gives 0.
pub fn argmax(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (index, &value) in row.iter().enumerate().skip(1) {
        if value > row[best] {
            best = index;
        }
    }
    best
}

// Rejects batches the network cannot consume or that carry no examples.
fn check_batch(
    params: &NetworkParameters,
    inputs: ArrayView2<f64>,
    targets: ArrayView2<f64>,
) -> Result<()> {
    if inputs.nrows() == 0 {
        return Err(Error::EmptyDataset("cannot evaluate zero examples".to_owned()));
    }
    if inputs.nrows() != targets.nrows() {
        return Err(Error::ShapeMismatch(format!(
            "{} inputs but {} targets",
            inputs.nrows(),
            targets.nrows()
        )));
    }
    if inputs.ncols() != params.input_dim() {
        return Err(Error::ShapeMismatch(format!(
            "inputs have {} values but the first layer expects {}",
            inputs.ncols(),
            params.input_dim()
        )));
    }
    if targets.ncols() != params.output_dim() {
        return Err(Error::ShapeMismatch(format!(
            "targets have {} classes but the network outputs {}",
            targets.ncols(),
            params.output_dim()
        )));
    }
    Ok(())
}

// Mean over every entry of a non-empty grid.
fn grid_mean(values: &Array2<f64>) -> f64 {
    values.sum() / values.len() as f64
}

/// `-mean(batched_predict(params, images) * targets)` over the full `batch x classes` grid.
pub fn loss(
    params: &NetworkParameters,
    images: ArrayView2<f64>,
    targets: ArrayView2<f64>,
) -> Result<f64> {
    check_batch(params, images, targets)?;
    let predictions = batched_predict(params, images)?;
    Ok(-grid_mean(&(predictions * &targets)))
}

/// Fraction of rows whose predicted class matches the hot entry of the target row.
pub fn accuracy(
    params: &NetworkParameters,
    images: ArrayView2<f64>,
    targets: ArrayView2<f64>,
) -> Result<f64> {
    check_batch(params, images, targets)?;
    let predictions = batched_predict(params, images)?;
    let correct = predictions
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
        .filter(|(predicted, target)| argmax(predicted.view()) == argmax(target.view()))
        .count();
    Ok(correct as f64 / images.nrows() as f64)
}

/// A differentiable scalar objective over a batch.
///
/// `gradient` returns one entry per weight matrix and bias vector, shaped like `params`.
pub trait Objective {
    fn value(
        &self,
        params: &NetworkParameters,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
    ) -> Result<f64>;

    fn gradient(
        &self,
        params: &NetworkParameters,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
    ) -> Result<Gradients>;
}

/// The classification loss of [`loss`], on log-softmax outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSoftmaxCrossEntropy;

impl Objective for LogSoftmaxCrossEntropy {
    fn value(
        &self,
        params: &NetworkParameters,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
    ) -> Result<f64> {
        loss(params, inputs, targets)
    }

    fn gradient(
        &self,
        params: &NetworkParameters,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
    ) -> Result<Gradients> {
        check_batch(params, inputs, targets)?;
        let trace = forward_trace(params, inputs)?;
        let logits = trace.logits();
        let softmax = map_rows(logits.view(), logits.ncols(), |row| {
            Ok(log_softmax(row).mapv(f64::exp))
        })?;

        // d/dz of -sum(y * log_softmax(z)) is softmax(z) * sum(y) - y for every row; the grid
        // mean then divides by every entry of the batch.
        let grid = targets.len() as f64;
        let target_sums = targets.sum_axis(Axis(1)).insert_axis(Axis(1));
        let mut delta = softmax * &target_sums;
        Zip::from(&mut delta)
            .and(&targets)
            .for_each(|d, &y| *d = (*d - y) / grid);

        backprop(params, &trace, delta)
    }
}

/// `mean((logits - targets)^2)` over the `batch x outputs` grid, on the raw output of the last
/// layer. With a single layer this is convex in the parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl Objective for MeanSquaredError {
    fn value(
        &self,
        params: &NetworkParameters,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
    ) -> Result<f64> {
        check_batch(params, inputs, targets)?;
        let trace = forward_trace(params, inputs)?;
        let errors = trace.logits() - &targets;
        Ok(grid_mean(&errors.mapv(|e| e * e)))
    }

    fn gradient(
        &self,
        params: &NetworkParameters,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
    ) -> Result<Gradients> {
        check_batch(params, inputs, targets)?;
        let trace = forward_trace(params, inputs)?;
        let grid = targets.len() as f64;
        let delta = (trace.logits() - &targets).mapv(|e| 2.0 * e / grid);
        backprop(params, &trace, delta)
    }
}

/// One pure update step on a batch: returns `params - learning_rate * grad(objective)`.
pub fn update<O: Objective + ?Sized>(
    params: &NetworkParameters,
    inputs: ArrayView2<f64>,
    targets: ArrayView2<f64>,
    learning_rate: f64,
    objective: &O,
) -> Result<NetworkParameters> {
    let gradients = objective.gradient(params, inputs, targets)?;
    params.step(&gradients, learning_rate)
}
