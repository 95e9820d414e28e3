use crate::error::{Error, Result};
use crate::key::Key;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};

/// One dense layer: `weights` is `(output_dim, input_dim)` and `biases` is `(output_dim,)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerParameters {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
}

impl LayerParameters {
    pub fn new(weights: Array2<f64>, biases: Array1<f64>) -> Result<LayerParameters> {
        if weights.nrows() != biases.len() {
            return Err(Error::ShapeMismatch(format!(
                "weights have {} rows but biases have {} entries",
                weights.nrows(),
                biases.len()
            )));
        }
        Ok(LayerParameters { weights, biases })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }
}

/// The full stack of dense layers. Every update produces a new value; nothing mutates a
/// parameter set once it has been built.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParameters {
    layers: Vec<LayerParameters>,
}

impl NetworkParameters {
    /// Fails unless there is at least one layer and each layer's output feeds the next layer's
    /// input.
    pub fn from_layers(layers: Vec<LayerParameters>) -> Result<NetworkParameters> {
        if layers.is_empty() {
            return Err(Error::ShapeMismatch(
                "a network needs at least one layer".to_owned(),
            ));
        }
        for (index, (layer, next)) in layers.iter().tuple_windows().enumerate() {
            if layer.output_dim() != next.input_dim() {
                return Err(Error::ShapeMismatch(format!(
                    "layer {index} outputs {} values but layer {} expects {}",
                    layer.output_dim(),
                    index + 1,
                    next.input_dim()
                )));
            }
        }
        Ok(NetworkParameters { layers })
    }

    pub fn layers(&self) -> &[LayerParameters] {
        &self.layers
    }

    /// `[s_0, s_1, ..., s_L]`: the input width followed by every layer's output width.
    pub fn layer_sizes(&self) -> Vec<usize> {
        std::iter::once(self.input_dim())
            .chain(self.layers.iter().map(LayerParameters::output_dim))
            .collect()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].output_dim()
    }

    /// One step of plain gradient descent: every tensor `p` becomes `p - learning_rate * grad(p)`.
    pub fn step(&self, gradients: &Gradients, learning_rate: f64) -> Result<NetworkParameters> {
        if gradients.weights.len() != self.layers.len()
            || gradients.biases.len() != self.layers.len()
        {
            return Err(Error::ShapeMismatch(format!(
                "{} layers but gradients for {} weights and {} biases",
                self.layers.len(),
                gradients.weights.len(),
                gradients.biases.len()
            )));
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        for ((layer, nabla_weight), nabla_bias) in self
            .layers
            .iter()
            .zip(&gradients.weights)
            .zip(&gradients.biases)
        {
            if layer.weights.raw_dim() != nabla_weight.raw_dim()
                || layer.biases.raw_dim() != nabla_bias.raw_dim()
            {
                return Err(Error::ShapeMismatch(format!(
                    "gradient shapes {:?}/{:?} do not match parameter shapes {:?}/{:?}",
                    nabla_weight.shape(),
                    nabla_bias.shape(),
                    layer.weights.shape(),
                    layer.biases.shape()
                )));
            }
            layers.push(LayerParameters {
                weights: Zip::from(&layer.weights)
                    .and(nabla_weight)
                    .map_collect(|&w, &nw| w - learning_rate * nw),
                biases: Zip::from(&layer.biases)
                    .and(nabla_bias)
                    .map_collect(|&b, &nb| b - learning_rate * nb),
            });
        }
        Ok(NetworkParameters { layers })
    }
}

/// Initializes one layer per consecutive pair of `sizes`, every entry drawn from a standard normal
/// distribution and multiplied by `scale`.
///
/// The root key is split into one key per layer, and each of those into a weight key and a bias
/// key, so the same key and sizes always produce bit-identical parameters.
pub fn init_network_params(sizes: &[usize], key: Key, scale: f64) -> Result<NetworkParameters> {
    if sizes.len() < 2 {
        return Err(Error::InvalidConfiguration(format!(
            "need an input and an output size, got {sizes:?}"
        )));
    }
    if sizes.contains(&0) {
        return Err(Error::InvalidConfiguration(format!(
            "layer sizes must be > 0, got {sizes:?}"
        )));
    }

    let keys = key.split_n(sizes.len() - 1);
    let layers = sizes
        // For each size in sizes, paired with the following size...
        .iter()
        .tuple_windows()
        // And the key reserved for that layer...
        .zip(keys)
        // Make a [next_size x current_size] weight matrix and a [next_size] bias vector.
        .map(|((&current_size, &next_size), layer_key)| {
            random_layer_params(current_size, next_size, layer_key, scale)
        })
        .collect();

    NetworkParameters::from_layers(layers)
}

fn random_layer_params(
    input_dim: usize,
    output_dim: usize,
    key: Key,
    scale: f64,
) -> LayerParameters {
    let (weight_key, bias_key) = key.split();
    let weights = Array2::<f64>::random_using(
        (output_dim, input_dim),
        StandardNormal,
        &mut weight_key.rng(),
    );
    let biases = Array1::<f64>::random_using(output_dim, StandardNormal, &mut bias_key.rng());
    LayerParameters {
        weights: weights * scale,
        biases: biases * scale,
    }
}

// NaN passes through unchanged.
pub fn relu(z: f64) -> f64 {
    if z < 0.0 { 0.0 } else { z }
}

fn relu_derivative(z: f64) -> f64 {
    if z > 0.0 { 1.0 } else { 0.0 }
}

/// `logits - log(sum(exp(logits)))`, computed after shifting by the largest logit so no exponent
/// can overflow.
pub fn log_softmax(logits: ArrayView1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |max, &z| max.max(z));
    let shifted = logits.mapv(|z| z - max);
    let log_sum_exp = shifted.mapv(f64::exp).sum().ln();
    shifted.mapv(|z| z - log_sum_exp)
}

/// Log-probabilities for a single example.
///
/// Every layer but the last computes `relu(W.a + b)`; the last one produces raw scores that are
/// normalized with [`log_softmax`].
pub fn predict(params: &NetworkParameters, image: ArrayView1<f64>) -> Result<Array1<f64>> {
    if image.len() != params.input_dim() {
        return Err(Error::ShapeMismatch(format!(
            "input has {} values but the first layer expects {}",
            image.len(),
            params.input_dim()
        )));
    }

    let (last, hidden) = params.layers.split_last().ok_or_else(|| {
        Error::ShapeMismatch("a network needs at least one layer".to_owned())
    })?;

    let mut activation = image.to_owned();
    for layer in hidden {
        activation = layer.weights.dot(&activation) + &layer.biases;
        activation.mapv_inplace(relu);
    }
    let logits = last.weights.dot(&activation) + &last.biases;
    Ok(log_softmax(logits.view()))
}

/// Applies a single-example function to every row of `inputs`, stacking the results into an
/// `(inputs.nrows(), out_dim)` array. Rows are independent of each other.
pub fn map_rows<F>(inputs: ArrayView2<f64>, out_dim: usize, f: F) -> Result<Array2<f64>>
where
    F: Fn(ArrayView1<f64>) -> Result<Array1<f64>>,
{
    let mut outputs = Array2::zeros((inputs.nrows(), out_dim));
    for (input, mut output) in inputs.outer_iter().zip(outputs.outer_iter_mut()) {
        let row = f(input)?;
        if row.len() != out_dim {
            return Err(Error::ShapeMismatch(format!(
                "row function produced {} values, expected {out_dim}",
                row.len()
            )));
        }
        output.assign(&row);
    }
    Ok(outputs)
}

/// [`predict`] applied to every row of `images`.
pub fn batched_predict(params: &NetworkParameters, images: ArrayView2<f64>) -> Result<Array2<f64>> {
    map_rows(images, params.output_dim(), |image| predict(params, image))
}

/// Gradients shaped exactly like the layers of a [`NetworkParameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub weights: Vec<Array2<f64>>,
    pub biases: Vec<Array1<f64>>,
}

impl Gradients {
    pub fn zeros_like(params: &NetworkParameters) -> Gradients {
        Gradients {
            weights: params
                .layers
                .iter()
                .map(|layer| Array2::zeros(layer.weights.raw_dim()))
                .collect(),
            biases: params
                .layers
                .iter()
                .map(|layer| Array1::zeros(layer.biases.raw_dim()))
                .collect(),
        }
    }
}

/// Everything the backward pass needs from a batched forward pass. Rows are examples.
pub(crate) struct ForwardTrace {
    // Sizes of the network that produced the trace.
    layer_sizes: Vec<usize>,
    // The input of every layer: the batch itself followed by each hidden layer's activation.
    activations: Vec<Array2<f64>>,
    // The pre-activation of every layer; the last one holds the logits.
    zs: Vec<Array2<f64>>,
}

impl ForwardTrace {
    pub(crate) fn logits(&self) -> &Array2<f64> {
        &self.zs[self.zs.len() - 1]
    }
}

/// Runs a whole batch through the network as matrix products, keeping the intermediate values.
pub(crate) fn forward_trace(
    params: &NetworkParameters,
    inputs: ArrayView2<f64>,
) -> Result<ForwardTrace> {
    if inputs.ncols() != params.input_dim() {
        return Err(Error::ShapeMismatch(format!(
            "batch rows have {} values but the first layer expects {}",
            inputs.ncols(),
            params.input_dim()
        )));
    }

    let (last, hidden) = params.layers.split_last().ok_or_else(|| {
        Error::ShapeMismatch("a network needs at least one layer".to_owned())
    })?;

    let mut activation = inputs.to_owned();
    let mut activations = Vec::with_capacity(params.layers.len());
    let mut zs = Vec::with_capacity(params.layers.len());

    // Pushing an array moves it, so the next activation is computed from z before either is
    // pushed.
    for layer in hidden {
        let z = activation.dot(&layer.weights.t()) + &layer.biases;
        let next = z.mapv(relu);
        activations.push(activation);
        zs.push(z);
        activation = next;
    }
    let logits = activation.dot(&last.weights.t()) + &last.biases;
    activations.push(activation);
    zs.push(logits);

    Ok(ForwardTrace {
        layer_sizes: params.layer_sizes(),
        activations,
        zs,
    })
}

/// Reverse-mode differentiation through the dense/ReLU stack.
///
/// `output_delta` is the gradient of the loss with respect to the logits, one row per example.
/// Rows are summed, so any averaging over the batch must already be folded into it.
pub(crate) fn backprop(
    params: &NetworkParameters,
    trace: &ForwardTrace,
    output_delta: Array2<f64>,
) -> Result<Gradients> {
    let n_layers = params.layers.len();
    let layer_sizes = params.layer_sizes();
    if trace.layer_sizes != layer_sizes {
        return Err(Error::ShapeMismatch(format!(
            "trace comes from a network of sizes {:?}, parameters have sizes {:?}",
            trace.layer_sizes, layer_sizes
        )));
    }
    let logits = trace.logits();
    if output_delta.raw_dim() != logits.raw_dim() {
        return Err(Error::ShapeMismatch(format!(
            "output gradient has shape {:?}, logits have shape {:?}",
            output_delta.shape(),
            logits.shape()
        )));
    }

    let mut nabla_weights = Vec::with_capacity(n_layers);
    let mut nabla_biases = Vec::with_capacity(n_layers);
    let mut delta = output_delta;

    // Walk the layers from last to first. delta holds one row per example, so its transpose
    // against the layer input sums every example's outer product in a single matrix product.
    for l in (0..n_layers).rev() {
        nabla_weights.push(delta.t().dot(&trace.activations[l]));
        nabla_biases.push(delta.sum_axis(Axis(0)));
        if l > 0 {
            let mut previous = delta.dot(&params.layers[l].weights);
            Zip::from(&mut previous)
                .and(&trace.zs[l - 1])
                .for_each(|d, &z| *d *= relu_derivative(z));
            delta = previous;
        }
    }

    nabla_weights.reverse();
    nabla_biases.reverse();
    Ok(Gradients {
        weights: nabla_weights,
        biases: nabla_biases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tiny_params() -> NetworkParameters {
        NetworkParameters::from_layers(vec![
            LayerParameters::new(array![[1.0, -1.0], [0.5, 2.0]], array![0.0, -1.0]).unwrap(),
            LayerParameters::new(array![[1.0, 1.0]], array![0.5]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn layers_must_chain() {
        let result = NetworkParameters::from_layers(vec![
            LayerParameters::new(Array2::zeros((3, 4)), Array1::zeros(3)).unwrap(),
            LayerParameters::new(Array2::zeros((2, 5)), Array1::zeros(2)).unwrap(),
        ]);
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
        assert!(matches!(
            NetworkParameters::from_layers(vec![]),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            LayerParameters::new(Array2::zeros((3, 4)), Array1::zeros(2)),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn init_shapes_follow_layer_sizes() {
        let params = init_network_params(&[6, 5, 3], Key::new(1), 0.01).unwrap();
        assert_eq!(params.layer_sizes(), vec![6, 5, 3]);
        assert_eq!(params.layers()[0].weights.dim(), (5, 6));
        assert_eq!(params.layers()[0].biases.len(), 5);
        assert_eq!(params.layers()[1].weights.dim(), (3, 5));
        assert!(params.layers()[0].weights.iter().all(|w| w.abs() < 0.1));
    }

    #[test]
    fn init_rejects_degenerate_sizes() {
        assert!(init_network_params(&[4], Key::new(0), 0.01).is_err());
        assert!(init_network_params(&[4, 0, 2], Key::new(0), 0.01).is_err());
    }

    #[test]
    fn different_keys_give_different_parameters() {
        let a = init_network_params(&[4, 3], Key::new(0), 1.0).unwrap();
        let b = init_network_params(&[4, 3], Key::new(1), 1.0).unwrap();
        assert_ne!(a, b);
        // Weight and bias draws come from different keys.
        assert_ne!(
            a.layers()[0].weights.column(0).to_vec(),
            a.layers()[0].biases.to_vec()
        );
    }

    #[test]
    fn relu_clamps_negatives_and_keeps_nan() {
        assert_eq!(relu(-2.0), 0.0);
        assert_eq!(relu(3.0), 3.0);
        assert!(relu(f64::NAN).is_nan());
    }

    #[test]
    fn log_softmax_handles_large_logits() {
        let out = log_softmax(array![1000.0, 1000.0].view());
        assert!((out[0] - (0.5f64).ln()).abs() < 1e-12);
        assert!((out[1] - (0.5f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn predict_matches_hand_computation() {
        // hidden = relu([1 - 2, 0.5 + 4 - 1]) = [0, 3.5]; logit = 3.5 + 0.5 = 4; one class.
        let out = predict(&tiny_params(), array![1.0, 2.0].view()).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].abs() < 1e-12);
    }

    #[test]
    fn predict_rejects_wrong_width() {
        assert!(matches!(
            predict(&tiny_params(), array![1.0, 2.0, 3.0].view()),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn forward_trace_agrees_with_predict() {
        let params = init_network_params(&[5, 4, 3], Key::new(3), 1.0).unwrap();
        let images = Array2::from_shape_fn((4, 5), |(i, j)| (i as f64 - j as f64) * 0.3);
        let trace = forward_trace(&params, images.view()).unwrap();
        for (image, logits) in images.outer_iter().zip(trace.logits().outer_iter()) {
            let expected = predict(&params, image).unwrap();
            let actual = log_softmax(logits);
            for (a, e) in actual.iter().zip(expected.iter()) {
                assert!((a - e).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn map_rows_checks_output_width() {
        let inputs = Array2::<f64>::zeros((2, 3));
        let result = map_rows(inputs.view(), 4, |row| Ok(row.to_owned()));
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn step_returns_new_parameters_and_leaves_old_ones() {
        let params = tiny_params();
        let mut gradients = Gradients::zeros_like(&params);
        gradients.weights[1].fill(1.0);
        gradients.biases[0].fill(-2.0);

        let updated = params.step(&gradients, 0.5).unwrap();
        assert_eq!(params, tiny_params());
        assert_eq!(updated.layers()[1].weights, array![[0.5, 0.5]]);
        assert_eq!(updated.layers()[0].biases, array![1.0, 0.0]);
        assert_eq!(updated.layers()[0].weights, params.layers()[0].weights);
    }

    #[test]
    fn step_rejects_mismatched_gradients() {
        let params = tiny_params();
        let other = init_network_params(&[2, 3, 1], Key::new(0), 1.0).unwrap();
        let gradients = Gradients::zeros_like(&other);
        assert!(matches!(
            params.step(&gradients, 1.0),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn backprop_rejects_mismatched_output_gradient() {
        let params = tiny_params();
        let trace = forward_trace(&params, array![[1.0, 2.0]].view()).unwrap();
        assert!(matches!(
            backprop(&params, &trace, Array2::zeros((1, 2))),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn backprop_rejects_trace_from_another_network() {
        // Both networks map 2 inputs to 1 logit, so only the hidden width differs.
        let params = tiny_params();
        let other = init_network_params(&[2, 3, 1], Key::new(1), 1.0).unwrap();
        let trace = forward_trace(&other, array![[1.0, 2.0]].view()).unwrap();
        assert_eq!(trace.logits().shape(), &[1, 1]);
        assert!(matches!(
            backprop(&params, &trace, Array2::zeros((1, 1))),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
