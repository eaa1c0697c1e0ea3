//! Sequence-to-one stacked LSTM regressor
//!
//! A stack of LSTM layers, each passing its full output sequence to the next,
//! with inverted dropout on every layer output during training. The last
//! layer's final output feeds a ReLU dense layer and a single sigmoid unit, so
//! every output lies in (0, 1). Trained with mean squared error, mini-batch
//! Adam and full backpropagation through time.

use crate::domain::errors::TrainingError;
use crate::domain::types::{FeatureVector, TrainingExample};
use ndarray::{Array, Array1, Array2, ArrayView1, Axis, Dimension, Zip, s};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Epoch interval between progress log lines.
const LOG_EVERY_EPOCHS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Global gradient-norm ceiling, `None` disables clipping.
    pub gradient_clip: Option<f64>,
    /// Fraction of each LSTM layer's outputs zeroed per training sample.
    pub dropout: f64,
}

/// Per-epoch metrics of a fit.
#[derive(Debug, Clone, Default)]
pub struct FitHistory {
    pub loss: Vec<f64>,
    pub mae: Vec<f64>,
    pub val_loss: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    /// Gate weights stacked as [input, forget, candidate, output] over [x; h].
    w_gates: Array2<f64>,
    b_gates: Array1<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmNetwork {
    input_size: usize,
    layers: Vec<LstmLayer>,
    dense_size: usize,
    w_dense: Array2<f64>,
    b_dense: Array1<f64>,
    w_out: Array1<f64>,
    b_out: f64,
}

/// Activations kept from the forward pass of one time step.
struct StepCache {
    z: Array1<f64>,
    input: Array1<f64>,
    forget: Array1<f64>,
    candidate: Array1<f64>,
    output: Array1<f64>,
    c_prev: Array1<f64>,
    c: Array1<f64>,
}

struct LayerPass {
    steps: Vec<StepCache>,
    /// Inverted-dropout masks per time step, empty outside training.
    masks: Vec<Array1<f64>>,
}

struct ForwardPass {
    layers: Vec<LayerPass>,
    h_last: Array1<f64>,
    dense_pre: Array1<f64>,
    dense_act: Array1<f64>,
    y: f64,
}

#[derive(Debug, Clone)]
struct LayerGradients {
    w_gates: Array2<f64>,
    b_gates: Array1<f64>,
}

#[derive(Debug, Clone)]
struct Gradients {
    layers: Vec<LayerGradients>,
    w_dense: Array2<f64>,
    b_dense: Array1<f64>,
    w_out: Array1<f64>,
    b_out: f64,
}

impl Gradients {
    fn zeros_like(net: &LstmNetwork) -> Self {
        Self {
            layers: net
                .layers
                .iter()
                .map(|layer| LayerGradients {
                    w_gates: Array2::zeros(layer.w_gates.raw_dim()),
                    b_gates: Array1::zeros(layer.b_gates.len()),
                })
                .collect(),
            w_dense: Array2::zeros(net.w_dense.raw_dim()),
            b_dense: Array1::zeros(net.b_dense.len()),
            w_out: Array1::zeros(net.w_out.len()),
            b_out: 0.0,
        }
    }

    fn norm(&self) -> f64 {
        let layers_sq: f64 = self
            .layers
            .iter()
            .map(|g| {
                g.w_gates.iter().map(|v| v * v).sum::<f64>()
                    + g.b_gates.iter().map(|v| v * v).sum::<f64>()
            })
            .sum();
        let sum_sq = layers_sq
            + self.w_dense.iter().map(|g| g * g).sum::<f64>()
            + self.b_dense.iter().map(|g| g * g).sum::<f64>()
            + self.w_out.iter().map(|g| g * g).sum::<f64>()
            + self.b_out * self.b_out;
        sum_sq.sqrt()
    }

    fn scale(&mut self, factor: f64) {
        for layer in &mut self.layers {
            layer.w_gates *= factor;
            layer.b_gates *= factor;
        }
        self.w_dense *= factor;
        self.b_dense *= factor;
        self.w_out *= factor;
        self.b_out *= factor;
    }

    fn clip(&mut self, max_norm: f64) {
        let norm = self.norm();
        if norm > max_norm && norm > 0.0 {
            self.scale(max_norm / norm);
        }
    }
}

struct Adam {
    m: Gradients,
    v: Gradients,
    t: i32,
}

impl Adam {
    fn new(net: &LstmNetwork) -> Self {
        Self {
            m: Gradients::zeros_like(net),
            v: Gradients::zeros_like(net),
            t: 0,
        }
    }

    fn step(&mut self, net: &mut LstmNetwork, grads: &Gradients, learning_rate: f64) {
        self.t += 1;
        let lr_t = learning_rate * (1.0 - ADAM_BETA2.powi(self.t)).sqrt()
            / (1.0 - ADAM_BETA1.powi(self.t));

        for (((layer, g), m), v) in net
            .layers
            .iter_mut()
            .zip(&grads.layers)
            .zip(&mut self.m.layers)
            .zip(&mut self.v.layers)
        {
            adam_update(&mut layer.w_gates, &g.w_gates, &mut m.w_gates, &mut v.w_gates, lr_t);
            adam_update(&mut layer.b_gates, &g.b_gates, &mut m.b_gates, &mut v.b_gates, lr_t);
        }
        adam_update(
            &mut net.w_dense,
            &grads.w_dense,
            &mut self.m.w_dense,
            &mut self.v.w_dense,
            lr_t,
        );
        adam_update(
            &mut net.b_dense,
            &grads.b_dense,
            &mut self.m.b_dense,
            &mut self.v.b_dense,
            lr_t,
        );
        adam_update(
            &mut net.w_out,
            &grads.w_out,
            &mut self.m.w_out,
            &mut self.v.w_out,
            lr_t,
        );

        let g = grads.b_out;
        self.m.b_out = ADAM_BETA1 * self.m.b_out + (1.0 - ADAM_BETA1) * g;
        self.v.b_out = ADAM_BETA2 * self.v.b_out + (1.0 - ADAM_BETA2) * g * g;
        net.b_out -= lr_t * self.m.b_out / (self.v.b_out.sqrt() + ADAM_EPSILON);
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

impl LstmLayer {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let mut b_gates = Array1::zeros(4 * hidden_size);
        // Forget gate starts open
        b_gates
            .slice_mut(s![hidden_size..2 * hidden_size])
            .fill(1.0);

        Self {
            input_size,
            hidden_size,
            w_gates: uniform((4 * hidden_size, input_size + hidden_size), limit, rng),
            b_gates,
        }
    }

    /// Runs the layer over `inputs`, returning step caches and every `h_t`.
    fn forward(&self, inputs: &[Array1<f64>]) -> (Vec<StepCache>, Vec<Array1<f64>>) {
        let hs = self.hidden_size;
        let mut h = Array1::<f64>::zeros(hs);
        let mut c = Array1::<f64>::zeros(hs);
        let mut steps = Vec::with_capacity(inputs.len());
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let mut z = Array1::<f64>::zeros(self.input_size + hs);
            z.slice_mut(s![..self.input_size]).assign(x);
            z.slice_mut(s![self.input_size..]).assign(&h);

            let a = self.w_gates.dot(&z) + &self.b_gates;
            let input = a.slice(s![0..hs]).mapv(sigmoid);
            let forget = a.slice(s![hs..2 * hs]).mapv(sigmoid);
            let candidate = a.slice(s![2 * hs..3 * hs]).mapv(f64::tanh);
            let output = a.slice(s![3 * hs..]).mapv(sigmoid);

            let c_next = &forget * &c + &input * &candidate;
            let h_next = &output * &c_next.mapv(f64::tanh);

            steps.push(StepCache {
                z,
                input,
                forget,
                candidate,
                output,
                c_prev: c,
                c: c_next.clone(),
            });
            outputs.push(h_next.clone());
            c = c_next;
            h = h_next;
        }

        (steps, outputs)
    }

    /// Backpropagation through time. `d_outputs[t]` is dLoss/dh_t from the
    /// layer above; the result is dLoss/dx_t for the layer below.
    fn backward(
        &self,
        steps: &[StepCache],
        d_outputs: &[Array1<f64>],
        grads: &mut LayerGradients,
    ) -> Vec<Array1<f64>> {
        let hs = self.hidden_size;
        let mut d_inputs = vec![Array1::<f64>::zeros(self.input_size); steps.len()];
        let mut d_h_next = Array1::<f64>::zeros(hs);
        let mut d_c_next = Array1::<f64>::zeros(hs);

        for (t, step) in steps.iter().enumerate().rev() {
            let d_h = &d_outputs[t] + &d_h_next;
            let tanh_c = step.c.mapv(f64::tanh);
            let d_output = &d_h * &tanh_c;
            let d_c = &d_c_next + &(&d_h * &step.output * &tanh_c.mapv(|t| 1.0 - t * t));

            let d_input = &d_c * &step.candidate;
            let d_candidate = &d_c * &step.input;
            let d_forget = &d_c * &step.c_prev;
            d_c_next = &d_c * &step.forget;

            let mut d_a = Array1::<f64>::zeros(4 * hs);
            d_a.slice_mut(s![0..hs])
                .assign(&(&d_input * &step.input.mapv(|v| v * (1.0 - v))));
            d_a.slice_mut(s![hs..2 * hs])
                .assign(&(&d_forget * &step.forget.mapv(|v| v * (1.0 - v))));
            d_a.slice_mut(s![2 * hs..3 * hs])
                .assign(&(&d_candidate * &step.candidate.mapv(|v| 1.0 - v * v)));
            d_a.slice_mut(s![3 * hs..])
                .assign(&(&d_output * &step.output.mapv(|v| v * (1.0 - v))));

            grads.w_gates += &outer(&d_a, &step.z);
            grads.b_gates += &d_a;

            let d_z = self.w_gates.t().dot(&d_a);
            d_inputs[t] = d_z.slice(s![..self.input_size]).to_owned();
            d_h_next = d_z.slice(s![self.input_size..]).to_owned();
        }

        d_inputs
    }
}

impl LstmNetwork {
    /// Stacks one LSTM layer per entry of `hidden_sizes`, bottom first.
    pub fn new(
        input_size: usize,
        hidden_sizes: &[usize],
        dense_size: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden_sizes.len());
        let mut layer_input = input_size;
        for &hidden_size in hidden_sizes {
            layers.push(LstmLayer::new(layer_input, hidden_size, rng));
            layer_input = hidden_size;
        }

        let dense_limit = (6.0 / (layer_input + dense_size) as f64).sqrt();
        let out_limit = (6.0 / (dense_size + 1) as f64).sqrt();

        Self {
            input_size,
            layers,
            dense_size,
            w_dense: uniform((dense_size, layer_input), dense_limit, rng),
            b_dense: Array1::zeros(dense_size),
            w_out: uniform((1, dense_size), out_limit, rng).row(0).to_owned(),
            b_out: 0.0,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Units per LSTM layer, bottom first.
    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(|layer| layer.hidden_size).collect()
    }

    pub fn dense_size(&self) -> usize {
        self.dense_size
    }

    /// Normalized next-value estimate in (0, 1).
    pub fn predict(&self, sequence: &[FeatureVector]) -> f64 {
        self.forward(sequence, None).y
    }

    /// Mean squared error and mean absolute error over `examples`.
    pub fn evaluate(&self, examples: &[TrainingExample]) -> (f64, f64) {
        if examples.is_empty() {
            return (0.0, 0.0);
        }
        let (sq, abs) = examples.iter().fold((0.0, 0.0), |(sq, abs), ex| {
            let err = self.predict(&ex.sequence) - ex.target;
            (sq + err * err, abs + err.abs())
        });
        let n = examples.len() as f64;
        (sq / n, abs / n)
    }

    /// Fit on `train`, reporting validation loss on `validation` each epoch.
    pub fn fit(
        &mut self,
        train: &[TrainingExample],
        validation: &[TrainingExample],
        options: &FitOptions,
        rng: &mut StdRng,
    ) -> Result<FitHistory, TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::Fit("no training examples".to_string()));
        }

        let batch_size = options.batch_size.clamp(1, train.len());
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut adam = Adam::new(self);
        let mut history = FitHistory::default();

        for epoch in 0..options.epochs {
            order.shuffle(rng);
            let mut sq_sum = 0.0;
            let mut abs_sum = 0.0;

            for batch in order.chunks(batch_size) {
                let mut grads = Gradients::zeros_like(self);
                let scale = 2.0 / batch.len() as f64;

                for &idx in batch {
                    let example = &train[idx];
                    let pass =
                        self.forward(&example.sequence, Some((options.dropout, &mut *rng)));
                    let err = pass.y - example.target;
                    sq_sum += err * err;
                    abs_sum += err.abs();
                    self.accumulate_gradients(&pass, err * scale, &mut grads);
                }

                if let Some(max_norm) = options.gradient_clip {
                    grads.clip(max_norm);
                }
                adam.step(self, &grads, options.learning_rate);
            }

            let n = train.len() as f64;
            let loss = sq_sum / n;
            let mae = abs_sum / n;
            if !loss.is_finite() {
                return Err(TrainingError::Fit(format!(
                    "loss diverged at epoch {}",
                    epoch
                )));
            }

            history.loss.push(loss);
            history.mae.push(mae);
            if !validation.is_empty() {
                history.val_loss.push(self.evaluate(validation).0);
            }

            if epoch % LOG_EVERY_EPOCHS == 0 {
                info!("Epoch {}: loss = {:.4}, mae = {:.4}", epoch, loss, mae);
            } else {
                debug!("Epoch {}: loss = {:.6}", epoch, loss);
            }
        }

        Ok(history)
    }

    /// `dropout` is `(rate, rng)` during training and `None` for inference.
    fn forward(
        &self,
        sequence: &[FeatureVector],
        mut dropout: Option<(f64, &mut StdRng)>,
    ) -> ForwardPass {
        let mut inputs: Vec<Array1<f64>> = sequence
            .iter()
            .map(|x| ArrayView1::from(&x[..]).to_owned())
            .collect();
        let mut layers = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let (steps, mut outputs) = layer.forward(&inputs);

            let mut masks = Vec::new();
            if let Some((rate, rng)) = dropout.as_mut()
                && *rate > 0.0
            {
                masks = outputs
                    .iter()
                    .map(|_| dropout_mask(layer.hidden_size, *rate, &mut **rng))
                    .collect();
                for (h, mask) in outputs.iter_mut().zip(&masks) {
                    *h *= mask;
                }
            }

            layers.push(LayerPass { steps, masks });
            inputs = outputs;
        }

        let h_last = inputs
            .pop()
            .unwrap_or_else(|| Array1::zeros(self.w_dense.ncols()));
        let dense_pre = self.w_dense.dot(&h_last) + &self.b_dense;
        let dense_act = dense_pre.mapv(|v| v.max(0.0));
        let y = sigmoid(self.w_out.dot(&dense_act) + self.b_out);

        ForwardPass {
            layers,
            h_last,
            dense_pre,
            dense_act,
            y,
        }
    }

    /// Backpropagate `d_y` (dLoss/dy for this sample) into `grads`.
    fn accumulate_gradients(&self, pass: &ForwardPass, d_y: f64, grads: &mut Gradients) {
        let d_logit = d_y * pass.y * (1.0 - pass.y);
        grads.w_out.scaled_add(d_logit, &pass.dense_act);
        grads.b_out += d_logit;

        let d_act = &self.w_out * d_logit;
        let d_pre = Zip::from(&d_act)
            .and(&pass.dense_pre)
            .map_collect(|&d, &pre| if pre > 0.0 { d } else { 0.0 });
        grads.w_dense += &outer(&d_pre, &pass.h_last);
        grads.b_dense += &d_pre;

        // Only the top layer's final output reaches the dense layer
        let steps = pass.layers.first().map_or(0, |layer| layer.steps.len());
        let mut d_outputs = vec![Array1::<f64>::zeros(self.w_dense.ncols()); steps];
        if let Some(last) = d_outputs.last_mut() {
            *last = self.w_dense.t().dot(&d_pre);
        }

        for idx in (0..self.layers.len()).rev() {
            let layer_pass = &pass.layers[idx];
            for (d, mask) in d_outputs.iter_mut().zip(&layer_pass.masks) {
                *d *= mask;
            }
            d_outputs =
                self.layers[idx].backward(&layer_pass.steps, &d_outputs, &mut grads.layers[idx]);
        }
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Keeps each unit with probability `1 - rate`, scaling kept units by `1 / (1 - rate)`.
fn dropout_mask(size: usize, rate: f64, rng: &mut StdRng) -> Array1<f64> {
    let keep = 1.0 / (1.0 - rate);
    Array1::from_shape_fn(size, |_| if rng.random::<f64>() < rate { 0.0 } else { keep })
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

fn uniform(shape: (usize, usize), limit: f64, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn(shape, |_| rng.random_range(-limit..limit))
}
