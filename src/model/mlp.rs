use super::trainer::check_samples;
use super::{
    Activations, Layer, LearnedModel, TrainError, TrainOutcome, Trainer, residual_bounds, sigmoid,
};
use crate::config::TrainerConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

/// Small sigmoid MLP fitted with mini-batch Adam on a squared-error loss.
///
/// Training is deterministic for a given [`TrainerConfig::seed`].
#[derive(Debug, Clone, Default)]
pub struct MlpTrainer {
    config: TrainerConfig,
}

impl MlpTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn shape(&self) -> Vec<(usize, usize)> {
        let mut shape = Vec::with_capacity(self.config.hidden_layers + 1);
        let mut inputs = 1;
        for _ in 0..self.config.hidden_layers {
            shape.push((inputs, self.config.hidden_units));
            inputs = self.config.hidden_units;
        }
        shape.push((inputs, 1));
        shape
    }

    fn init_layers(&self, rng: &mut StdRng) -> Vec<Layer> {
        let shape = self.shape();
        let last = shape.len() - 1;
        shape
            .into_iter()
            .enumerate()
            .map(|(i, (inputs, outputs))| {
                let limit = (6.0 / (inputs + outputs) as f64).sqrt();
                let mut layer = Layer::zeros(inputs, outputs);
                layer
                    .weights
                    .iter_mut()
                    .for_each(|w| *w = rng.gen_range(-limit..limit));
                if i == last {
                    layer.bias.iter_mut().for_each(|b| *b = 0.5);
                }
                layer
            })
            .collect()
    }

    fn warm_layers(&self, initial: Option<&LearnedModel>) -> Option<Vec<Layer>> {
        let initial = initial?;
        let shape = self.shape();
        let matches = initial.layers.len() == shape.len()
            && initial
                .layers
                .iter()
                .zip(&shape)
                .all(|(l, &(i, o))| l.inputs == i && l.outputs == o);
        matches.then(|| initial.layers.clone())
    }
}

impl Trainer for MlpTrainer {
    fn train(
        &self,
        inputs: &[f64],
        targets: &[usize],
        initial: Option<&LearnedModel>,
    ) -> Result<TrainOutcome, TrainError> {
        check_samples(inputs, targets)?;
        self.config.validate().map_err(TrainError::InvalidConfig)?;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut layers = match self.warm_layers(initial) {
            Some(layers) => layers,
            None => self.init_layers(&mut rng),
        };

        let n = inputs.len();
        let fractions: Vec<f64> = targets
            .iter()
            .map(|&t| (t as f64 + 0.5) / n as f64)
            .collect();

        let mut adam = Adam::new(&layers);
        let mut order: Vec<usize> = (0..n).collect();
        let mut best = (f64::INFINITY, layers.clone());
        let mut stale = 0;
        let mut epochs = 0;

        while epochs < self.config.epochs {
            epochs += 1;
            order.shuffle(&mut rng);

            let mut loss = 0.0;
            for batch in order.chunks(self.config.batch_size) {
                let mut grads: Vec<Layer> =
                    layers.iter().map(|l| Layer::zeros(l.inputs, l.outputs)).collect();
                for &i in batch {
                    loss += backprop(&layers, inputs[i], fractions[i], &mut grads);
                }
                let scale = 1.0 / batch.len() as f64;
                adam.step(&mut layers, &grads, scale, self.config.learning_rate);
            }

            if !loss.is_finite() {
                return Err(TrainError::Diverged { epochs });
            }
            if loss < best.0 {
                best = (loss, layers.clone());
                stale = 0;
            } else {
                stale += 1;
                if stale >= self.config.patience() {
                    break;
                }
            }
        }

        let mut model = LearnedModel::new(if epochs == 0 { layers } else { best.1 });
        let (min_err, max_err) = residual_bounds(&model, inputs, targets);
        model.min_err = min_err;
        model.max_err = max_err;
        Ok(TrainOutcome { model, epochs })
    }
}

/// Accumulate the gradient of `0.5 * (y - target)^2` into `grads`; returns the
/// sample loss.
fn backprop(layers: &[Layer], x: f64, target: f64, grads: &mut [Layer]) -> f64 {
    let last = layers.len() - 1;
    let mut acts: Vec<Activations> = Vec::with_capacity(layers.len() + 1);
    acts.push(Activations::from_slice(&[x]));
    for (i, layer) in layers.iter().enumerate() {
        let mut out = layer.forward(&acts[i]);
        if i < last {
            out.iter_mut().for_each(|v| *v = sigmoid(*v));
        }
        acts.push(out);
    }

    let y = acts[layers.len()][0];
    let diff = y - target;
    let mut delta = Activations::from_slice(&[diff]);

    for (i, layer) in layers.iter().enumerate().rev() {
        let input = &acts[i];
        let grad = &mut grads[i];
        for (a_idx, &a) in input.iter().enumerate() {
            for (o, &d) in delta.iter().enumerate() {
                grad.weights[a_idx * layer.outputs + o] += a * d;
            }
        }
        for (b, &d) in grad.bias.iter_mut().zip(&delta) {
            *b += d;
        }
        if i > 0 {
            delta = input
                .iter()
                .enumerate()
                .map(|(a_idx, &a)| {
                    let back: f64 = delta
                        .iter()
                        .enumerate()
                        .map(|(o, &d)| layer.weight(a_idx, o) * d)
                        .sum();
                    back * a * (1.0 - a)
                })
                .collect();
        }
    }
    0.5 * diff * diff
}

struct Adam {
    m: Vec<Layer>,
    v: Vec<Layer>,
    t: i32,
}

impl Adam {
    fn new(layers: &[Layer]) -> Self {
        let zeros: Vec<Layer> = layers
            .iter()
            .map(|l| Layer::zeros(l.inputs, l.outputs))
            .collect();
        Self {
            m: zeros.clone(),
            v: zeros,
            t: 0,
        }
    }

    fn step(&mut self, layers: &mut [Layer], grads: &[Layer], scale: f64, lr: f64) {
        self.t += 1;
        let c1 = 1.0 - BETA1.powi(self.t);
        let c2 = 1.0 - BETA2.powi(self.t);
        let update = |p: &mut f64, g: f64, m: &mut f64, v: &mut f64| {
            let g = g * scale;
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            *p -= lr * (*m / c1) / ((*v / c2).sqrt() + EPSILON);
        };
        for (((layer, grad), m), v) in layers
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            for (i, p) in layer.weights.iter_mut().enumerate() {
                update(p, grad.weights[i], &mut m.weights[i], &mut v.weights[i]);
            }
            for (i, p) in layer.bias.iter_mut().enumerate() {
                update(p, grad.bias[i], &mut m.bias[i], &mut v.bias[i]);
            }
        }
    }
}
