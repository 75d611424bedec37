//! Per-partition learned position models.
//!
//! A model maps a normalized key `x ∈ [-0.5, 0.5)` to a fractional rank in
//! `[0, 1)`. `hidden_layers` affine + sigmoid layers are followed by one affine
//! output layer. Error bounds are signed residuals `true_rank - predicted_rank`
//! measured with [`LearnedModel::predict_rank`], the same function queries use.

mod mlp;
mod parallel;
mod trainer;

pub use mlp::MlpTrainer;
pub use parallel::{TrainJob, train_partitions};
pub use trainer::{TrainError, TrainOutcome, Trainer, residual_bounds};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub(crate) type Activations = SmallVec<[f64; 16]>;

#[inline]
pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// A dense layer. `weights` is row-major `inputs × outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl Layer {
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weights: vec![0.0; inputs * outputs],
            bias: vec![0.0; outputs],
        }
    }

    #[inline]
    pub fn weight(&self, input: usize, output: usize) -> f64 {
        self.weights[input * self.outputs + output]
    }

    /// Affine transform of `input` (no activation).
    pub fn forward(&self, input: &[f64]) -> Activations {
        let mut out: Activations = SmallVec::from_slice(&self.bias);
        for (i, &a) in input.iter().enumerate() {
            let row = &self.weights[i * self.outputs..(i + 1) * self.outputs];
            for (o, w) in out.iter_mut().zip(row) {
                *o += a * w;
            }
        }
        out
    }

    pub fn same_shape(&self, other: &Layer) -> bool {
        self.inputs == other.inputs && self.outputs == other.outputs
    }
}

/// A trained regression model with its residual bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedModel {
    /// Hidden layers followed by the output layer
    pub layers: Vec<Layer>,
    /// Smallest `true_rank - predicted_rank` over the training keys
    pub min_err: i64,
    /// Largest `true_rank - predicted_rank` over the training keys
    pub max_err: i64,
}

impl LearnedModel {
    /// Wrap a layer stack; bounds start at zero until measured.
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            layers,
            min_err: 0,
            max_err: 0,
        }
    }

    pub fn hidden_layers(&self) -> usize {
        self.layers.len().saturating_sub(1)
    }

    /// Evaluate the network for a normalized input.
    pub fn evaluate(&self, x: f64) -> f64 {
        let mut act: Activations = SmallVec::from_slice(&[x]);
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            act = layer.forward(&act);
            if i < last {
                act.iter_mut().for_each(|v| *v = sigmoid(*v));
            }
        }
        act.first().copied().unwrap_or(0.5)
    }

    /// Predicted rank among `count` sorted keys, clamped to `0..count`.
    pub fn predict_rank(&self, x: f64, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let r = (self.evaluate(x) * count as f64).floor();
        if !(r > 0.0) {
            0
        } else if r >= count as f64 {
            count - 1
        } else {
            r as usize
        }
    }

    /// Width of the search window the bounds imply.
    pub fn error_span(&self) -> u64 {
        self.max_err.saturating_sub(self.min_err).unsigned_abs()
    }
}

/// The model slot of a partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PartitionModel {
    /// No model; lookups scan the whole key range.
    #[default]
    Untrained,
    Trained(LearnedModel),
}

impl PartitionModel {
    pub fn is_trained(&self) -> bool {
        matches!(self, PartitionModel::Trained(_))
    }

    pub fn as_trained(&self) -> Option<&LearnedModel> {
        match self {
            PartitionModel::Trained(model) => Some(model),
            PartitionModel::Untrained => None,
        }
    }
}
