use super::LearnedModel;
use thiserror::Error;

/// Failure of a single training run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainError {
    #[error("no training samples")]
    EmptyInput,

    #[error("{inputs} inputs but {targets} targets")]
    ShapeMismatch { inputs: usize, targets: usize },

    #[error("invalid trainer configuration: {0}")]
    InvalidConfig(String),

    #[error("loss diverged after {epochs} epochs")]
    Diverged { epochs: usize },
}

/// Result of a successful training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    /// Model with error bounds measured over the training set
    pub model: LearnedModel,
    /// Epochs actually run
    pub epochs: usize,
}

/// Fits a partition model.
///
/// `inputs` are normalized keys in `[-0.5, 0.5)`, sorted ascending, and
/// `targets[i]` is the local rank of `inputs[i]`. When `initial` is given the
/// trainer should warm-start from it if it can. The returned model must carry
/// bounds computed with [`residual_bounds`] so that every training key is found
/// inside its search window.
pub trait Trainer: Send + Sync {
    fn train(
        &self,
        inputs: &[f64],
        targets: &[usize],
        initial: Option<&LearnedModel>,
    ) -> Result<TrainOutcome, TrainError>;
}

/// Smallest and largest `target - predicted_rank` over the samples.
pub fn residual_bounds(model: &LearnedModel, inputs: &[f64], targets: &[usize]) -> (i64, i64) {
    let count = inputs.len();
    inputs
        .iter()
        .zip(targets)
        .map(|(&x, &t)| t as i64 - model.predict_rank(x, count) as i64)
        .fold(None, |acc: Option<(i64, i64)>, err| match acc {
            None => Some((err, err)),
            Some((lo, hi)) => Some((lo.min(err), hi.max(err))),
        })
        .unwrap_or((0, 0))
}

pub(crate) fn check_samples(inputs: &[f64], targets: &[usize]) -> Result<(), TrainError> {
    if inputs.is_empty() {
        return Err(TrainError::EmptyInput);
    }
    if inputs.len() != targets.len() {
        return Err(TrainError::ShapeMismatch {
            inputs: inputs.len(),
            targets: targets.len(),
        });
    }
    Ok(())
}
