//! Adaptive sampling loop: choose an arm, observe a reward, update the model.
//!
//! The loop owns neither policy semantics nor model semantics. It alternates
//! between the two until a [`TerminationCondition`] fires and keeps periodic
//! snapshots of the arm the model currently believes is best.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SelectionError};
use crate::model::{PredictiveModel, SharedModel, UpdatableModel};
use crate::policy::SelectionPolicy;

/// Decides when the sampling loop should stop.
pub trait TerminationCondition {
    /// `iter` is the number of completed rounds.
    fn should_stop(&self, iter: usize, model: &dyn PredictiveModel) -> bool;
}

/// Stop after a fixed number of rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxIterTerminationCondition {
    pub max_iter: usize,
}

impl MaxIterTerminationCondition {
    pub fn new(max_iter: usize) -> Self {
        Self { max_iter }
    }
}

impl TerminationCondition for MaxIterTerminationCondition {
    fn should_stop(&self, iter: usize, _model: &dyn PredictiveModel) -> bool {
        iter >= self.max_iter
    }
}

/// Stop once the best arm's posterior variance drops to `max_variance` or below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceTerminationCondition {
    pub max_variance: f64,
}

impl TerminationCondition for ConfidenceTerminationCondition {
    fn should_stop(&self, _iter: usize, model: &dyn PredictiveModel) -> bool {
        model.max_prediction().variance <= self.max_variance
    }
}

/// Stop as soon as any inner condition fires.
#[derive(Default)]
pub struct OrTerminationCondition {
    conditions: Vec<Box<dyn TerminationCondition>>,
}

impl OrTerminationCondition {
    pub fn new(conditions: Vec<Box<dyn TerminationCondition>>) -> Self {
        Self { conditions }
    }

    pub fn push(&mut self, condition: impl TerminationCondition + 'static) {
        self.conditions.push(Box::new(condition));
    }
}

impl TerminationCondition for OrTerminationCondition {
    fn should_stop(&self, iter: usize, model: &dyn PredictiveModel) -> bool {
        self.conditions.iter().any(|c| c.should_stop(iter, model))
    }
}

/// Loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerConfig {
    /// Rounds before stopping.
    pub max_iter: usize,
    /// Record a snapshot every this many rounds (0 is treated as 1).
    pub snapshot_rate: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_iter: 1_000,
            snapshot_rate: 1,
        }
    }
}

/// Best predicted arm after `iter` rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    pub iter: usize,
    pub best_pred_ind: usize,
    pub best_pred_mean: f64,
}

/// Outcome of one [`AdaptiveSampler::solve`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveSamplingResult {
    pub best_pred_ind: usize,
    pub best_pred_mean: f64,
    /// Completed rounds.
    pub num_iters: usize,
    /// Round number of each snapshot (starts at 0, the prior).
    pub iters: Vec<usize>,
    pub snapshots: Vec<Snapshot>,
    pub total_time: Duration,
}

/// Bernoulli reward source: arm `i` succeeds with probability `probs[i]`.
#[derive(Debug, Clone)]
pub struct BernoulliArms {
    probs: Vec<f64>,
    rng: StdRng,
}

impl BernoulliArms {
    pub fn new(probs: Vec<f64>, seed: u64) -> Self {
        Self {
            probs,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    /// `1.0` on success, `0.0` otherwise. Unknown arms always fail.
    pub fn evaluate(&mut self, arm: usize) -> f64 {
        let p = self.probs.get(arm).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        if self.rng.random::<f64>() < p {
            1.0
        } else {
            0.0
        }
    }
}

/// Drives a selection policy against an updatable model.
pub struct AdaptiveSampler<M> {
    model: Rc<RefCell<M>>,
    policy: Box<dyn SelectionPolicy>,
}

impl<M: UpdatableModel + 'static> AdaptiveSampler<M> {
    /// Attach `model` to `policy`; fails if the policy rejects the model.
    pub fn new(model: Rc<RefCell<M>>, mut policy: Box<dyn SelectionPolicy>) -> Result<Self> {
        let handle: SharedModel = model.clone();
        policy.set_model(handle)?;
        Ok(Self { model, policy })
    }

    pub fn model(&self) -> &Rc<RefCell<M>> {
        &self.model
    }

    fn snapshot(&self, iter: usize) -> Result<Snapshot> {
        let best = self.model.borrow().max_prediction();
        let best_pred_ind = best.indices.first().copied().ok_or_else(|| {
            SelectionError::InvalidState("model reported no best arm".to_string())
        })?;
        Ok(Snapshot {
            iter,
            best_pred_ind,
            best_pred_mean: best.mean,
        })
    }

    /// Run until `termination` fires, feeding `objective(arm)` rewards back into the model.
    pub fn solve<F>(
        &mut self,
        mut objective: F,
        termination: &dyn TerminationCondition,
        snapshot_rate: usize,
    ) -> Result<AdaptiveSamplingResult>
    where
        F: FnMut(usize) -> f64,
    {
        let start = Instant::now();
        let rate = snapshot_rate.max(1);
        let num_arms = self.model.borrow().num_vars();
        tracing::info!(num_arms, snapshot_rate = rate, "starting adaptive sampling");

        let mut snapshots = vec![self.snapshot(0)?];
        let mut iter = 0usize;
        loop {
            let stop = {
                let model = self.model.borrow();
                termination.should_stop(iter, &*model)
            };
            if stop {
                break;
            }
            let arm = self.policy.choose_next()?;
            let reward = objective(arm);
            self.model.borrow_mut().update(arm, reward)?;
            iter += 1;
            if iter % rate == 0 {
                snapshots.push(self.snapshot(iter)?);
            }
        }
        if snapshots.last().map(|s| s.iter) != Some(iter) {
            snapshots.push(self.snapshot(iter)?);
        }

        let last = snapshots[snapshots.len() - 1];
        let total_time = start.elapsed();
        tracing::info!(
            iters = iter,
            best_arm = last.best_pred_ind,
            best_mean = last.best_pred_mean,
            elapsed_ms = total_time.as_millis() as u64,
            "adaptive sampling finished"
        );
        Ok(AdaptiveSamplingResult {
            best_pred_ind: last.best_pred_ind,
            best_pred_mean: last.best_pred_mean,
            num_iters: iter,
            iters: snapshots.iter().map(|s| s.iter).collect(),
            snapshots,
            total_time,
        })
    }

    /// [`Self::solve`] with a max-iteration stop taken from `cfg`.
    pub fn run<F>(&mut self, objective: F, cfg: &SamplerConfig) -> Result<AdaptiveSamplingResult>
    where
        F: FnMut(usize) -> f64,
    {
        let stop = MaxIterTerminationCondition::new(cfg.max_iter);
        self.solve(objective, &stop, cfg.snapshot_rate)
    }
}

/// True value of the best predicted arm at each snapshot.
///
/// With `normalize`, values are divided by the best true value, so `1.0`
/// means the loop currently believes in the truly best arm.
pub fn normalized_reward(
    result: &AdaptiveSamplingResult,
    true_values: &[f64],
    normalize: bool,
) -> Result<Vec<f64>> {
    let best = true_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if normalize && !(best.is_finite() && best > 0.0) {
        return Err(SelectionError::InvalidArgument(format!(
            "cannot normalize by best true value {best}"
        )));
    }
    result
        .snapshots
        .iter()
        .map(|s| {
            let v = true_values.get(s.best_pred_ind).copied().ok_or_else(|| {
                SelectionError::InvalidArgument(format!(
                    "snapshot arm {} has no true value ({} given)",
                    s.best_pred_ind,
                    true_values.len()
                ))
            })?;
            Ok(if normalize { v / best } else { v })
        })
        .collect()
}
