//! Predictive models: per-arm posterior beliefs that policies read from.
//!
//! Policies only need the [`PredictiveModel`] capability. The Gittins index
//! policy additionally needs the Beta-Bernoulli view exposed through
//! [`PredictiveModel::as_beta_bernoulli`].
//!
//! [`BetaBernoulliModel`] is the concrete posterior used by the adaptive
//! sampling loop: one `Beta(alpha, beta)` per arm, starting from a
//! pseudo-count prior.

use std::cell::RefCell;
use std::rc::Rc;

use rand::RngCore;
use rand_distr::{Beta, Distribution};

use crate::error::{Result, SelectionError};

/// Arms tied at the maximal posterior mean, with the mean/variance there.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPrediction {
    /// Every arm whose posterior mean equals the maximum (ties included).
    pub indices: Vec<usize>,
    pub mean: f64,
    pub variance: f64,
}

/// Read-only capability set every selection policy consumes.
pub trait PredictiveModel {
    /// Number of arms. Constant for the lifetime of the model.
    fn num_vars(&self) -> usize;

    /// Draw one posterior sample per arm.
    fn sample(&self, rng: &mut dyn RngCore) -> Vec<f64>;

    /// Arms with the maximal posterior mean.
    fn max_prediction(&self) -> MaxPrediction;

    /// Beta-Bernoulli view, if this model is one.
    fn as_beta_bernoulli(&self) -> Option<&dyn BetaBernoulliPosterior> {
        None
    }
}

/// Per-arm Beta pseudo-counts (successes + 1, failures + 1).
pub trait BetaBernoulliPosterior {
    fn posterior_alphas(&self) -> &[f64];
    fn posterior_betas(&self) -> &[f64];
}

/// Models the sampling loop can feed observed rewards back into.
pub trait UpdatableModel: PredictiveModel {
    /// Record a reward in `[0, 1]` for `arm`.
    fn update(&mut self, arm: usize, reward: f64) -> Result<()>;
}

/// Handle through which a policy refers to a model it does not own.
///
/// The driving loop keeps its own clone and mutates the model between calls
/// to `choose_next`.
pub type SharedModel = Rc<RefCell<dyn PredictiveModel>>;

/// Wrap a model so it can be attached to a policy and still updated by the caller.
///
/// The returned `Rc<RefCell<M>>` coerces to [`SharedModel`] on clone.
pub fn shared<M: PredictiveModel + 'static>(model: M) -> Rc<RefCell<M>> {
    Rc::new(RefCell::new(model))
}

/// Check that a model satisfies the capability contract at runtime.
///
/// The trait bound guarantees the method set; this checks the shape behind it.
pub(crate) fn validate_model(model: &dyn PredictiveModel) -> Result<()> {
    let n = model.num_vars();
    if n == 0 {
        return Err(SelectionError::InvalidArgument(
            "must supply a discrete predictive model with at least one arm".to_string(),
        ));
    }
    if let Some(bb) = model.as_beta_bernoulli() {
        let (na, nb) = (bb.posterior_alphas().len(), bb.posterior_betas().len());
        if na != n || nb != n {
            return Err(SelectionError::InvalidArgument(format!(
                "beta-bernoulli model reports {n} arms but {na} alphas and {nb} betas"
            )));
        }
    }
    Ok(())
}

/// Mean of `Beta(alpha, beta)`, elementwise.
pub fn beta_mean(alphas: &[f64], betas: &[f64]) -> Vec<f64> {
    alphas
        .iter()
        .zip(betas)
        .map(|(&a, &b)| {
            let denom = a + b;
            if denom <= 0.0 {
                0.5
            } else {
                a / denom
            }
        })
        .collect()
}

/// Variance of `Beta(alpha, beta)`, elementwise.
pub fn beta_variance(alphas: &[f64], betas: &[f64]) -> Vec<f64> {
    alphas
        .iter()
        .zip(betas)
        .map(|(&a, &b)| {
            let s = a + b;
            if s <= 0.0 {
                0.0
            } else {
                a * b / (s * s * (s + 1.0))
            }
        })
        .collect()
}

fn sanitize_prior(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        1.0
    }
}

/// Independent Beta-Bernoulli posterior per arm.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BetaBernoulliModel {
    alpha0: f64,
    beta0: f64,
    alphas: Vec<f64>,
    betas: Vec<f64>,
}

impl BetaBernoulliModel {
    /// Uniform `Beta(1, 1)` prior on every arm.
    pub fn new(num_arms: usize) -> Self {
        Self::with_prior(num_arms, 1.0, 1.0)
    }

    /// Shared prior on every arm. Non-positive or non-finite priors fall back to 1.
    pub fn with_prior(num_arms: usize, alpha0: f64, beta0: f64) -> Self {
        let alpha0 = sanitize_prior(alpha0);
        let beta0 = sanitize_prior(beta0);
        Self {
            alpha0,
            beta0,
            alphas: vec![alpha0; num_arms],
            betas: vec![beta0; num_arms],
        }
    }

    /// Build from explicit pseudo-counts (e.g. a saved snapshot).
    pub fn from_counts(alphas: Vec<f64>, betas: Vec<f64>) -> Result<Self> {
        if alphas.len() != betas.len() {
            return Err(SelectionError::InvalidArgument(format!(
                "got {} alphas but {} betas",
                alphas.len(),
                betas.len()
            )));
        }
        if let Some(x) = alphas
            .iter()
            .chain(&betas)
            .find(|x| !(x.is_finite() && **x > 0.0))
        {
            return Err(SelectionError::InvalidArgument(format!(
                "pseudo-counts must be positive and finite, got {x}"
            )));
        }
        Ok(Self {
            alpha0: 1.0,
            beta0: 1.0,
            alphas,
            betas,
        })
    }

    pub fn posterior_means(&self) -> Vec<f64> {
        beta_mean(&self.alphas, &self.betas)
    }

    pub fn posterior_variances(&self) -> Vec<f64> {
        beta_variance(&self.alphas, &self.betas)
    }

    /// Forget every observation.
    pub fn reset(&mut self) {
        self.alphas.fill(self.alpha0);
        self.betas.fill(self.beta0);
    }
}

impl PredictiveModel for BetaBernoulliModel {
    fn num_vars(&self) -> usize {
        self.alphas.len()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.alphas
            .iter()
            .zip(&self.betas)
            .map(|(&a, &b)| match Beta::new(a, b) {
                Ok(dist) => dist.sample(&mut *rng),
                Err(_) => 0.5,
            })
            .collect()
    }

    fn max_prediction(&self) -> MaxPrediction {
        let means = self.posterior_means();
        let max = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let indices: Vec<usize> = means
            .iter()
            .enumerate()
            .filter(|(_, &m)| m == max)
            .map(|(i, _)| i)
            .collect();
        let variance = indices
            .first()
            .map(|&i| beta_variance(&self.alphas[i..=i], &self.betas[i..=i])[0])
            .unwrap_or(0.0);
        MaxPrediction {
            indices,
            mean: max,
            variance,
        }
    }

    fn as_beta_bernoulli(&self) -> Option<&dyn BetaBernoulliPosterior> {
        Some(self)
    }
}

impl BetaBernoulliPosterior for BetaBernoulliModel {
    fn posterior_alphas(&self) -> &[f64] {
        &self.alphas
    }

    fn posterior_betas(&self) -> &[f64] {
        &self.betas
    }
}

impl UpdatableModel for BetaBernoulliModel {
    /// Interprets `reward` as a fractional success: `alpha += r`, `beta += 1 - r`.
    fn update(&mut self, arm: usize, reward: f64) -> Result<()> {
        let n = self.alphas.len();
        if arm >= n {
            return Err(SelectionError::InvalidArgument(format!(
                "arm {arm} out of range for {n} arms"
            )));
        }
        let r = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.alphas[arm] += r;
        self.betas[arm] += 1.0 - r;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn update_moves_mean_toward_reward() {
        let mut m = BetaBernoulliModel::new(2);
        m.update(0, 1.0).unwrap();
        m.update(0, 1.0).unwrap();
        m.update(1, 0.0).unwrap();
        assert_eq!(m.posterior_alphas(), &[3.0, 1.0]);
        assert_eq!(m.posterior_betas(), &[1.0, 2.0]);
        let means = m.posterior_means();
        assert!(means[0] > 0.5 && means[1] < 0.5);
    }

    #[test]
    fn update_rejects_out_of_range_arm() {
        let mut m = BetaBernoulliModel::new(3);
        assert!(matches!(
            m.update(3, 1.0),
            Err(SelectionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn update_clamps_reward() {
        let mut m = BetaBernoulliModel::new(1);
        m.update(0, 7.0).unwrap();
        m.update(0, f64::NAN).unwrap();
        assert_eq!(m.posterior_alphas(), &[2.0]);
        assert_eq!(m.posterior_betas(), &[2.0]);
    }

    #[test]
    fn max_prediction_includes_ties() {
        let m = BetaBernoulliModel::from_counts(vec![2.0, 1.0, 2.0], vec![1.0, 1.0, 1.0]).unwrap();
        let mp = m.max_prediction();
        assert_eq!(mp.indices, vec![0, 2]);
        assert!((mp.mean - 2.0 / 3.0).abs() < 1e-12);
        assert!((mp.variance - 2.0 / 36.0).abs() < 1e-12);
    }

    #[test]
    fn samples_lie_in_unit_interval() {
        let m = BetaBernoulliModel::from_counts(vec![3.0, 0.5, 10.0], vec![1.0, 0.5, 40.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let xs = m.sample(&mut rng);
            assert_eq!(xs.len(), 3);
            assert!(xs.iter().all(|x| (0.0..=1.0).contains(x)));
        }
    }

    #[test]
    fn bad_priors_fall_back_to_one() {
        let m = BetaBernoulliModel::with_prior(2, -1.0, f64::NAN);
        assert_eq!(m.posterior_alphas(), &[1.0, 1.0]);
        assert_eq!(m.posterior_betas(), &[1.0, 1.0]);
    }

    #[test]
    fn reset_restores_prior() {
        let mut m = BetaBernoulliModel::with_prior(2, 2.0, 3.0);
        m.update(1, 1.0).unwrap();
        m.reset();
        assert_eq!(m, BetaBernoulliModel::with_prior(2, 2.0, 3.0));
    }

    #[test]
    fn from_counts_validates() {
        assert!(BetaBernoulliModel::from_counts(vec![1.0], vec![]).is_err());
        assert!(BetaBernoulliModel::from_counts(vec![0.0], vec![1.0]).is_err());
    }

    #[test]
    fn empty_model_fails_validation() {
        let m = BetaBernoulliModel::new(0);
        assert!(matches!(
            validate_model(&m),
            Err(SelectionError::InvalidArgument(_))
        ));
        assert!(validate_model(&BetaBernoulliModel::new(1)).is_ok());
    }
}
