//! The `SelectionPolicy` contract, plus the uniform and greedy policies.
//!
//! A policy answers one question per round: which arm should the sampling
//! loop evaluate next? It reads the attached model through a shared handle
//! and never mutates it; the only state a policy owns is its RNG.
//!
//! [`ThompsonSelectionPolicy`][crate::ThompsonSelectionPolicy] and
//! [`BetaBernoulliGittinsIndex98Policy`][crate::BetaBernoulliGittinsIndex98Policy]
//! live in their own modules.
//!
//! # Example
//!
//! ```rust
//! use graspsel::{shared, BetaBernoulliModel, SelectionPolicy, UniformSelectionPolicy};
//!
//! let model = shared(BetaBernoulliModel::new(4));
//! let mut policy = UniformSelectionPolicy::with_seed(7);
//! policy.set_model(model.clone()).unwrap();
//! let arm = policy.choose_next().unwrap();
//! assert!(arm < 4);
//! ```

use std::cell::Ref;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SelectionError};
use crate::gittins::BetaBernoulliGittinsIndex98Policy;
use crate::model::{validate_model, PredictiveModel, SharedModel};
use crate::thompson::ThompsonSelectionPolicy;

/// Common interface for choosing the next arm to sample.
///
/// Implementations are stateless across rounds apart from their RNG, so the
/// model can be swapped at any time with [`SelectionPolicy::set_model`].
pub trait SelectionPolicy {
    /// The currently attached model, if any.
    fn model(&self) -> Option<&SharedModel>;

    /// Attach `model`, replacing any previous one.
    ///
    /// Fails with [`SelectionError::InvalidArgument`] when the model does not
    /// satisfy the capability contract (no arms, or a Beta-Bernoulli view whose
    /// parameter lengths disagree with `num_vars()`). No consistency check
    /// against a previously attached model is made.
    fn set_model(&mut self, model: SharedModel) -> Result<()>;

    /// Choose the next arm index in `[0, num_vars())`.
    ///
    /// Fails with [`SelectionError::InvalidState`] if no model is attached.
    fn choose_next(&mut self) -> Result<usize>;
}

/// Shared-borrow the attached model, or explain why that is impossible.
pub(crate) fn borrow_model(model: &Option<SharedModel>) -> Result<Ref<'_, dyn PredictiveModel>> {
    let m = model.as_ref().ok_or_else(SelectionError::no_model)?;
    m.try_borrow().map_err(|_| {
        SelectionError::InvalidState("predictive model is mutably borrowed".to_string())
    })
}

/// Attach after validating; shared by every policy's `set_model`.
pub(crate) fn attach(slot: &mut Option<SharedModel>, model: SharedModel) -> Result<()> {
    {
        let m = model.try_borrow().map_err(|_| {
            SelectionError::InvalidArgument("predictive model is mutably borrowed".to_string())
        })?;
        validate_model(&*m)?;
    }
    *slot = Some(model);
    Ok(())
}

/// All indices whose value equals the maximum (exact comparison).
///
/// NaN values never win.
pub(crate) fn argmax_ties(values: &[f64]) -> Vec<usize> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v == max)
        .map(|(i, _)| i)
        .collect()
}

/// Pick one of `tied` uniformly at random and check it against `num_vars`.
pub(crate) fn pick_tied(tied: &[usize], num_vars: usize, rng: &mut StdRng) -> Result<usize> {
    if tied.is_empty() {
        return Err(SelectionError::InvalidState(
            "no arm attains the maximum".to_string(),
        ));
    }
    let next = tied[rng.random_range(0..tied.len())];
    if next >= num_vars {
        return Err(SelectionError::InvalidState(format!(
            "model reported arm {next} outside 0..{num_vars}"
        )));
    }
    Ok(next)
}

/// Chooses an arm uniformly at random, with replacement across calls.
pub struct UniformSelectionPolicy {
    model: Option<SharedModel>,
    rng: StdRng,
}

impl UniformSelectionPolicy {
    /// Deterministic fixed seed (0).
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self { model: None, rng }
    }
}

impl Default for UniformSelectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for UniformSelectionPolicy {
    fn model(&self) -> Option<&SharedModel> {
        self.model.as_ref()
    }

    fn set_model(&mut self, model: SharedModel) -> Result<()> {
        attach(&mut self.model, model)
    }

    fn choose_next(&mut self) -> Result<usize> {
        let n = borrow_model(&self.model)?.num_vars();
        if n == 0 {
            return Err(SelectionError::InvalidState(
                "predictive model has no arms".to_string(),
            ));
        }
        let next = self.rng.random_range(0..n);
        tracing::trace!(policy = "uniform", arm = next, "chose next arm");
        Ok(next)
    }
}

/// Greedy policy: the arm with the highest posterior mean, ties broken uniformly.
pub struct MaxDiscreteSelectionPolicy {
    model: Option<SharedModel>,
    rng: StdRng,
}

impl MaxDiscreteSelectionPolicy {
    /// Deterministic fixed seed (0).
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self { model: None, rng }
    }
}

impl Default for MaxDiscreteSelectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for MaxDiscreteSelectionPolicy {
    fn model(&self) -> Option<&SharedModel> {
        self.model.as_ref()
    }

    fn set_model(&mut self, model: SharedModel) -> Result<()> {
        attach(&mut self.model, model)
    }

    fn choose_next(&mut self) -> Result<usize> {
        let model = borrow_model(&self.model)?;
        let best = model.max_prediction();
        let next = pick_tied(&best.indices, model.num_vars(), &mut self.rng)?;
        tracing::trace!(
            policy = "max",
            arm = next,
            tied = best.indices.len(),
            mean = best.mean,
            "chose next arm"
        );
        Ok(next)
    }
}

/// Which selection policy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PolicyKind {
    Uniform,
    Max,
    Thompson,
    Gittins98,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Uniform => "uniform",
            PolicyKind::Max => "max",
            PolicyKind::Thompson => "thompson",
            PolicyKind::Gittins98 => "gittins98",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(PolicyKind::Uniform),
            "max" | "greedy" => Ok(PolicyKind::Max),
            "thompson" => Ok(PolicyKind::Thompson),
            "gittins98" | "gittins" => Ok(PolicyKind::Gittins98),
            other => Err(SelectionError::InvalidArgument(format!(
                "unknown selection policy {other:?}"
            ))),
        }
    }
}

/// Configuration for building a policy by name.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    /// Seed for the policy's RNG.
    pub seed: u64,
    /// Gittins table to load instead of the shipped one (ignored by other kinds).
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub table_path: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Thompson,
            seed: 0,
            table_path: None,
        }
    }
}

impl PolicyConfig {
    pub fn new(kind: PolicyKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Build the configured policy. Only the Gittins policy can fail (table load).
    pub fn build(&self) -> Result<Box<dyn SelectionPolicy>> {
        let rng = StdRng::seed_from_u64(self.seed);
        let policy: Box<dyn SelectionPolicy> = match self.kind {
            PolicyKind::Uniform => Box::new(UniformSelectionPolicy::with_rng(rng)),
            PolicyKind::Max => Box::new(MaxDiscreteSelectionPolicy::with_rng(rng)),
            PolicyKind::Thompson => Box::new(ThompsonSelectionPolicy::with_rng(rng)),
            PolicyKind::Gittins98 => {
                let p = match &self.table_path {
                    Some(path) => BetaBernoulliGittinsIndex98Policy::from_path(path)?,
                    None => BetaBernoulliGittinsIndex98Policy::new()?,
                };
                Box::new(p.using_rng(rng))
            }
        };
        tracing::debug!(kind = %self.kind, seed = self.seed, "built selection policy");
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{shared, BetaBernoulliModel, MaxPrediction};
    use rand::RngCore;

    struct FixedMax {
        n: usize,
        tied: Vec<usize>,
    }

    impl PredictiveModel for FixedMax {
        fn num_vars(&self) -> usize {
            self.n
        }
        fn sample(&self, _rng: &mut dyn RngCore) -> Vec<f64> {
            vec![0.0; self.n]
        }
        fn max_prediction(&self) -> MaxPrediction {
            MaxPrediction {
                indices: self.tied.clone(),
                mean: 0.5,
                variance: 0.1,
            }
        }
    }

    #[test]
    fn choose_before_attach_is_invalid_state() {
        let mut u = UniformSelectionPolicy::new();
        let mut m = MaxDiscreteSelectionPolicy::new();
        assert!(matches!(u.choose_next(), Err(SelectionError::InvalidState(_))));
        assert!(matches!(m.choose_next(), Err(SelectionError::InvalidState(_))));
    }

    #[test]
    fn set_model_rejects_armless_model() {
        let mut u = UniformSelectionPolicy::new();
        let err = u.set_model(shared(BetaBernoulliModel::new(0))).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidArgument(_)));
        assert!(u.model().is_none());
    }

    #[test]
    fn set_model_replaces_unconditionally() {
        let mut u = UniformSelectionPolicy::with_seed(1);
        u.set_model(shared(BetaBernoulliModel::new(10))).unwrap();
        u.set_model(shared(BetaBernoulliModel::new(2))).unwrap();
        for _ in 0..50 {
            assert!(u.choose_next().unwrap() < 2);
        }
    }

    #[test]
    fn mutably_borrowed_model_is_invalid_state() {
        let model = shared(BetaBernoulliModel::new(3));
        let mut u = UniformSelectionPolicy::new();
        u.set_model(model.clone()).unwrap();
        let _guard = model.borrow_mut();
        assert!(matches!(u.choose_next(), Err(SelectionError::InvalidState(_))));
    }

    #[test]
    fn max_policy_only_returns_tied_arms() {
        let mut p = MaxDiscreteSelectionPolicy::with_seed(3);
        p.set_model(shared(FixedMax {
            n: 5,
            tied: vec![1, 3],
        }))
        .unwrap();
        let mut counts = [0usize; 5];
        let trials = 4000;
        for _ in 0..trials {
            counts[p.choose_next().unwrap()] += 1;
        }
        assert_eq!(counts[0] + counts[2] + counts[4], 0);
        let f1 = counts[1] as f64 / trials as f64;
        assert!((f1 - 0.5).abs() < 0.05, "f1={f1}");
    }

    #[test]
    fn max_policy_rejects_empty_tie_set() {
        let mut p = MaxDiscreteSelectionPolicy::new();
        p.set_model(shared(FixedMax { n: 2, tied: vec![] })).unwrap();
        assert!(matches!(p.choose_next(), Err(SelectionError::InvalidState(_))));
    }

    #[test]
    fn argmax_ties_ignores_nan() {
        assert_eq!(argmax_ties(&[0.2, f64::NAN, 0.9, 0.9]), vec![2, 3]);
        assert!(argmax_ties(&[f64::NAN]).is_empty());
    }

    #[test]
    fn policy_kind_parses_names() {
        assert_eq!("Thompson".parse::<PolicyKind>().unwrap(), PolicyKind::Thompson);
        assert_eq!("greedy".parse::<PolicyKind>().unwrap(), PolicyKind::Max);
        assert_eq!(
            PolicyKind::Gittins98.to_string().parse::<PolicyKind>().unwrap(),
            PolicyKind::Gittins98
        );
        assert!("ucb".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn config_builds_each_stochastic_kind() {
        for kind in [PolicyKind::Uniform, PolicyKind::Max, PolicyKind::Thompson] {
            let mut p = PolicyConfig::new(kind).build().unwrap();
            p.set_model(shared(BetaBernoulliModel::new(3))).unwrap();
            assert!(p.choose_next().unwrap() < 3);
        }
    }
}
