//! `graspsel`: discrete selection policies for adaptive grasp-quality sampling.
//!
//! Designed for "which candidate do I evaluate next?" problems: a finite set
//! of arms (grasp candidates), each with an unknown success probability
//! (probability of force closure), and a budget of noisy evaluations. A
//! [`PredictiveModel`] holds the per-arm posterior; a [`SelectionPolicy`]
//! reads it and names the next arm; the caller evaluates that arm and updates
//! the model.
//!
//! **Selection policies** (all share [`SelectionPolicy`]):
//! - [`UniformSelectionPolicy`]: uniform draw, independent per call.
//! - [`MaxDiscreteSelectionPolicy`]: greedy on the posterior mean.
//! - [`ThompsonSelectionPolicy`]: argmax of one posterior sample per arm.
//! - [`BetaBernoulliGittinsIndex98Policy`]: argmax of a precomputed Gittins
//!   index (discount 0.98) looked up from the arm's Beta pseudo-counts.
//!
//! Every policy breaks ties uniformly at random, never by first match, and
//! every policy is **seedable**: default construction uses a fixed seed so
//! runs are reproducible.
//!
//! **Supporting pieces:**
//! - [`BetaBernoulliModel`]: independent Beta-Bernoulli posterior per arm.
//! - [`GittinsIndexTable`]: load (JSON or text) or compute index tables.
//! - [`AdaptiveSampler`]: the choose / evaluate / update loop, with
//!   [`TerminationCondition`]s and snapshots of the best predicted arm.
//! - [`PolicyConfig`]: build a boxed policy by name.
//!
//! **Non-goals:**
//! - No grasp sampling, feature extraction, rendering, or robot control.
//! - No experiment orchestration (config files, result persistence, plots).
//!
//! # Example
//!
//! ```rust
//! use graspsel::{
//!     shared, AdaptiveSampler, BernoulliArms, BetaBernoulliModel, SamplerConfig,
//!     ThompsonSelectionPolicy,
//! };
//!
//! let model = shared(BetaBernoulliModel::new(3));
//! let mut arms = BernoulliArms::new(vec![0.1, 0.8, 0.3], 0);
//! let mut sampler =
//!     AdaptiveSampler::new(model, Box::new(ThompsonSelectionPolicy::with_seed(0))).unwrap();
//! let result = sampler
//!     .run(|arm| arms.evaluate(arm), &SamplerConfig { max_iter: 200, snapshot_rate: 20 })
//!     .unwrap();
//! assert!(result.best_pred_ind < 3);
//! ```

#![forbid(unsafe_code)]

mod error;
pub use error::*;

mod model;
pub use model::*;

mod policy;
pub use policy::*;

mod thompson;
pub use thompson::*;

mod gittins;
pub use gittins::*;

mod sampler;
pub use sampler::*;
