//! Thompson sampling selection.
//!
//! Each round draws one posterior sample per arm and picks the largest.
//! Arms with a higher mean or a wider posterior win the draw more often, which
//! balances exploration against exploitation without a tuning parameter.
//!
//! Notes:
//! - This policy is **seedable** so selection can be reproducible in tests.
//! - Default construction uses a fixed seed (deterministic by default).

use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Result, SelectionError};
use crate::model::SharedModel;
use crate::policy::{argmax_ties, attach, borrow_model, pick_tied, SelectionPolicy};

/// Callback that receives the sampled values when debugging is enabled.
pub type SampleInspector = Box<dyn FnMut(&[f64])>;

/// Seedable Thompson-sampling selection policy.
pub struct ThompsonSelectionPolicy {
    model: Option<SharedModel>,
    rng: StdRng,
    debug: bool,
    inspector: Option<SampleInspector>,
}

impl ThompsonSelectionPolicy {
    /// Deterministic fixed seed (0).
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            model: None,
            rng,
            debug: false,
            inspector: None,
        }
    }

    /// Toggle diagnostics for every subsequent [`SelectionPolicy::choose_next`].
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Install a callback that sees the sampled values while debugging is on.
    ///
    /// The callback cannot influence which arm is returned.
    pub fn set_inspector(&mut self, inspector: impl FnMut(&[f64]) + 'static) {
        self.inspector = Some(Box::new(inspector));
    }

    pub fn clear_inspector(&mut self) {
        self.inspector = None;
    }

    /// Like `choose_next`, but runs diagnostics for this call when `stop` is set.
    pub fn choose_next_with(&mut self, stop: bool) -> Result<usize> {
        let model = borrow_model(&self.model)?;
        let n = model.num_vars();
        let sampled = model.sample(&mut self.rng);
        drop(model);

        if sampled.len() != n {
            return Err(SelectionError::InvalidState(format!(
                "model returned {} samples for {n} arms",
                sampled.len()
            )));
        }
        if stop || self.debug {
            tracing::debug!(?sampled, "thompson posterior samples");
            if let Some(inspect) = self.inspector.as_mut() {
                inspect(&sampled);
            }
        }

        let tied = argmax_ties(&sampled);
        let next = pick_tied(&tied, n, &mut self.rng)?;
        tracing::trace!(policy = "thompson", arm = next, tied = tied.len(), "chose next arm");
        Ok(next)
    }
}

impl Default for ThompsonSelectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThompsonSelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThompsonSelectionPolicy")
            .field("attached", &self.model.is_some())
            .field("debug", &self.debug)
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}

impl SelectionPolicy for ThompsonSelectionPolicy {
    fn model(&self) -> Option<&SharedModel> {
        self.model.as_ref()
    }

    fn set_model(&mut self, model: SharedModel) -> Result<()> {
        attach(&mut self.model, model)
    }

    fn choose_next(&mut self) -> Result<usize> {
        self.choose_next_with(false)
    }
}
