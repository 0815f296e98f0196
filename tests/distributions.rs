//! Seeded statistical checks on how policies spread their choices.

use std::cell::Cell;
use std::sync::Arc;

use graspsel::{
    shared, BetaBernoulliGittinsIndex98Policy, BetaBernoulliModel, GittinsIndexTable,
    MaxDiscreteSelectionPolicy, MaxPrediction, PredictiveModel, SelectionPolicy,
    ThompsonSelectionPolicy, UniformSelectionPolicy, GITTINS_DISCOUNT,
};
use rand::RngCore;

/// Chi-square statistic against a uniform expectation.
fn chi_square_uniform(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    let expected = total as f64 / counts.len() as f64;
    counts
        .iter()
        .map(|&c| {
            let d = c as f64 - expected;
            d * d / expected
        })
        .sum()
}

// ---------------------------------------------------------------------------
// Uniform
// ---------------------------------------------------------------------------

#[test]
fn uniform_policy_passes_chi_square() {
    let mut p = UniformSelectionPolicy::with_seed(2024);
    p.set_model(shared(BetaBernoulliModel::new(4))).unwrap();
    let mut counts = [0usize; 4];
    for _ in 0..8_000 {
        counts[p.choose_next().unwrap()] += 1;
    }
    // df = 3, p = 0.001
    let chi2 = chi_square_uniform(&counts);
    assert!(chi2 < 16.27, "chi2={chi2} counts={counts:?}");
}

#[test]
fn uniform_policy_ignores_posterior() {
    let model = BetaBernoulliModel::from_counts(vec![500.0, 1.0, 1.0], vec![1.0, 500.0, 500.0]).unwrap();
    let mut p = UniformSelectionPolicy::with_seed(8);
    p.set_model(shared(model)).unwrap();
    let mut counts = [0usize; 3];
    for _ in 0..6_000 {
        counts[p.choose_next().unwrap()] += 1;
    }
    // df = 2, p = 0.001
    assert!(chi_square_uniform(&counts) < 13.82, "counts={counts:?}");
}

// ---------------------------------------------------------------------------
// Max
// ---------------------------------------------------------------------------

struct TiedMeans;

impl PredictiveModel for TiedMeans {
    fn num_vars(&self) -> usize {
        5
    }
    fn sample(&self, _rng: &mut dyn RngCore) -> Vec<f64> {
        vec![0.0; 5]
    }
    fn max_prediction(&self) -> MaxPrediction {
        MaxPrediction {
            indices: vec![1, 3],
            mean: 0.7,
            variance: 0.01,
        }
    }
}

#[test]
fn max_policy_splits_ties_evenly() {
    let mut p = MaxDiscreteSelectionPolicy::with_seed(77);
    p.set_model(shared(TiedMeans)).unwrap();
    let mut counts = [0usize; 5];
    let trials = 10_000;
    for _ in 0..trials {
        counts[p.choose_next().unwrap()] += 1;
    }
    assert_eq!(counts[0], 0);
    assert_eq!(counts[2], 0);
    assert_eq!(counts[4], 0);
    let f = counts[1] as f64 / trials as f64;
    assert!((f - 0.5).abs() < 0.03, "f={f}");
}

#[test]
fn max_policy_follows_beta_bernoulli_means() {
    let model = BetaBernoulliModel::from_counts(vec![3.0, 6.0, 2.0], vec![3.0, 2.0, 2.0]).unwrap();
    let mut p = MaxDiscreteSelectionPolicy::new();
    p.set_model(shared(model)).unwrap();
    for _ in 0..50 {
        assert_eq!(p.choose_next().unwrap(), 1);
    }
}

// ---------------------------------------------------------------------------
// Thompson
// ---------------------------------------------------------------------------

/// Stub that counts how often it is sampled and always returns the same draw.
struct Redrawn {
    draws: Cell<usize>,
}

impl PredictiveModel for Redrawn {
    fn num_vars(&self) -> usize {
        4
    }
    fn sample(&self, _rng: &mut dyn RngCore) -> Vec<f64> {
        self.draws.set(self.draws.get() + 1);
        vec![0.2, 0.9, 0.9, 0.1]
    }
    fn max_prediction(&self) -> MaxPrediction {
        MaxPrediction {
            indices: vec![1, 2],
            mean: 0.9,
            variance: 0.0,
        }
    }
}

#[test]
fn thompson_splits_tied_samples_evenly() {
    let model = shared(Redrawn { draws: Cell::new(0) });
    let mut p = ThompsonSelectionPolicy::with_seed(31);
    p.set_model(model.clone()).unwrap();
    let trials = 10_000;
    let mut ones = 0usize;
    for _ in 0..trials {
        match p.choose_next().unwrap() {
            1 => ones += 1,
            2 => {}
            other => panic!("arm {other} never attains the max"),
        }
    }
    assert_eq!(model.borrow().draws.get(), trials, "one posterior draw per call");
    let f = ones as f64 / trials as f64;
    assert!((f - 0.5).abs() < 0.03, "f={f}");
}

#[test]
fn thompson_explores_uncertain_arms() {
    // Arm 0 is known to be decent; arm 1 is barely observed.
    let model = BetaBernoulliModel::from_counts(vec![60.0, 1.0], vec![40.0, 1.0]).unwrap();
    let mut p = ThompsonSelectionPolicy::with_seed(5);
    p.set_model(shared(model)).unwrap();
    let picks_1 = (0..2_000).filter(|_| p.choose_next().unwrap() == 1).count();
    // P(Beta(1,1) > ~0.6) is about 0.4.
    assert!(picks_1 > 500 && picks_1 < 1_100, "picks_1={picks_1}");
}

// ---------------------------------------------------------------------------
// Gittins
// ---------------------------------------------------------------------------

#[cfg(feature = "serde")]
#[test]
fn gittins_policy_is_deterministic_without_ties() {
    let table = Arc::new(GittinsIndexTable::load("data/bandits/gittins_indices_98.json").unwrap());
    let v0 = table.index_for(2.0, 3.0);
    let v1 = table.index_for(5.0, 1.0);
    assert!(v0 < v1);

    let model = BetaBernoulliModel::from_counts(vec![2.0, 5.0], vec![3.0, 1.0]).unwrap();
    let mut p = BetaBernoulliGittinsIndex98Policy::with_table(table).unwrap();
    p.set_model(shared(model)).unwrap();
    for _ in 0..100 {
        assert_eq!(p.choose_next().unwrap(), 1);
    }
}

#[test]
fn gittins_policy_splits_identical_arms() {
    let table = Arc::new(GittinsIndexTable::from_rows(GITTINS_DISCOUNT, vec![vec![0.8, 0.6]]).unwrap());
    let mut p = BetaBernoulliGittinsIndex98Policy::with_table(table)
        .unwrap()
        .seeded(13);
    p.set_model(shared(BetaBernoulliModel::new(3))).unwrap();
    let mut counts = [0usize; 3];
    for _ in 0..6_000 {
        counts[p.choose_next().unwrap()] += 1;
    }
    assert!(chi_square_uniform(&counts) < 13.82, "counts={counts:?}");
}

#[cfg(feature = "serde")]
#[test]
fn gittins_prefers_less_explored_arm_at_equal_mean() {
    // Same mean 0.5, but arm 0 has far fewer observations: its index is higher.
    let table = Arc::new(GittinsIndexTable::load("data/bandits/gittins_indices_98.json").unwrap());
    let model = BetaBernoulliModel::from_counts(vec![2.0, 10.0], vec![2.0, 10.0]).unwrap();
    let mut p = BetaBernoulliGittinsIndex98Policy::with_table(table).unwrap();
    p.set_model(shared(model)).unwrap();
    assert_eq!(p.choose_next().unwrap(), 0);
}
