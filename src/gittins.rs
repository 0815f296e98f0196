//! Gittins index selection for Beta-Bernoulli arms.
//!
//! The Gittins index is the optimal priority for the infinite-horizon
//! discounted bandit under a Beta-Bernoulli reward model. It depends only on
//! an arm's pseudo-counts and the discount factor, so it is precomputed once
//! into a [`GittinsIndexTable`] and looked up per round.
//!
//! Table convention: entry `(i, j)` holds the index for `alpha = i + 1`,
//! `beta = j + 1` (the stored tables are 1-based). Counts past the last
//! row/column saturate at the edge, trading exact optimality for bounded
//! lookups once an arm has more observations than the table covers.
//!
//! Supported files:
//! - `.json`: `{"discount": 0.98, "indices": [[...], ...]}` (feature `serde`).
//! - anything else: one row per line, values separated by whitespace or
//!   commas, `#` comments, and a required `# discount = 0.98` header.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Result, SelectionError};
use crate::model::SharedModel;
use crate::policy::{argmax_ties, attach, borrow_model, pick_tied, SelectionPolicy};

/// Discount factor of the shipped table.
pub const GITTINS_DISCOUNT: f64 = 0.98;

/// Where [`BetaBernoulliGittinsIndex98Policy::new`] looks for its table,
/// relative to the working directory.
pub const DEFAULT_TABLE_PATH: &str = "data/bandits/gittins_indices_98.json";

const BISECTION_STEPS: usize = 40;

/// Immutable row-major lookup table of Gittins indices.
#[derive(Debug, Clone, PartialEq)]
pub struct GittinsIndexTable {
    discount: f64,
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct TableFile {
    discount: f64,
    indices: Vec<Vec<f64>>,
}

fn check_discount(discount: f64) -> Result<()> {
    if discount.is_finite() && discount > 0.0 && discount < 1.0 {
        Ok(())
    } else {
        Err(SelectionError::InvalidArgument(format!(
            "discount must be in (0, 1), got {discount}"
        )))
    }
}

/// Re-base a 1-based pseudo-count to a 0-based bucket and clamp it to `len`.
fn bucket(count: f64, len: usize) -> usize {
    // Truncate toward zero; NaN and negatives map to 0.
    let c = if count.is_finite() && count > 0.0 {
        count as u64
    } else if count == f64::INFINITY {
        u64::MAX
    } else {
        0
    };
    let rebased = usize::try_from(c.saturating_sub(1)).unwrap_or(usize::MAX);
    rebased.min(len.saturating_sub(1))
}

impl GittinsIndexTable {
    /// Build from rows of index values. Rows must be non-empty, equal length, finite.
    pub fn from_rows(discount: f64, rows: Vec<Vec<f64>>) -> Result<Self> {
        check_discount(discount)?;
        let n_rows = rows.len();
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        if n_rows == 0 || n_cols == 0 {
            return Err(SelectionError::InvalidArgument(
                "gittins index table is empty".to_string(),
            ));
        }
        let mut values = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(SelectionError::InvalidArgument(format!(
                    "gittins index table row {i} has {} columns, expected {n_cols}",
                    row.len()
                )));
            }
            if let Some(v) = row.iter().find(|v| !v.is_finite()) {
                return Err(SelectionError::InvalidArgument(format!(
                    "gittins index table row {i} holds non-finite value {v}"
                )));
            }
            values.extend(row);
        }
        Ok(Self {
            discount,
            rows: n_rows,
            cols: n_cols,
            values,
        })
    }

    /// Load a table from disk, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SelectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let table = if is_json {
            Self::parse_json(&text)?
        } else {
            Self::parse_text(&text)?
        };
        tracing::debug!(
            path = %path.display(),
            rows = table.rows,
            cols = table.cols,
            discount = table.discount,
            "loaded gittins index table"
        );
        Ok(table)
    }

    #[cfg(feature = "serde")]
    pub fn parse_json(text: &str) -> Result<Self> {
        let file: TableFile = serde_json::from_str(text)?;
        Self::from_rows(file.discount, file.indices)
    }

    #[cfg(not(feature = "serde"))]
    pub fn parse_json(_text: &str) -> Result<Self> {
        Err(SelectionError::InvalidArgument(
            "json gittins tables require the `serde` feature".to_string(),
        ))
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        let file = TableFile {
            discount: self.discount,
            indices: self.values.chunks(self.cols).map(<[f64]>::to_vec).collect(),
        };
        Ok(serde_json::to_string(&file)?)
    }

    /// Parse the plain-text matrix format.
    pub fn parse_text(text: &str) -> Result<Self> {
        let mut discount = None;
        let mut rows = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                if let Some((key, value)) = comment.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("discount") {
                        let d = value.trim().parse::<f64>().map_err(|e| {
                            SelectionError::InvalidArgument(format!(
                                "line {}: bad discount {:?}: {e}",
                                lineno + 1,
                                value.trim()
                            ))
                        })?;
                        discount = Some(d);
                    }
                }
                continue;
            }
            let row = line
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|tok| !tok.is_empty())
                .map(|tok| {
                    tok.parse::<f64>().map_err(|e| {
                        SelectionError::InvalidArgument(format!(
                            "line {}: bad value {tok:?}: {e}",
                            lineno + 1
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }
        let discount = discount.ok_or_else(|| {
            SelectionError::InvalidArgument(
                "text gittins table is missing a `# discount = ...` header".to_string(),
            )
        })?;
        Self::from_rows(discount, rows)
    }

    /// Render in the plain-text matrix format accepted by [`Self::parse_text`].
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# discount = {}", self.discount);
        for row in self.values.chunks(self.cols) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "{}", cells.join(" "));
        }
        out
    }

    /// Calibrate Beta-Bernoulli Gittins indices for `alpha in 1..=rows`,
    /// `beta in 1..=cols`.
    ///
    /// Each index is the retirement reward per step at which continuing and
    /// retiring are equally good, found by bisection. Continuation values come
    /// from backward induction over `horizon` further pulls; past the horizon
    /// an arm is valued at its posterior mean forever.
    pub fn compute(discount: f64, rows: usize, cols: usize, horizon: usize) -> Result<Self> {
        check_discount(discount)?;
        if rows == 0 || cols == 0 || horizon == 0 {
            return Err(SelectionError::InvalidArgument(
                "rows, cols and horizon must all be positive".to_string(),
            ));
        }
        let mut next = Vec::with_capacity(horizon + 1);
        let mut cur = Vec::with_capacity(horizon + 1);
        let mut table = Vec::with_capacity(rows);
        for i in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for j in 0..cols {
                let (a, b) = ((i + 1) as f64, (j + 1) as f64);
                let (mut lo, mut hi) = (a / (a + b), 1.0);
                for _ in 0..BISECTION_STEPS {
                    let mid = 0.5 * (lo + hi);
                    if continuing_beats(a, b, mid, discount, horizon, &mut cur, &mut next) {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                row.push(0.5 * (lo + hi));
            }
            table.push(row);
        }
        Self::from_rows(discount, table)
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Raw 0-based lookup.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// Index for Beta pseudo-counts: truncate, re-base to 0, clamp to the table edge.
    pub fn index_for(&self, alpha: f64, beta: f64) -> f64 {
        let i = bucket(alpha, self.rows);
        let j = bucket(beta, self.cols);
        self.values[i * self.cols + j]
    }
}

/// Does pulling an arm at `(a, b)` beat retiring on `lambda` per step?
fn continuing_beats(
    a: f64,
    b: f64,
    lambda: f64,
    gamma: f64,
    horizon: usize,
    cur: &mut Vec<f64>,
    next: &mut Vec<f64>,
) -> bool {
    let retire = lambda / (1.0 - gamma);
    let total = a + b + horizon as f64;
    next.clear();
    next.extend((0..=horizon).map(|s| retire.max((a + s as f64) / total / (1.0 - gamma))));
    for depth in (0..horizon).rev() {
        cur.clear();
        let n = a + b + depth as f64;
        for s in 0..=depth {
            let p = (a + s as f64) / n;
            let cont = p * (1.0 + gamma * next[s + 1]) + (1.0 - p) * gamma * next[s];
            cur.push(if depth == 0 { cont } else { retire.max(cont) });
        }
        std::mem::swap(cur, next);
    }
    next[0] > retire
}

/// Gittins index policy for Beta-Bernoulli models, discount 0.98.
pub struct BetaBernoulliGittinsIndex98Policy {
    model: Option<SharedModel>,
    table: Arc<GittinsIndexTable>,
    rng: StdRng,
}

impl BetaBernoulliGittinsIndex98Policy {
    /// Load the table from [`DEFAULT_TABLE_PATH`].
    pub fn new() -> Result<Self> {
        Self::from_path(DEFAULT_TABLE_PATH)
    }

    /// Load the table from `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_table(Arc::new(GittinsIndexTable::load(path)?))
    }

    /// Share an already loaded table. Its discount must be 0.98.
    pub fn with_table(table: Arc<GittinsIndexTable>) -> Result<Self> {
        if (table.discount() - GITTINS_DISCOUNT).abs() > 1e-9 {
            return Err(SelectionError::InvalidArgument(format!(
                "expected a table for discount {GITTINS_DISCOUNT}, got {}",
                table.discount()
            )));
        }
        Ok(Self {
            model: None,
            table,
            rng: StdRng::seed_from_u64(0),
        })
    }

    /// Replace the tie-break RNG.
    pub fn using_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn seeded(self, seed: u64) -> Self {
        self.using_rng(StdRng::seed_from_u64(seed))
    }

    pub fn table(&self) -> &Arc<GittinsIndexTable> {
        &self.table
    }

    fn type_mismatch() -> SelectionError {
        SelectionError::TypeMismatch(
            "gittins index policy can only be used with beta-bernoulli models".to_string(),
        )
    }
}

impl SelectionPolicy for BetaBernoulliGittinsIndex98Policy {
    fn model(&self) -> Option<&SharedModel> {
        self.model.as_ref()
    }

    fn set_model(&mut self, model: SharedModel) -> Result<()> {
        let is_beta_bernoulli = model
            .try_borrow()
            .map_err(|_| {
                SelectionError::InvalidArgument("predictive model is mutably borrowed".to_string())
            })?
            .as_beta_bernoulli()
            .is_some();
        if !is_beta_bernoulli {
            return Err(Self::type_mismatch());
        }
        attach(&mut self.model, model)
    }

    fn choose_next(&mut self) -> Result<usize> {
        let model = borrow_model(&self.model)?;
        let bb = model.as_beta_bernoulli().ok_or_else(Self::type_mismatch)?;
        let indices: Vec<f64> = bb
            .posterior_alphas()
            .iter()
            .zip(bb.posterior_betas())
            .map(|(&a, &b)| self.table.index_for(a, b))
            .collect();
        let tied = argmax_ties(&indices);
        let next = pick_tied(&tied, model.num_vars(), &mut self.rng)?;
        tracing::trace!(policy = "gittins98", arm = next, index = indices[next], "chose next arm");
        Ok(next)
    }
}
