//! Candidate filters
//!
//! A filter narrows a universe of regulator names to a plausible
//! candidate set before any solver runs. Evidence-based filters
//! (footprints, open chromatin, gene ontology) live with the caller;
//! their output can enter here through [`AllowListFilter`].

use crate::error::{RegulonError, Result};
use crate::matrix::ExpressionMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Narrow `universe` to a candidate list. Output keeps input order and
/// never invents names.
pub trait CandidateFilter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, universe: &[String], matrix: &ExpressionMatrix) -> Result<Vec<String>>;
}

/// Variance rule: absolute threshold or the k most variable rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarianceRule {
    AtLeast(f64),
    TopK(usize),
}

/// Keeps candidates by row variance across samples. Names missing from
/// the matrix are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceFilter {
    pub rule: VarianceRule,
}

impl VarianceFilter {
    pub fn threshold(min_variance: f64) -> Result<Self> {
        if !(min_variance.is_finite() && min_variance >= 0.0) {
            return Err(RegulonError::invalid_param(
                "min_variance",
                min_variance,
                "must be non-negative and finite",
            ));
        }
        Ok(Self {
            rule: VarianceRule::AtLeast(min_variance),
        })
    }

    pub fn top_k(k: usize) -> Self {
        Self {
            rule: VarianceRule::TopK(k),
        }
    }
}

impl CandidateFilter for VarianceFilter {
    fn name(&self) -> &str {
        "variance"
    }

    fn filter(&self, universe: &[String], matrix: &ExpressionMatrix) -> Result<Vec<String>> {
        let scored: Vec<(&String, f64)> = universe
            .iter()
            .filter_map(|name| matrix.row_variance(name).map(|v| (name, v)))
            .collect();

        let kept: Vec<String> = match self.rule {
            VarianceRule::AtLeast(min) => scored
                .into_iter()
                .filter(|(_, v)| *v >= min)
                .map(|(n, _)| n.clone())
                .collect(),
            VarianceRule::TopK(k) => {
                let mut order: Vec<usize> = (0..scored.len()).collect();
                order.sort_by(|&a, &b| {
                    scored[b].1
                        .total_cmp(&scored[a].1)
                        .then_with(|| scored[a].0.cmp(scored[b].0))
                });
                let keep: HashSet<usize> = order.into_iter().take(k).collect();
                scored
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| keep.contains(i))
                    .map(|(_, (n, _))| (*n).clone())
                    .collect()
            }
        };

        tracing::debug!(filter = "variance", before = universe.len(), after = kept.len(), "candidates filtered");
        Ok(kept)
    }
}

/// Intersects the universe with a caller-supplied allow list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListFilter {
    allowed: HashSet<String>,
}

impl AllowListFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl CandidateFilter for AllowListFilter {
    fn name(&self) -> &str {
        "allow-list"
    }

    fn filter(&self, universe: &[String], _matrix: &ExpressionMatrix) -> Result<Vec<String>> {
        Ok(universe
            .iter()
            .filter(|n| self.allowed.contains(n.as_str()))
            .cloned()
            .collect())
    }
}

/// Applies filters in order, each on the previous output
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn CandidateFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F: CandidateFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl CandidateFilter for FilterChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn filter(&self, universe: &[String], matrix: &ExpressionMatrix) -> Result<Vec<String>> {
        let mut current = universe.to_vec();
        for f in &self.filters {
            current = f.filter(&current, matrix)?;
        }
        Ok(current)
    }
}
