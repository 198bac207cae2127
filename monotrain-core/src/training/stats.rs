//! Per-epoch statistics: accumulate per-batch loss terms, reduce to means.

use crate::error::{Result, TrainError};
use crate::training::collab::BatchStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loss terms read from each batch and the names they are reported under.
///
/// Three terms are relabelled: `seg` -> `center`, `size2d` -> `hm`,
/// `heading` -> `rotation`.
pub const REPORTED_TERMS: [(&str, &str); 5] = [
    ("seg", "center"),
    ("size2d", "hm"),
    ("depth", "depth"),
    ("size3d", "size3d"),
    ("heading", "rotation"),
];

/// Reported names, in emission order.
pub fn reported_names() -> impl Iterator<Item = &'static str> {
    REPORTED_TERMS.iter().map(|(_, reported)| *reported)
}

/// Mean of each named statistic over one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochSummary {
    pub means: BTreeMap<String, f64>,
}

impl EpochSummary {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.means.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Running per-batch series for one epoch. Create one per epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochStatsAggregator {
    series: BTreeMap<String, Vec<f64>>,
    batches: usize,
}

impl EpochStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register series so that a name never recorded still fails
    /// [`reduce`](Self::reduce) instead of silently disappearing.
    pub fn with_series<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            series: names
                .into_iter()
                .map(|name| (name.to_string(), Vec::new()))
                .collect(),
            batches: 0,
        }
    }

    /// Aggregator tracking the five reported loss terms.
    pub fn for_reported_terms() -> Self {
        Self::with_series(reported_names())
    }

    pub fn record(&mut self, name: &str, value: f64) {
        self.series.entry(name.to_string()).or_default().push(value);
    }

    /// Record the reported terms of one batch's loss statistics.
    pub fn record_batch(&mut self, stats: &BatchStats) -> Result<()> {
        // Check all terms first so a bad batch leaves no partial row behind.
        let mut row = Vec::with_capacity(REPORTED_TERMS.len());
        for (source, reported) in REPORTED_TERMS {
            let value = stats
                .get(source)
                .copied()
                .ok_or_else(|| TrainError::MissingStatistic(source.to_string()))?;
            row.push((reported, value));
        }
        for (reported, value) in row {
            self.record(reported, value);
        }
        self.batches += 1;
        Ok(())
    }

    /// Number of batches recorded through [`record_batch`](Self::record_batch).
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    /// Arithmetic mean of every series.
    ///
    /// Fails with `EmptySeries` when nothing was recorded at all or when any
    /// registered series has no values.
    pub fn reduce(&self) -> Result<EpochSummary> {
        if self.series.is_empty() {
            return Err(TrainError::empty_series("<none>"));
        }
        let mut means = BTreeMap::new();
        for (name, values) in &self.series {
            if values.is_empty() {
                return Err(TrainError::empty_series(name.clone()));
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            means.insert(name.clone(), mean);
        }
        Ok(EpochSummary { means })
    }
}
