//! Invalid-pixel statistics and their merge operations.
//!
//! Merging is pure: both operands are borrowed and a new value is returned. Counters at the
//! same key are summed, nested per-band maps are merged recursively and keys present on one
//! side only pass through, which makes the fold associative and commutative.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Failure count per rule key
pub type RuleCounts = BTreeMap<String, u64>;

/// Sum two counter maps key by key
pub fn merge_counts(a: &RuleCounts, b: &RuleCounts) -> RuleCounts {
    let mut merged = a.clone();
    for (key, count) in b {
        *merged.entry(key.clone()).or_insert(0) += count;
    }
    merged
}

/// Statistics of one chunk, one image or a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidPixelStatistics {
    pub total_pixels: u64,
    /// Pixels masked in the output, no-data pixels included
    pub total_invalid_pixels: u64,
    pub nodata_pixels: u64,
    /// Quality band full name -> rule key -> failures
    pub invalid_pixels: BTreeMap<String, RuleCounts>,
}

impl InvalidPixelStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, other: &Self) -> Self {
        let mut invalid_pixels = self.invalid_pixels.clone();
        for (band, counts) in &other.invalid_pixels {
            let merged = match invalid_pixels.get(band) {
                Some(existing) => merge_counts(existing, counts),
                None => counts.clone(),
            };
            invalid_pixels.insert(band.clone(), merged);
        }

        Self {
            total_pixels: self.total_pixels + other.total_pixels,
            total_invalid_pixels: self.total_invalid_pixels + other.total_invalid_pixels,
            nodata_pixels: self.nodata_pixels + other.nodata_pixels,
            invalid_pixels,
        }
    }

    /// Failures of one rule, zero when the rule was never counted
    pub fn rule_count(&self, band_full_name: &str, key: &str) -> u64 {
        self.invalid_pixels
            .get(band_full_name)
            .and_then(|counts| counts.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Rule counters of every band in one map (keys carry the band prefix)
    pub fn rule_totals(&self) -> RuleCounts {
        self.invalid_pixels
            .values()
            .fold(RuleCounts::new(), |acc, counts| merge_counts(&acc, counts))
    }

    pub fn invalid_percentage(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            100.0 * self.total_invalid_pixels as f64 / self.total_pixels as f64
        }
    }
}

/// Per-image statistics keyed by acquisition id (`YYYYDDD`), so key order is chronological
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesStatistics {
    images: BTreeMap<String, InvalidPixelStatistics>,
}

impl TimeSeriesStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the statistics of an image; an id seen before is merged into
    pub fn record(&mut self, acquisition_id: &str, statistics: InvalidPixelStatistics) {
        let merged = match self.images.get(acquisition_id) {
            Some(existing) => existing.merge(&statistics),
            None => statistics,
        };
        self.images.insert(acquisition_id.to_string(), merged);
    }

    pub fn get(&self, acquisition_id: &str) -> Option<&InvalidPixelStatistics> {
        self.images.get(acquisition_id)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InvalidPixelStatistics)> {
        self.images.iter()
    }

    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (id, statistics) in &other.images {
            merged.record(id, statistics.clone());
        }
        merged
    }

    /// Totals over the whole series
    pub fn cumulative(&self) -> InvalidPixelStatistics {
        self.images
            .values()
            .fold(InvalidPixelStatistics::new(), |acc, stats| acc.merge(stats))
    }

    /// Flatten into one row per image: total invalid, no-data, then every rule key.
    ///
    /// Columns that stay zero over the whole series are dropped. A rule that an image did not
    /// report is `None`.
    pub fn table(&self) -> StatisticsTable {
        let rule_keys: Vec<String> = self
            .images
            .values()
            .flat_map(|stats| stats.rule_totals().into_keys())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = vec!["total_invalid_pixels".to_string(), "nodata_pixels".to_string()];
        columns.extend(rule_keys.iter().cloned());

        let mut rows: Vec<(String, Vec<Option<u64>>)> = self
            .images
            .iter()
            .map(|(id, stats)| {
                let totals = stats.rule_totals();
                let mut values = vec![Some(stats.total_invalid_pixels), Some(stats.nodata_pixels)];
                values.extend(rule_keys.iter().map(|key| totals.get(key).copied()));
                (id.clone(), values)
            })
            .collect();

        let keep: Vec<bool> = (0..columns.len())
            .map(|col| rows.iter().any(|(_, values)| matches!(values[col], Some(v) if v > 0)))
            .collect();
        let columns = columns
            .into_iter()
            .zip(&keep)
            .filter_map(|(name, &kept)| kept.then_some(name))
            .collect();
        for (_, values) in rows.iter_mut() {
            let mut col = 0;
            values.retain(|_| {
                let kept = keep[col];
                col += 1;
                kept
            });
        }

        StatisticsTable { columns, rows }
    }
}

/// Time series laid out for plotting or CSV export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsTable {
    pub columns: Vec<String>,
    /// (acquisition id, one value per column)
    pub rows: Vec<(String, Vec<Option<u64>>)>,
}
