//! Marginal rate scales (tax brackets) whose thresholds and rates revise independently.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bracket {
    pub threshold: BTreeMap<NaiveDate, Option<f64>>,
    pub rate: BTreeMap<NaiveDate, Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScaleSeries {
    pub brackets: Vec<Bracket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn in_effect(series: &BTreeMap<NaiveDate, Option<f64>>, date: NaiveDate) -> Option<f64> {
    series.range(..=date).next_back().and_then(|(_, v)| *v)
}

impl ScaleSeries {
    /// Brackets in effect at `date`, sorted by threshold. Brackets lacking a
    /// threshold or rate at that date are left out; `None` if none remain.
    pub fn at(&self, date: NaiveDate) -> Option<MarginalScale> {
        let mut brackets: Vec<(f64, f64)> = self
            .brackets
            .iter()
            .filter_map(|b| Some((in_effect(&b.threshold, date)?, in_effect(&b.rate, date)?)))
            .collect();
        if brackets.is_empty() {
            return None;
        }
        brackets.sort_by(|a, b| a.0.total_cmp(&b.0));
        Some(MarginalScale { brackets })
    }
}

/// A resolved scale: `(threshold, rate)` pairs in ascending threshold order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalScale {
    brackets: Vec<(f64, f64)>,
}

impl MarginalScale {
    pub fn brackets(&self) -> &[(f64, f64)] {
        &self.brackets
    }

    /// Tax on each base, applying each rate to the slice of the base inside its bracket.
    pub fn calc(&self, bases: &[f64]) -> Vec<f64> {
        bases
            .iter()
            .map(|&base| {
                let mut tax = 0.0;
                for (i, &(lower, rate)) in self.brackets.iter().enumerate() {
                    if base <= lower {
                        break;
                    }
                    let upper = self.brackets.get(i + 1).map_or(f64::INFINITY, |b| b.0);
                    tax += (base.min(upper) - lower) * rate;
                }
                tax
            })
            .collect()
    }

    /// Rate of the bracket each base falls into (0 below the first threshold).
    pub fn marginal_rate(&self, bases: &[f64]) -> Vec<f64> {
        bases
            .iter()
            .map(|&base| {
                self.brackets
                    .iter()
                    .take_while(|&&(lower, _)| base >= lower)
                    .last()
                    .map_or(0.0, |&(_, rate)| rate)
            })
            .collect()
    }
}
