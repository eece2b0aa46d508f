use std::cmp::Ordering;
use std::collections::HashMap;

use log::{debug, info};

use crate::schema::{Finding, FindingKind};

/// Merges findings from every engine into one ordered list.
#[derive(Debug, Default)]
pub struct InsightAggregator;

impl InsightAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let total = findings.len();
        let mut merged = Self::deduplicate(findings);
        merged.sort_by(Self::compare);
        info!("Aggregated {} findings into {}", total, merged.len());
        merged
    }

    /// Variance and anomaly findings about the same account in the same single
    /// period collapse into one.
    fn deduplicate(findings: Vec<Finding>) -> Vec<Finding> {
        let mut kept: Vec<Finding> = Vec::with_capacity(findings.len());
        let mut seen: HashMap<(String, usize), usize> = HashMap::new();

        for finding in findings {
            let key = match (&finding.account, finding.single_period(), finding.kind) {
                (Some(account), Some(period), FindingKind::VarianceFlag | FindingKind::AnomalyFlag) => {
                    Some((account.clone(), period))
                }
                _ => None,
            };
            let Some(key) = key else {
                kept.push(finding);
                continue;
            };

            match seen.get(&key) {
                Some(&slot) => {
                    debug!("Merging duplicate finding for '{}' in period {}", key.0, key.1);
                    let existing = std::mem::replace(&mut kept[slot], finding.clone());
                    kept[slot] = Self::merge(existing, finding);
                }
                None => {
                    seen.insert(key, kept.len());
                    kept.push(finding);
                }
            }
        }
        kept
    }

    fn merge(a: Finding, b: Finding) -> Finding {
        let a_wins = match a.severity.cmp(&b.severity) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.magnitude.amount.abs() >= b.magnitude.amount.abs(),
        };
        let (mut winner, loser) = if a_wins { (a, b) } else { (b, a) };

        if !winner.explanation.contains(&loser.explanation) {
            winner.explanation = format!("{}; {}", winner.explanation, loser.explanation);
        }
        if winner.suggested_action.is_none() {
            winner.suggested_action = loser.suggested_action;
        }
        winner
    }

    fn compare(a: &Finding, b: &Finding) -> Ordering {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.magnitude.amount.abs().total_cmp(&a.magnitude.amount.abs()))
            .then_with(|| a.account.cmp(&b.account))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.vendor.cmp(&b.vendor))
            .then_with(|| a.periods.first().cmp(&b.periods.first()))
            .then_with(|| a.explanation.cmp(&b.explanation))
    }
}
