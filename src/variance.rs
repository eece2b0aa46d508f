use log::{debug, info};

use crate::config::VarianceConfig;
use crate::model::FinancialModel;
use crate::reconcile::{ReconciliationScope, Reconciler};
use crate::schema::{Account, Finding, LineValue, Magnitude, Severity, Signal, TrendDirection};
use crate::stats;
use crate::utils::{format_currency, format_percent};

/// How one period's value relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change {
    Percent { delta: f64, percent: f64 },
    New { delta: f64 },
    Discontinued { delta: f64 },
    None,
}

impl Change {
    pub fn delta(&self) -> f64 {
        match self {
            Self::Percent { delta, .. } | Self::New { delta } | Self::Discontinued { delta } => *delta,
            Self::None => 0.0,
        }
    }
}

/// Classifies the move from `prior` to `current`. A blank cell is not a zero
/// for this purpose: blank after activity is a discontinuation.
pub fn classify_change(prior: LineValue, current: LineValue) -> Change {
    let nonzero = |v: f64| v.abs() > f64::EPSILON;
    match (prior, current) {
        (Some(p), Some(c)) if nonzero(p) => Change::Percent {
            delta: c - p,
            percent: (c - p) / p.abs(),
        },
        (Some(p), None) if nonzero(p) => Change::Discontinued { delta: -p },
        (_, Some(c)) if nonzero(c) => Change::New {
            delta: c - prior.unwrap_or(0.0),
        },
        _ => Change::None,
    }
}

pub struct VarianceEngine<'a> {
    config: &'a VarianceConfig,
}

impl<'a> VarianceEngine<'a> {
    pub fn new(config: &'a VarianceConfig) -> Self {
        Self { config }
    }

    /// Month-over-month, trend and reconciliation findings for every leaf account.
    pub fn analyze(&self, model: &FinancialModel) -> Vec<Finding> {
        let mut findings = Vec::new();
        for account in model.leaf_accounts() {
            self.period_changes(model, account, &mut findings);
            self.trends(model, account, &mut findings);
        }
        findings.extend(self.reconciliation_findings(model));

        info!("Variance analysis produced {} findings", findings.len());
        findings
    }

    /// Larger of the configured floor and a fraction of the account's typical size.
    pub fn dollar_floor(&self, trailing: &[f64]) -> f64 {
        let magnitudes: Vec<f64> = trailing.iter().map(|v| v.abs()).collect();
        let scaled = stats::mean(&magnitudes)
            .map(|m| m * self.config.trailing_floor_fraction)
            .unwrap_or(0.0);
        self.config.dollar_floor.max(scaled)
    }

    fn period_changes(&self, model: &FinancialModel, account: &Account, findings: &mut Vec<Finding>) {
        let series = model.series(account.id);
        let periods = model.periods();

        for i in 1..series.len() {
            let (prior, current) = (series[i - 1], series[i]);
            let change = classify_change(prior, current);
            if change == Change::None {
                continue;
            }

            let trailing: Vec<f64> = series[..i].iter().flatten().copied().collect();
            let floor = self.dollar_floor(&trailing);
            let delta = change.delta();
            if delta.abs() <= floor {
                continue;
            }

            let (from, to) = (&periods[i - 1], &periods[i]);
            let prior_text = prior.map(format_currency).unwrap_or_else(|| "nothing".to_string());
            let current_text = current.map(format_currency).unwrap_or_else(|| "nothing".to_string());

            let finding = match change {
                Change::Percent { percent, .. } => {
                    if percent.abs() <= self.config.pct_threshold {
                        continue;
                    }
                    let severity = if percent.abs() >= 2.0 * self.config.pct_threshold {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    let direction = if delta > 0.0 { "rose" } else { "fell" };
                    Finding::new(
                        Signal::PercentChange,
                        severity,
                        Magnitude::with_percent(delta, percent),
                        format!(
                            "{} {} {} from {} in {} to {} in {}",
                            account.name,
                            direction,
                            format_percent(percent),
                            prior_text,
                            from.label,
                            current_text,
                            to.label
                        ),
                    )
                    .with_action(if delta > 0.0 {
                        "Review the period's transactions for one-off charges, price increases or miscoded entries"
                    } else {
                        "Confirm the drop is genuine and not a missed or late-posted bill"
                    })
                }
                Change::New { .. } => Finding::new(
                    Signal::NewActivity,
                    Severity::Warning,
                    Magnitude::dollars(delta),
                    format!(
                        "{} had no activity in {} and {} in {}",
                        account.name, from.label, current_text, to.label
                    ),
                )
                .with_action("Confirm the new activity is expected and correctly categorized"),
                Change::Discontinued { .. } => Finding::new(
                    Signal::Discontinued,
                    Severity::Warning,
                    Magnitude::dollars(delta),
                    format!(
                        "{} had {} in {} and no activity in {}",
                        account.name, prior_text, from.label, to.label
                    ),
                )
                .with_action("Check whether the service ended or a bill has not been recorded yet"),
                Change::None => continue,
            };

            debug!("{}: {:?} in {}", account.name, finding.signal, to.label);
            findings.push(finding.with_account(account).with_periods(&[to]));
        }
    }

    fn trends(&self, model: &FinancialModel, account: &Account, findings: &mut Vec<Finding>) {
        let present: Vec<(usize, f64)> = model
            .series(account.id)
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .collect();
        if present.len() < self.config.trend_min_periods {
            return;
        }

        let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
        let implicated: Vec<_> = present
            .iter()
            .filter_map(|(i, _)| model.period(*i))
            .collect();
        let (Some(first_period), Some(last_period)) = (implicated.first(), implicated.last()) else {
            return;
        };
        let (first_label, last_label) = (&first_period.label, &last_period.label);

        if let Some(cv) = stats::coefficient_of_variation(&values) {
            if cv > self.config.volatility_cv_threshold {
                let stdev = stats::sample_stdev(&values).unwrap_or(0.0);
                findings.push(
                    Finding::new(
                        Signal::Volatile,
                        Severity::Info,
                        Magnitude::with_percent(stdev, cv),
                        format!(
                            "{} swings widely from {} to {} (standard deviation {}, {:.0}% of its average)",
                            account.name,
                            first_label,
                            last_label,
                            format_currency(stdev),
                            cv * 100.0
                        ),
                    )
                    .with_account(account)
                    .with_periods(&implicated)
                    .with_action("Consider budgeting this account on a rolling average rather than a fixed amount"),
                );
            }
        }

        let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let ups = deltas.iter().filter(|d| **d > 0.0).count();
        let downs = deltas.iter().filter(|d| **d < 0.0).count();
        let direction = if ups * 2 > deltas.len() {
            TrendDirection::Up
        } else if downs * 2 > deltas.len() {
            TrendDirection::Down
        } else {
            return;
        };

        let (Some(&first), Some(&last)) = (values.first(), values.last()) else {
            return;
        };
        let net_change = last - first;
        if self.config.trend_requires_net_change {
            let consistent = match direction {
                TrendDirection::Up => net_change > 0.0,
                TrendDirection::Down => net_change < 0.0,
            };
            if !consistent || net_change.abs() <= self.dollar_floor(&values) {
                return;
            }
        }

        let magnitude = if first.abs() > f64::EPSILON {
            Magnitude::with_percent(net_change, net_change / first.abs())
        } else {
            Magnitude::dollars(net_change)
        };
        let word = match direction {
            TrendDirection::Up => "trending up",
            TrendDirection::Down => "trending down",
        };
        findings.push(
            Finding::new(
                Signal::Trending(direction),
                Severity::Info,
                magnitude,
                format!(
                    "{} is {}: {} in {} to {} in {}",
                    account.name,
                    word,
                    format_currency(first),
                    first_label,
                    format_currency(last),
                    last_label
                ),
            )
            .with_account(account)
            .with_periods(&implicated),
        );
    }

    /// Subtotal rows that disagree with their components.
    pub fn reconciliation_findings(&self, model: &FinancialModel) -> Vec<Finding> {
        Reconciler::new(model)
            .verify(self.config.reconciliation_tolerance)
            .into_iter()
            .filter_map(|issue| {
                let account = model.account(issue.account_id)?;
                let period = model.period(issue.period)?;
                let (severity, action) = match issue.scope {
                    ReconciliationScope::NetIncome => (
                        Severity::Warning,
                        "Re-export the report; the bottom line does not follow from its sections",
                    ),
                    ReconciliationScope::Section | ReconciliationScope::Group => (
                        Severity::Info,
                        "Check for accounts hidden or collapsed in the export",
                    ),
                };
                Some(
                    Finding::new(
                        Signal::Reconciliation,
                        severity,
                        Magnitude::dollars(issue.difference),
                        format!(
                            "{} reports {} in {} but its components sum to {}",
                            account.name,
                            format_currency(issue.reported),
                            period.label,
                            format_currency(issue.recomputed)
                        ),
                    )
                    .with_account(account)
                    .with_periods(&[period])
                    .with_action(action),
                )
            })
            .collect()
    }
}
