use std::collections::BTreeMap;

use log::{debug, info};

use crate::config::AnalysisConfig;
use crate::model::FinancialModel;
use crate::schema::{Account, AccountType, Finding, Magnitude, Period, Severity, Signal, Transaction};
use crate::stats;
use crate::utils::{self, format_currency, format_percent};
use crate::variance::VarianceEngine;
use crate::vendor::VendorAnalysis;

/// Keyword → how strongly the account name implies a fixed monthly amount.
/// First match wins, so multi-word and more specific entries come first.
pub const STABILITY_KEYWORDS: &[(&str, f64)] = &[
    ("office supplies", 0.0),
    ("bank fees", 0.0),
    ("rent", 1.0),
    ("lease", 1.0),
    ("insurance", 1.0),
    ("depreciation", 1.0),
    ("amortization", 1.0),
    ("salary", 1.0),
    ("salaries", 1.0),
    ("benefits", 1.0),
    ("health", 1.0),
    ("license", 1.0),
    ("permit", 1.0),
    ("interest", 1.0),
    ("telephone", 1.0),
    ("phone", 1.0),
    ("internet", 1.0),
    ("accounting", 1.0),
    ("bookkeeping", 1.0),
    ("subscription", 1.0),
    ("software", 1.0),
    ("dues", 1.0),
    ("membership", 1.0),
    ("wages", 0.5),
    ("payroll", 0.5),
    ("utilities", 0.0),
    ("bank", 0.0),
    ("merchant", 0.0),
    ("processing", 0.0),
    ("legal", 0.0),
    ("professional", 0.0),
    ("advertising", 0.0),
    ("marketing", 0.0),
    ("promotion", 0.0),
    ("travel", 0.0),
    ("entertainment", 0.0),
    ("meals", 0.0),
    ("supplies", 0.0),
    ("training", 0.0),
    ("education", 0.0),
    ("donation", 0.0),
    ("gifts", 0.0),
    ("shipping", 0.0),
    ("freight", 0.0),
    ("postage", 0.0),
    ("repairs", 0.0),
    ("fuel", 0.0),
    ("commission", 0.0),
];

fn keyword_matches(name: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return name.contains(keyword);
    }
    name.split(|c: char| !c.is_alphanumeric())
        .any(|word| word.starts_with(keyword))
}

fn type_fallback(account_type: AccountType) -> f64 {
    match account_type {
        AccountType::Expense => 0.4,
        AccountType::CostOfGoodsSold
        | AccountType::Income
        | AccountType::OtherIncome
        | AccountType::OtherExpense => 0.2,
        AccountType::NetIncome => 0.0,
    }
}

/// How fixed the account is expected to be, in `[0, 1]`, from its name alone.
pub fn structural_stability(account: &Account) -> f64 {
    let name = account.source_name.to_lowercase();
    STABILITY_KEYWORDS
        .iter()
        .find(|(keyword, _)| keyword_matches(&name, keyword))
        .map(|(_, score)| *score)
        .unwrap_or_else(|| type_fallback(account.account_type))
}

/// `1` for a flat series, `0.5` at the threshold CV, `0` at twice the threshold.
pub fn statistical_stability(cv: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 || !cv.is_finite() {
        return 0.0;
    }
    (1.0 - cv / (2.0 * threshold)).clamp(0.0, 1.0)
}

pub struct AnomalyEngine<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> AnomalyEngine<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn combined_stability(&self, account: &Account, cv: f64) -> f64 {
        let w = self.config.anomaly.structural_weight;
        w * structural_stability(account)
            + (1.0 - w) * statistical_stability(cv, self.config.anomaly.stability_cv_threshold)
    }

    /// Deviations in should-be-stable accounts, plus ledger findings when a
    /// ledger is available.
    pub fn analyze(
        &self,
        model: &FinancialModel,
        transactions: Option<&[Transaction]>,
        vendors: Option<&VendorAnalysis>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        for account in model.leaf_accounts() {
            self.stable_deviations(model, account, vendors, &mut findings);
            self.erratic_fixed_cost(model, account, &mut findings);
        }
        if let Some(transactions) = transactions {
            findings.extend(self.unusual_transactions(model, transactions));
        }

        info!("Anomaly analysis produced {} findings", findings.len());
        findings
    }

    fn stable_deviations(
        &self,
        model: &FinancialModel,
        account: &Account,
        vendors: Option<&VendorAnalysis>,
        findings: &mut Vec<Finding>,
    ) {
        let cfg = &self.config.anomaly;
        let floor_engine = VarianceEngine::new(&self.config.variance);
        let series = model.series(account.id);
        let recurring_share = vendors.and_then(|v| {
            v.recurring_share(&account.name)
                .or_else(|| v.recurring_share(&account.source_name))
        });

        for (i, value) in series.iter().enumerate() {
            let Some(value) = *value else { continue };

            let history: Vec<f64> = series[..i].iter().flatten().copied().collect();
            let baseline = &history[history.len().saturating_sub(cfg.baseline_window)..];
            if baseline.len() < cfg.min_baseline_periods {
                continue;
            }

            let (Some(mean), Some(stdev)) = (stats::mean(baseline), stats::sample_stdev(baseline)) else {
                continue;
            };
            if mean.abs() <= f64::EPSILON {
                continue;
            }
            let cv = stdev / mean.abs();
            if self.combined_stability(account, cv) < cfg.stable_score_threshold {
                continue;
            }

            let sigma = stdev.max(mean.abs() * cfg.min_sigma_fraction);
            if sigma <= f64::EPSILON {
                continue;
            }
            let deviation = value - mean;
            let z = deviation / sigma;
            if z.abs() < cfg.z_threshold || deviation.abs() <= floor_engine.dollar_floor(baseline) {
                continue;
            }

            let deviation_pct = deviation / mean.abs();
            if recurring_share.is_some_and(|share| share >= cfg.recurring_suppression_share)
                && deviation_pct.abs() <= self.config.vendor.recurring_amount_tolerance
            {
                debug!(
                    "Suppressing {} deviation in period {}: covered by recurring vendors",
                    account.name, i
                );
                continue;
            }

            let severity = if deviation_pct.abs() >= self.config.variance.pct_threshold
                || z.abs() >= 2.0 * cfg.z_threshold
            {
                Severity::Critical
            } else {
                Severity::Warning
            };
            let Some(period) = model.period(i) else { continue };

            findings.push(
                Finding::new(
                    Signal::StableDeviation,
                    severity,
                    Magnitude::with_percent(deviation, deviation_pct),
                    format!(
                        "{} is normally steady around {} but was {} in {} ({}, z = {:.1})",
                        account.name,
                        format_currency(mean),
                        format_currency(value),
                        period.label,
                        format_percent(deviation_pct),
                        z
                    ),
                )
                .with_account(account)
                .with_periods(&[period])
                .with_action("Check for a rate change, a duplicate charge or an entry posted to the wrong account"),
            );
        }
    }

    fn erratic_fixed_cost(&self, model: &FinancialModel, account: &Account, findings: &mut Vec<Finding>) {
        let cfg = &self.config.anomaly;
        if structural_stability(account) < 1.0 {
            return;
        }

        let present: Vec<(usize, f64)> = model
            .series(account.id)
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .collect();
        if present.len() < cfg.min_baseline_periods {
            return;
        }
        let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
        let Some(cv) = stats::coefficient_of_variation(&values) else {
            return;
        };
        if cv <= cfg.stability_cv_threshold {
            return;
        }

        let stdev = stats::sample_stdev(&values).unwrap_or(0.0);
        let periods: Vec<&Period> = present.iter().filter_map(|(i, _)| model.period(*i)).collect();
        findings.push(
            Finding::new(
                Signal::ErraticFixedCost,
                Severity::Warning,
                Magnitude::with_percent(stdev, cv),
                format!(
                    "{} is usually a fixed cost but varies by {:.0}% month to month (standard deviation {})",
                    account.name,
                    cv * 100.0,
                    format_currency(stdev)
                ),
            )
            .with_account(account)
            .with_periods(&periods)
            .with_action("Look for missed, doubled or prepaid bills and spread annual charges evenly"),
        );
    }

    /// Transactions much larger than the account's other transactions. A
    /// finding names the P&L period whose month holds the transaction date.
    pub fn unusual_transactions(&self, model: &FinancialModel, transactions: &[Transaction]) -> Vec<Finding> {
        let cfg = &self.config.anomaly;
        let period_months: Vec<(utils::YearMonth, &Period)> = model
            .periods()
            .iter()
            .filter_map(|p| utils::parse_period_month(&p.label).map(|month| (month, p)))
            .collect();
        let mut by_account: BTreeMap<&str, Vec<&Transaction>> = BTreeMap::new();
        for txn in transactions {
            by_account.entry(txn.account.as_str()).or_default().push(txn);
        }

        let mut findings = Vec::new();
        for (account, txns) in by_account {
            if txns.len() < 3 {
                continue;
            }
            let total: f64 = txns.iter().map(|t| t.amount.abs()).sum();

            for txn in &txns {
                let amount = txn.amount.abs();
                // compare against the rest so one large charge cannot hide itself
                let others = (total - amount) / (txns.len() - 1) as f64;
                if amount <= cfg.unusual_multiplier * others || amount <= cfg.unusual_floor {
                    continue;
                }

                let mut explanation = if others > 0.0 {
                    format!(
                        "{} on {} to {} is {:.1}x the account's typical transaction of {}",
                        format_currency(txn.amount),
                        txn.date.format("%Y-%m-%d"),
                        account,
                        amount / others,
                        format_currency(others)
                    )
                } else {
                    format!(
                        "{} on {} to {} stands alone, the account's other transactions are all zero",
                        format_currency(txn.amount),
                        txn.date.format("%Y-%m-%d"),
                        account
                    )
                };
                if let Some(vendor) = &txn.vendor {
                    explanation.push_str(&format!(" (vendor: {})", vendor.trim()));
                }

                let mut finding = Finding::new(
                    Signal::UnusualTransaction,
                    Severity::Warning,
                    Magnitude::with_percent(txn.amount, if others > 0.0 { amount / others } else { 0.0 }),
                    explanation,
                )
                .with_account_name(account)
                .with_action("Confirm the transaction is valid and coded to the right account");
                if let Some(vendor) = &txn.vendor {
                    finding = finding.with_vendor(vendor.trim());
                }
                let month = utils::year_month(txn.date);
                if let Some((_, period)) = period_months.iter().find(|(m, _)| *m == month) {
                    finding = finding.with_periods(&[*period]);
                }
                findings.push(finding);
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::model_of;
    use crate::schema::{AccountId, AccountRole, FindingKind};
    use chrono::NaiveDate;

    fn account(name: &str, account_type: AccountType) -> Account {
        Account {
            id: AccountId(0),
            name: name.to_string(),
            source_name: name.to_string(),
            account_type,
            role: AccountRole::Leaf,
            depth: 0,
            parent: None,
            row: 1,
        }
    }

    #[test]
    fn test_structural_stability_keywords() {
        assert_eq!(structural_stability(&account("Rent or Lease", AccountType::Expense)), 1.0);
        assert_eq!(structural_stability(&account("Software Subscriptions", AccountType::Expense)), 1.0);
        assert_eq!(structural_stability(&account("Office Supplies", AccountType::Expense)), 0.0);
        assert_eq!(structural_stability(&account("Utilities", AccountType::Expense)), 0.0);
        assert_eq!(structural_stability(&account("Payroll Wages", AccountType::Expense)), 0.5);
        // "current" must not match "rent"
        assert_eq!(structural_stability(&account("Current Projects", AccountType::Expense)), 0.4);
        assert_eq!(structural_stability(&account("Sales", AccountType::Income)), 0.2);
    }

    #[test]
    fn test_statistical_stability() {
        assert_eq!(statistical_stability(0.0, 0.15), 1.0);
        assert!((statistical_stability(0.15, 0.15) - 0.5).abs() < 1e-12);
        assert_eq!(statistical_stability(0.30, 0.15), 0.0);
        assert_eq!(statistical_stability(5.0, 0.15), 0.0);
        assert_eq!(statistical_stability(f64::NAN, 0.15), 0.0);
    }

    #[test]
    fn test_combined_stability_formula() {
        let config = AnalysisConfig::default();
        let engine = AnomalyEngine::new(&config);
        let rent = account("Rent", AccountType::Expense);
        // 0.4 * 1.0 + 0.6 * 1.0
        assert!((engine.combined_stability(&rent, 0.0) - 1.0).abs() < 1e-12);
        let travel = account("Travel", AccountType::Expense);
        // 0.4 * 0.0 + 0.6 * 0.5
        assert!((engine.combined_stability(&travel, 0.15) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_stable_account_spike_is_flagged() {
        let config = AnalysisConfig::default();
        let model = model_of(&[
            (
                "Rent",
                AccountType::Expense,
                &[Some(2000.0), Some(2000.0), Some(2000.0), Some(2000.0), Some(3000.0)],
            ),
            (
                "Travel",
                AccountType::Expense,
                &[Some(900.0), Some(200.0), Some(1500.0), Some(400.0), Some(3000.0)],
            ),
        ]);
        let findings = AnomalyEngine::new(&config).analyze(&model, None, None);

        let deviations: Vec<_> = findings
            .iter()
            .filter(|f| f.signal == Signal::StableDeviation)
            .collect();
        assert_eq!(deviations.len(), 1);
        assert_eq!(deviations[0].account.as_deref(), Some("Rent"));
        assert_eq!(deviations[0].periods, vec![4]);
        assert_eq!(deviations[0].severity, Severity::Critical);
        assert_eq!(deviations[0].kind, FindingKind::AnomalyFlag);
        assert_eq!(deviations[0].magnitude.amount, 1000.0);
    }

    #[test]
    fn test_erratic_fixed_cost() {
        let config = AnalysisConfig::default();
        let model = model_of(&[(
            "Insurance",
            AccountType::Expense,
            &[Some(500.0), Some(1500.0), Some(200.0), Some(900.0)],
        )]);
        let findings = AnomalyEngine::new(&config).analyze(&model, None, None);
        assert!(findings.iter().any(|f| f.signal == Signal::ErraticFixedCost));
    }

    #[test]
    fn test_recurring_vendor_suppresses_small_deviation() {
        use crate::vendor::{CategorySpend, VendorProfile, VendorShare};

        let config = AnalysisConfig::default();
        let model = model_of(&[(
            "Rent",
            AccountType::Expense,
            &[Some(5000.0), Some(5000.0), Some(5000.0), Some(5400.0)],
        )]);
        let unsuppressed = AnomalyEngine::new(&config).analyze(&model, None, None);
        assert!(unsuppressed.iter().any(|f| f.signal == Signal::StableDeviation));

        let vendors = VendorAnalysis {
            calendar: vec![(2025, 1), (2025, 2), (2025, 3), (2025, 4)],
            categories: vec![CategorySpend {
                name: "Rent".to_string(),
                total: 20_400.0,
                unattributed: 0.0,
                vendors: vec![VendorShare {
                    vendor: "Landlord LLC".to_string(),
                    key: "landlord llc".to_string(),
                    spend: 20_400.0,
                    share: 1.0,
                    transactions: 4,
                }],
            }],
            vendors: vec![VendorProfile {
                key: "landlord llc".to_string(),
                name: "Landlord LLC".to_string(),
                total: 20_400.0,
                transactions: 4,
                categories: vec!["Rent".to_string()],
                monthly: Vec::new(),
                presence: 1.0,
                recurring: true,
            }],
        };
        let suppressed = AnomalyEngine::new(&config).analyze(&model, None, Some(&vendors));
        assert!(!suppressed.iter().any(|f| f.signal == Signal::StableDeviation));
    }

    #[test]
    fn test_unusual_transactions() {
        let config = AnalysisConfig::default();
        let txn = |day: u32, amount: f64| Transaction {
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            account: "Repairs".to_string(),
            account_type: Some(AccountType::Expense),
            vendor: Some("Fixit".to_string()),
            amount,
            description: None,
            row: day as usize,
        };
        let transactions = vec![txn(1, 120.0), txn(2, 150.0), txn(3, 2_400.0), txn(4, 90.0)];
        let model = model_of(&[("Repairs", AccountType::Expense, &[Some(100.0), Some(200.0), Some(2_760.0)])]);
        let findings = AnomalyEngine::new(&config).unusual_transactions(&model, &transactions);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].magnitude.amount, 2_400.0);
        assert_eq!(findings[0].vendor.as_deref(), Some("Fixit"));
        assert_eq!(findings[0].periods, vec![2]);
        assert_eq!(findings[0].period_labels, vec!["Mar 2025"]);

        // too few transactions to judge
        assert!(AnomalyEngine::new(&config)
            .unusual_transactions(&model, &transactions[1..3])
            .is_empty());
    }

    #[test]
    fn test_unusual_transaction_among_zero_amounts() {
        let config = AnalysisConfig::default();
        let txn = |day: u32, amount: f64| Transaction {
            date: NaiveDate::from_ymd_opt(2025, 7, day).unwrap(),
            account: "Repairs".to_string(),
            account_type: Some(AccountType::Expense),
            vendor: None,
            amount,
            description: None,
            row: day as usize,
        };
        let transactions = vec![txn(1, 0.0), txn(2, 0.0), txn(3, 900.0)];
        let model = model_of(&[("Repairs", AccountType::Expense, &[Some(900.0)])]);
        let findings = AnomalyEngine::new(&config).unusual_transactions(&model, &transactions);

        assert_eq!(findings.len(), 1);
        assert!(findings[0].explanation.contains("other transactions are all zero"));
        assert!(!findings[0].explanation.contains("inf"));
        // July is not a period of the report
        assert!(findings[0].periods.is_empty());
    }
}
