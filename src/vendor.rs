use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::VendorConfig;
use crate::model::FinancialModel;
use crate::schema::{Finding, Magnitude, Notice, Period, Severity, Signal, Transaction};
use crate::stats;
use crate::utils::{self, format_currency, YearMonth};

const PLACEHOLDER_VENDORS: &[&str] = &["nan", "none", "n a", "na", "null", "unknown", "-"];

/// Canonical vendor key used for grouping.
///
/// Trims and lowercases, spells `&` as `and`, drops apostrophes, turns every
/// other non-alphanumeric character into a space and collapses whitespace.
/// Empty results and placeholders such as `nan` or `N/A` mean no vendor.
pub fn normalize_vendor_name(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    if PLACEHOLDER_VENDORS.contains(&lower.as_str()) {
        return None;
    }

    let mut spaced = String::with_capacity(lower.len());
    for ch in lower.chars() {
        match ch {
            '&' => spaced.push_str(" and "),
            '\'' | '’' | '`' => {}
            c if c.is_alphanumeric() => spaced.push(c),
            _ => spaced.push(' '),
        }
    }

    let normalized = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() || PLACEHOLDER_VENDORS.contains(&normalized.as_str()) {
        return None;
    }
    Some(normalized)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct VendorShare {
    pub vendor: String,
    pub key: String,
    pub spend: f64,
    pub share: f64,
    pub transactions: usize,
}

/// Ledger spend on one expense account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CategorySpend {
    pub name: String,
    pub total: f64,
    #[schemars(description = "Spend on transactions with no vendor")]
    pub unattributed: f64,
    pub vendors: Vec<VendorShare>,
}

impl CategorySpend {
    pub fn unattributed_share(&self) -> f64 {
        if self.total > 0.0 {
            self.unattributed / self.total
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MonthlySpend {
    pub year: i32,
    pub month: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct VendorProfile {
    pub key: String,
    pub name: String,
    pub total: f64,
    pub transactions: usize,
    pub categories: Vec<String>,
    pub monthly: Vec<MonthlySpend>,
    #[schemars(description = "Fraction of calendar months with at least one transaction")]
    pub presence: f64,
    pub recurring: bool,
}

/// Vendor spend grouped by category, by vendor and by month.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct VendorAnalysis {
    #[schemars(description = "Months recurring vendors are measured against, as (year, month)")]
    pub calendar: Vec<YearMonth>,
    pub categories: Vec<CategorySpend>,
    pub vendors: Vec<VendorProfile>,
}

impl VendorAnalysis {
    pub fn category(&self, name: &str) -> Option<&CategorySpend> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn vendor(&self, key: &str) -> Option<&VendorProfile> {
        self.vendors.iter().find(|v| v.key == key)
    }

    /// Share of a category's spend paid to recurring vendors.
    pub fn recurring_share(&self, category: &str) -> Option<f64> {
        let spend = self.category(category)?;
        if spend.total <= 0.0 {
            return None;
        }
        let recurring: f64 = spend
            .vendors
            .iter()
            .filter(|v| self.vendor(&v.key).is_some_and(|p| p.recurring))
            .map(|v| v.spend)
            .sum();
        Some(recurring / spend.total)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VendorOutcome {
    pub analysis: VendorAnalysis,
    pub findings: Vec<Finding>,
    pub notices: Vec<Notice>,
}

/// True for transactions whose spend counts toward vendor analysis.
fn is_spend(txn: &Transaction) -> bool {
    txn.account_type.map_or(true, |ty| ty.is_expense_side())
}

/// P&L months when every period label names one, else the ledger's span.
pub fn analysis_calendar(model: &FinancialModel, transactions: &[Transaction]) -> Vec<YearMonth> {
    let from_model: Option<Vec<YearMonth>> = model.periods().iter().map(Period::month).collect();
    if let Some(months) = from_model.filter(|m| !m.is_empty()) {
        let mut seen = BTreeSet::new();
        return months.into_iter().filter(|m| seen.insert(*m)).collect();
    }

    let months: Vec<YearMonth> = transactions
        .iter()
        .filter(|t| is_spend(t))
        .map(|t| utils::year_month(t.date))
        .collect();
    match (months.iter().min(), months.iter().max()) {
        (Some(first), Some(last)) => utils::month_span(*first, *last),
        _ => Vec::new(),
    }
}

#[derive(Default)]
struct VendorTally {
    name: String,
    total: f64,
    transactions: usize,
    categories: BTreeSet<String>,
    monthly: BTreeMap<YearMonth, f64>,
}

#[derive(Default)]
struct CategoryTally {
    total: f64,
    unattributed: f64,
    /// key -> (display name, spend, transaction count)
    vendors: HashMap<String, (String, f64, usize)>,
}

pub struct VendorEngine<'a> {
    config: &'a VendorConfig,
}

impl<'a> VendorEngine<'a> {
    pub fn new(config: &'a VendorConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, model: &FinancialModel, transactions: &[Transaction]) -> VendorOutcome {
        let calendar = analysis_calendar(model, transactions);
        let analysis = self.aggregate(transactions, calendar);

        let (mut findings, notices) = self.concentration(&analysis);
        findings.extend(self.recurring_findings(model, &analysis));

        info!(
            "Vendor analysis: {} vendors across {} categories, {} findings",
            analysis.vendors.len(),
            analysis.categories.len(),
            findings.len()
        );
        VendorOutcome {
            analysis,
            findings,
            notices,
        }
    }

    /// Groups expense-side spend (absolute amounts) by category, vendor and month.
    pub fn aggregate(&self, transactions: &[Transaction], calendar: Vec<YearMonth>) -> VendorAnalysis {
        let mut categories: BTreeMap<String, CategoryTally> = BTreeMap::new();
        let mut vendors: BTreeMap<String, VendorTally> = BTreeMap::new();

        for txn in transactions.iter().filter(|t| is_spend(t)) {
            let spend = txn.amount.abs();
            let category = categories.entry(txn.account.clone()).or_default();
            category.total += spend;

            let Some(key) = txn.vendor.as_deref().and_then(normalize_vendor_name) else {
                category.unattributed += spend;
                continue;
            };
            let display = txn.vendor.as_deref().unwrap_or(&key).trim().to_string();

            let entry = category
                .vendors
                .entry(key.clone())
                .or_insert_with(|| (display.clone(), 0.0, 0));
            entry.1 += spend;
            entry.2 += 1;

            let vendor = vendors.entry(key).or_insert_with(|| VendorTally {
                name: display,
                ..VendorTally::default()
            });
            vendor.total += spend;
            vendor.transactions += 1;
            vendor.categories.insert(txn.account.clone());
            *vendor.monthly.entry(utils::year_month(txn.date)).or_default() += spend;
        }

        let mut category_spend: Vec<CategorySpend> = categories
            .into_iter()
            .map(|(name, tally)| {
                let mut shares: Vec<VendorShare> = tally
                    .vendors
                    .into_iter()
                    .map(|(key, (vendor, spend, transactions))| VendorShare {
                        vendor,
                        key,
                        spend,
                        share: if tally.total > 0.0 { spend / tally.total } else { 0.0 },
                        transactions,
                    })
                    .collect();
                shares.sort_by(|a, b| b.spend.total_cmp(&a.spend).then_with(|| a.key.cmp(&b.key)));
                CategorySpend {
                    name,
                    total: tally.total,
                    unattributed: tally.unattributed,
                    vendors: shares,
                }
            })
            .collect();
        category_spend.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

        let mut profiles: Vec<VendorProfile> = vendors
            .into_iter()
            .map(|(key, tally)| self.profile(key, tally, &calendar))
            .collect();
        profiles.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.key.cmp(&b.key)));

        VendorAnalysis {
            calendar,
            categories: category_spend,
            vendors: profiles,
        }
    }

    fn profile(&self, key: String, tally: VendorTally, calendar: &[YearMonth]) -> VendorProfile {
        let active: Vec<f64> = calendar
            .iter()
            .filter_map(|m| tally.monthly.get(m).copied())
            .collect();
        let presence = if calendar.is_empty() {
            0.0
        } else {
            active.len() as f64 / calendar.len() as f64
        };

        let steady = stats::median(&active).is_some_and(|median| {
            median > 0.0
                && active
                    .iter()
                    .all(|v| (v - median).abs() <= self.config.recurring_amount_tolerance * median)
        });
        let recurring =
            calendar.len() >= 2 && presence >= self.config.recurring_min_presence && steady;
        if recurring {
            debug!("Vendor '{}' is recurring ({:.0}% of months)", tally.name, presence * 100.0);
        }

        VendorProfile {
            key,
            name: tally.name,
            total: tally.total,
            transactions: tally.transactions,
            categories: tally.categories.into_iter().collect(),
            monthly: tally
                .monthly
                .into_iter()
                .map(|((year, month), amount)| MonthlySpend { year, month, amount })
                .collect(),
            presence,
            recurring,
        }
    }

    /// Single-vendor and top-N concentration per category, plus unattributed
    /// spend notices.
    pub fn concentration(&self, analysis: &VendorAnalysis) -> (Vec<Finding>, Vec<Notice>) {
        let mut findings = Vec::new();
        let mut notices = Vec::new();
        let threshold = self.config.share_threshold;

        for category in &analysis.categories {
            if category.total < self.config.min_category_spend {
                continue;
            }

            if category.unattributed_share() > self.config.unattributed_notice_share {
                notices.push(Notice::UnattributedSpend {
                    category: category.name.clone(),
                    share: category.unattributed_share(),
                });
            }

            let before = findings.len();
            for share in category.vendors.iter().filter(|v| v.share > threshold) {
                let severity = if share.share >= (1.0 + threshold) / 2.0 {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                findings.push(
                    Finding::new(
                        Signal::SingleVendorShare,
                        severity,
                        Magnitude::with_percent(share.spend, share.share),
                        format!(
                            "{} accounts for {:.1}% of {} spend ({} of {})",
                            share.vendor,
                            share.share * 100.0,
                            category.name,
                            format_currency(share.spend),
                            format_currency(category.total)
                        ),
                    )
                    .with_account_name(category.name.clone())
                    .with_vendor(share.vendor.clone())
                    .with_action("Get competing quotes or a second supplier to reduce dependence on one vendor"),
                );
            }

            let top_n = self.config.top_n;
            if findings.len() == before && category.vendors.len() > top_n {
                let top: f64 = category.vendors.iter().take(top_n).map(|v| v.spend).sum();
                let top_share = top / category.total;
                if top_share > self.config.top_n_share_threshold {
                    let names: Vec<&str> = category
                        .vendors
                        .iter()
                        .take(top_n)
                        .map(|v| v.vendor.as_str())
                        .collect();
                    findings.push(
                        Finding::new(
                            Signal::TopVendorShare,
                            Severity::Warning,
                            Magnitude::with_percent(top, top_share),
                            format!(
                                "The top {} vendors ({}) account for {:.1}% of {} spend",
                                top_n,
                                names.join(", "),
                                top_share * 100.0,
                                category.name
                            ),
                        )
                        .with_account_name(category.name.clone())
                        .with_action("Review whether these vendors' terms are still competitive"),
                    );
                }
            }
        }

        (findings, notices)
    }

    pub fn recurring_findings(&self, model: &FinancialModel, analysis: &VendorAnalysis) -> Vec<Finding> {
        analysis
            .vendors
            .iter()
            .filter(|v| v.recurring)
            .map(|vendor| {
                let active: Vec<YearMonth> = vendor.monthly.iter().map(|m| (m.year, m.month)).collect();
                let amounts: Vec<f64> = vendor
                    .monthly
                    .iter()
                    .filter(|m| analysis.calendar.contains(&(m.year, m.month)))
                    .map(|m| m.amount)
                    .collect();
                let typical = stats::median(&amounts).unwrap_or(0.0);
                let periods: Vec<&Period> = model
                    .periods()
                    .iter()
                    .filter(|p| p.month().is_some_and(|m| active.contains(&m)))
                    .collect();

                let mut finding = Finding::new(
                    Signal::Recurring,
                    Severity::Info,
                    Magnitude::with_percent(typical, vendor.presence),
                    format!(
                        "{} bills about {} a month, active in {} of {} months",
                        vendor.name,
                        format_currency(typical),
                        amounts.len(),
                        analysis.calendar.len()
                    ),
                )
                .with_vendor(vendor.name.clone())
                .with_periods(&periods)
                .with_action("Confirm this recurring charge is still needed and on the best available plan");
                if let [category] = vendor.categories.as_slice() {
                    finding = finding.with_account_name(category.clone());
                }
                finding
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::model_of;
    use crate::schema::{AccountType, FindingKind};
    use chrono::NaiveDate;

    fn txn(date: (i32, u32, u32), account: &str, vendor: Option<&str>, amount: f64) -> Transaction {
        Transaction {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            account: account.to_string(),
            account_type: Some(AccountType::Expense),
            vendor: vendor.map(str::to_string),
            amount,
            description: None,
            row: 0,
        }
    }

    #[test]
    fn test_normalize_vendor_name() {
        assert_eq!(normalize_vendor_name("  ACME Supplies, Inc. "), Some("acme supplies inc".to_string()));
        assert_eq!(normalize_vendor_name("Ben & Jerry's"), Some("ben and jerrys".to_string()));
        assert_eq!(normalize_vendor_name("AT&T"), Some("at and t".to_string()));
        assert_eq!(normalize_vendor_name("Home-Depot #123"), Some("home depot 123".to_string()));
        assert_eq!(normalize_vendor_name("nan"), None);
        assert_eq!(normalize_vendor_name("N/A"), None);
        assert_eq!(normalize_vendor_name("Unknown"), None);
        assert_eq!(normalize_vendor_name("   "), None);
        assert_eq!(normalize_vendor_name("---"), None);
    }

    #[test]
    fn test_normalization_groups_spellings() {
        let engine_config = VendorConfig::default();
        let engine = VendorEngine::new(&engine_config);
        let analysis = engine.aggregate(
            &[
                txn((2025, 1, 3), "Office Supplies", Some("Acme Supplies"), 100.0),
                txn((2025, 1, 9), "Office Supplies", Some("ACME SUPPLIES"), 50.0),
                txn((2025, 2, 3), "Office Supplies", Some("acme  supplies"), -25.0),
                txn((2025, 2, 3), "Office Supplies", None, 25.0),
            ],
            vec![(2025, 1), (2025, 2)],
        );
        assert_eq!(analysis.vendors.len(), 1);
        let acme = &analysis.vendors[0];
        assert_eq!(acme.name, "Acme Supplies");
        assert_eq!(acme.total, 175.0);
        assert_eq!(acme.transactions, 3);

        let category = analysis.category("Office Supplies").unwrap();
        assert_eq!(category.total, 200.0);
        assert_eq!(category.unattributed, 25.0);
    }

    #[test]
    fn test_single_vendor_concentration() {
        let config = VendorConfig::default();
        let engine = VendorEngine::new(&config);
        let analysis = engine.aggregate(
            &[
                txn((2025, 1, 3), "Office Supplies", Some("Acme Supplies"), 8_000.0),
                txn((2025, 1, 5), "Office Supplies", Some("Paper Co"), 1_000.0),
                txn((2025, 1, 7), "Office Supplies", Some("Staples"), 1_000.0),
            ],
            vec![(2025, 1)],
        );
        let (findings, notices) = engine.concentration(&analysis);
        assert!(notices.is_empty());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::VendorConcentration);
        assert_eq!(findings[0].vendor.as_deref(), Some("Acme Supplies"));
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].magnitude.percent, Some(0.8));
    }

    #[test]
    fn test_top_n_concentration_and_small_categories() {
        let config = VendorConfig::default();
        let engine = VendorEngine::new(&config);
        let analysis = engine.aggregate(
            &[
                txn((2025, 1, 1), "Marketing", Some("A"), 3_000.0),
                txn((2025, 1, 1), "Marketing", Some("B"), 3_000.0),
                txn((2025, 1, 1), "Marketing", Some("C"), 2_900.0),
                txn((2025, 1, 1), "Marketing", Some("D"), 1_100.0),
                txn((2025, 1, 1), "Postage", Some("USPS"), 120.0),
            ],
            vec![(2025, 1)],
        );
        let (findings, _) = engine.concentration(&analysis);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].signal, Signal::TopVendorShare);
        assert_eq!(findings[0].account.as_deref(), Some("Marketing"));
    }

    #[test]
    fn test_unattributed_notice() {
        let config = VendorConfig::default();
        let engine = VendorEngine::new(&config);
        let analysis = engine.aggregate(
            &[
                txn((2025, 1, 1), "Meals", None, 400.0),
                txn((2025, 1, 2), "Meals", Some("Cafe"), 300.0),
                txn((2025, 1, 3), "Meals", Some("Diner"), 300.0),
            ],
            vec![(2025, 1)],
        );
        let (_, notices) = engine.concentration(&analysis);
        assert_eq!(
            notices,
            vec![Notice::UnattributedSpend {
                category: "Meals".to_string(),
                share: 0.4
            }]
        );
    }

    #[test]
    fn test_recurring_vendor_detection() {
        let config = VendorConfig::default();
        let engine = VendorEngine::new(&config);
        let mut transactions = Vec::new();
        for month in 1..=4 {
            transactions.push(txn((2025, month, 15), "Software", Some("Adobe"), 52.99));
        }
        transactions.push(txn((2025, 1, 20), "Repairs", Some("Fixit"), 100.0));
        transactions.push(txn((2025, 2, 20), "Repairs", Some("Fixit"), 900.0));
        transactions.push(txn((2025, 3, 20), "Repairs", Some("Fixit"), 120.0));

        let model = model_of(&[(
            "Software",
            AccountType::Expense,
            &[Some(52.99), Some(52.99), Some(52.99), Some(52.99)],
        )]);
        let outcome = engine.analyze(&model, &transactions);

        assert_eq!(outcome.analysis.calendar, vec![(2025, 1), (2025, 2), (2025, 3), (2025, 4)]);
        assert!(outcome.analysis.vendor("adobe").unwrap().recurring);
        assert!(!outcome.analysis.vendor("fixit").unwrap().recurring);
        assert_eq!(outcome.analysis.recurring_share("Software"), Some(1.0));

        let recurring: Vec<_> = outcome
            .findings
            .iter()
            .filter(|f| f.signal == Signal::Recurring)
            .collect();
        assert_eq!(recurring.len(), 1);
        assert_eq!(recurring[0].severity, Severity::Info);
        assert_eq!(recurring[0].periods, vec![0, 1, 2, 3]);
        assert_eq!(recurring[0].account.as_deref(), Some("Software"));
    }

    #[test]
    fn test_calendar_falls_back_to_ledger_span() {
        use crate::model::{FinancialModelBuilder, ReportMetadata};

        // "Q1 2025" does not name a single month
        let periods = vec![Period {
            index: 0,
            label: "Q1 2025".to_string(),
            column: 1,
        }];
        let model = FinancialModelBuilder::new(periods, ReportMetadata::default()).build();
        let transactions = vec![
            txn((2024, 12, 1), "Rent", Some("Landlord"), 1.0),
            txn((2025, 2, 1), "Rent", Some("Landlord"), 1.0),
        ];
        assert_eq!(
            analysis_calendar(&model, &transactions),
            vec![(2024, 12), (2025, 1), (2025, 2)]
        );
    }

    #[test]
    fn test_income_transactions_are_ignored() {
        let config = VendorConfig::default();
        let engine = VendorEngine::new(&config);
        let mut sale = txn((2025, 1, 1), "Sales", Some("Big Client"), 9_000.0);
        sale.account_type = Some(AccountType::Income);
        let analysis = engine.aggregate(&[sale], vec![(2025, 1)]);
        assert!(analysis.categories.is_empty());
        assert!(analysis.vendors.is_empty());
    }
}
