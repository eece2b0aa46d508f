use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::{self, YearMonth};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum AccountType {
    #[schemars(description = "Revenue from sales of goods or services")]
    Income,

    #[schemars(description = "Direct costs attributable to goods or services sold")]
    CostOfGoodsSold,

    #[schemars(description = "Operating expenses like salaries, rent, marketing, utilities")]
    Expense,

    #[schemars(description = "Non-operating income such as interest income or investment gains")]
    OtherIncome,

    #[schemars(description = "Non-operating costs such as interest expense or losses on disposal")]
    OtherExpense,

    #[schemars(description = "Summary lines derived from the sections: Gross Profit, Net Operating Income, Net Income")]
    NetIncome,
}

impl AccountType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Income => "Income",
            Self::CostOfGoodsSold => "Cost of Goods Sold",
            Self::Expense => "Expense",
            Self::OtherIncome => "Other Income",
            Self::OtherExpense => "Other Expense",
            Self::NetIncome => "Net Income",
        }
    }

    /// Sections whose spend reduces net income.
    pub fn is_expense_side(&self) -> bool {
        matches!(
            self,
            Self::CostOfGoodsSold | Self::Expense | Self::OtherExpense
        )
    }

    /// Sign of the section in `Income - COGS - Expenses + Other Income - Other Expense`.
    pub fn net_income_sign(&self) -> f64 {
        match self {
            Self::Income | Self::OtherIncome => 1.0,
            Self::CostOfGoodsSold | Self::Expense | Self::OtherExpense => -1.0,
            Self::NetIncome => 0.0,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum SummaryKind {
    GrossProfit,
    NetOperatingIncome,
    NetOtherIncome,
    NetIncome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase", tag = "role", content = "kind")]
pub enum AccountRole {
    #[schemars(description = "A posting account with no sub-accounts rolled into it")]
    Leaf,

    #[schemars(description = "The 'Total for <group>' row closing a parent account")]
    GroupTotal,

    #[schemars(description = "The 'Total <section>' row closing a section")]
    SectionTotal,

    #[schemars(description = "A report-level summary line")]
    Summary(SummaryKind),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub struct AccountId(pub usize);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Account {
    pub id: AccountId,

    #[schemars(description = "Display name, qualified with the section when the same name appears in several sections")]
    pub name: String,

    #[schemars(description = "The label exactly as it appeared in the export, trimmed")]
    pub source_name: String,

    pub account_type: AccountType,

    pub role: AccountRole,

    #[schemars(description = "Nesting depth below the section, 0 for top-level accounts")]
    pub depth: usize,

    #[schemars(description = "Name of the enclosing parent group, if any")]
    pub parent: Option<String>,

    #[schemars(description = "1-based row of the export this account came from")]
    pub row: usize,
}

impl Account {
    pub fn is_subtotal(&self) -> bool {
        self.role != AccountRole::Leaf
    }

    pub fn is_leaf(&self) -> bool {
        self.role == AccountRole::Leaf
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Period {
    #[schemars(description = "Ordinal position, 0-based, following column order in the export")]
    pub index: usize,

    pub label: String,

    #[schemars(description = "0-based source column of the period")]
    pub column: usize,
}

impl Period {
    /// Calendar month the label names, if it names exactly one.
    pub fn month(&self) -> Option<YearMonth> {
        utils::parse_period_month(&self.label)
    }
}

/// One (account, period) cell. `None` is a blank cell, distinct from zero.
pub type LineValue = Option<f64>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Transaction {
    pub date: NaiveDate,
    pub account: String,

    #[schemars(description = "Known from the Chart of Accounts or a matching P&L account")]
    pub account_type: Option<AccountType>,

    pub vendor: Option<String>,

    #[schemars(description = "Signed amount as exported")]
    pub amount: f64,

    pub description: Option<String>,

    #[schemars(description = "1-based row of the ledger export")]
    pub row: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum FindingKind {
    VarianceFlag,
    AnomalyFlag,
    VendorConcentration,
    RecurringVendor,
    ExpenseStructure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum TrendDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase", tag = "signal", content = "direction")]
pub enum Signal {
    PercentChange,
    NewActivity,
    Discontinued,
    Volatile,
    Trending(TrendDirection),
    Reconciliation,
    StableDeviation,
    ErraticFixedCost,
    UnusualTransaction,
    SingleVendorShare,
    TopVendorShare,
    Recurring,
    HighRevenueShare,
    OverheadAboveBenchmark,
    OverheadBelowBenchmark,
}

impl Signal {
    pub fn kind(&self) -> FindingKind {
        match self {
            Self::PercentChange
            | Self::NewActivity
            | Self::Discontinued
            | Self::Volatile
            | Self::Trending(_)
            | Self::Reconciliation => FindingKind::VarianceFlag,
            Self::StableDeviation | Self::ErraticFixedCost | Self::UnusualTransaction => {
                FindingKind::AnomalyFlag
            }
            Self::SingleVendorShare | Self::TopVendorShare => FindingKind::VendorConcentration,
            Self::Recurring => FindingKind::RecurringVendor,
            Self::HighRevenueShare | Self::OverheadAboveBenchmark | Self::OverheadBelowBenchmark => {
                FindingKind::ExpenseStructure
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Magnitude {
    #[schemars(description = "Signed dollar amount of the change or spend")]
    pub amount: f64,

    #[schemars(description = "Fractional change or share, 2.0 = 200%")]
    pub percent: Option<f64>,
}

impl Magnitude {
    pub fn dollars(amount: f64) -> Self {
        Self {
            amount,
            percent: None,
        }
    }

    pub fn with_percent(amount: f64, percent: f64) -> Self {
        Self {
            amount,
            percent: Some(percent),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Finding {
    pub kind: FindingKind,
    pub signal: Signal,
    pub severity: Severity,
    pub account: Option<String>,
    pub account_id: Option<AccountId>,
    pub vendor: Option<String>,

    #[schemars(description = "Indices of the implicated periods")]
    pub periods: Vec<usize>,
    pub period_labels: Vec<String>,
    pub magnitude: Magnitude,
    pub explanation: String,
    pub suggested_action: Option<String>,
}

impl Finding {
    pub fn new(signal: Signal, severity: Severity, magnitude: Magnitude, explanation: impl Into<String>) -> Self {
        Self {
            kind: signal.kind(),
            signal,
            severity,
            account: None,
            account_id: None,
            vendor: None,
            periods: Vec::new(),
            period_labels: Vec::new(),
            magnitude,
            explanation: explanation.into(),
            suggested_action: None,
        }
    }

    pub fn with_account(mut self, account: &Account) -> Self {
        self.account = Some(account.name.clone());
        self.account_id = Some(account.id);
        self
    }

    /// Names a ledger category that may not exist in the P&L.
    pub fn with_account_name(mut self, name: impl Into<String>) -> Self {
        self.account = Some(name.into());
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_periods(mut self, periods: &[&Period]) -> Self {
        self.periods = periods.iter().map(|p| p.index).collect();
        self.period_labels = periods.iter().map(|p| p.label.clone()).collect();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    /// The single implicated period, when there is exactly one.
    pub fn single_period(&self) -> Option<usize> {
        match self.periods.as_slice() {
            [p] => Some(*p),
            _ => None,
        }
    }
}

/// Non-fatal conditions encountered while running the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "PascalCase", tag = "notice")]
pub enum Notice {
    VendorAnalysisSkipped { reason: String },
    ChartOfAccountsIgnored { reason: String },
    LedgerAccountsUnmatched { accounts: Vec<String> },
    /// A `Total for X` line disagrees with the transactions parsed under X.
    LedgerTotalMismatch { account: String, stated: f64, parsed: f64 },
    /// Chart of Accounts P&L accounts with no General Ledger activity.
    ChartAccountsWithoutActivity { accounts: Vec<String> },
    UnattributedSpend { category: String, share: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kinds() {
        assert_eq!(Signal::NewActivity.kind(), FindingKind::VarianceFlag);
        assert_eq!(Signal::Trending(TrendDirection::Up).kind(), FindingKind::VarianceFlag);
        assert_eq!(Signal::UnusualTransaction.kind(), FindingKind::AnomalyFlag);
        assert_eq!(Signal::TopVendorShare.kind(), FindingKind::VendorConcentration);
        assert_eq!(Signal::Recurring.kind(), FindingKind::RecurringVendor);
        assert_eq!(Signal::OverheadAboveBenchmark.kind(), FindingKind::ExpenseStructure);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn test_finding_serialization() {
        let period = Period {
            index: 1,
            label: "Feb 2025".to_string(),
            column: 2,
        };
        let finding = Finding::new(
            Signal::PercentChange,
            Severity::Critical,
            Magnitude::with_percent(400.0, 2.0),
            "Utilities rose 200%",
        )
        .with_account_name("Utilities")
        .with_periods(&[&period]);

        let json = serde_json::to_string(&finding).unwrap();
        assert!(json.contains("\"VarianceFlag\""));
        assert!(json.contains("Feb 2025"));

        let back: Finding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, finding);
        assert_eq!(back.single_period(), Some(1));
    }

    #[test]
    fn test_period_month() {
        let period = Period {
            index: 0,
            label: "Mar 2025".to_string(),
            column: 1,
        };
        assert_eq!(period.month(), Some((2025, 3)));
    }
}
