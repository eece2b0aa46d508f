use std::collections::{HashMap, HashSet};

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{InsightError, Result};
use crate::schema::{Account, AccountId, AccountRole, AccountType, LineValue, Period, SummaryKind};
use crate::utils;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ReportMetadata {
    pub title: Option<String>,
    pub company: Option<String>,
    pub date_range: Option<String>,

    #[schemars(description = "Whether the export carried a trailing per-row Total column")]
    pub has_total_column: bool,
}

/// Accounts by periods, as parsed from one P&L export. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FinancialModel {
    metadata: ReportMetadata,
    periods: Vec<Period>,
    accounts: Vec<Account>,
    /// One row per account, one slot per period.
    values: Vec<Vec<LineValue>>,
}

/// Section results for one period, recomputed from leaf accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct PeriodSummary {
    pub period: usize,
    pub label: String,
    pub income: f64,
    pub cost_of_goods_sold: f64,
    pub gross_profit: f64,
    pub expenses: f64,
    pub net_operating_income: f64,
    pub other_income: f64,
    pub other_expense: f64,
    pub net_income: f64,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
}

impl FinancialModel {
    pub fn metadata(&self) -> &ReportMetadata {
        &self.metadata
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn period(&self, index: usize) -> Option<&Period> {
        self.periods.get(index)
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(id.0)
    }

    pub fn value(&self, id: AccountId, period: usize) -> LineValue {
        self.values.get(id.0).and_then(|row| row.get(period)).copied().flatten()
    }

    pub fn series(&self, id: AccountId) -> &[LineValue] {
        self.values.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn leaf_accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter().filter(|a| a.is_leaf())
    }

    pub fn has_section(&self, account_type: AccountType) -> bool {
        self.accounts.iter().any(|a| a.account_type == account_type)
    }

    /// Looks an account up by its display or source name.
    pub fn find_account(&self, name: &str) -> Option<&Account> {
        let name = name.trim();
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .or_else(|| self.accounts.iter().find(|a| a.source_name == name))
    }

    /// Resolves a ledger account name to a leaf account using the same
    /// matching rules as the Chart of Accounts.
    pub fn match_account(&self, name: &str) -> Option<&Account> {
        let candidates: Vec<(&str, AccountId)> = self
            .leaf_accounts()
            .flat_map(|a| [(a.name.as_str(), a.id), (a.source_name.as_str(), a.id)])
            .collect();
        utils::find_account_match(name, &candidates).and_then(|id| self.account(id))
    }

    pub fn section_total_account(&self, account_type: AccountType) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.role == AccountRole::SectionTotal && a.account_type == account_type)
    }

    pub fn summary_account(&self, kind: SummaryKind) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.role == AccountRole::Summary(kind))
    }

    /// Sum of the section's leaves for one period; blanks count as zero.
    pub fn leaf_sum(&self, account_type: AccountType, period: usize) -> f64 {
        self.leaf_accounts()
            .filter(|a| a.account_type == account_type)
            .filter_map(|a| self.value(a.id, period))
            .sum()
    }

    pub fn summaries(&self) -> Vec<PeriodSummary> {
        self.periods
            .iter()
            .map(|p| {
                let income = self.leaf_sum(AccountType::Income, p.index);
                let cogs = self.leaf_sum(AccountType::CostOfGoodsSold, p.index);
                let expenses = self.leaf_sum(AccountType::Expense, p.index);
                let other_income = self.leaf_sum(AccountType::OtherIncome, p.index);
                let other_expense = self.leaf_sum(AccountType::OtherExpense, p.index);

                let gross_profit = income - cogs;
                let net_operating_income = gross_profit - expenses;
                let net_income = net_operating_income + other_income - other_expense;
                let margin = |v: f64| (income.abs() > f64::EPSILON).then(|| v / income);

                PeriodSummary {
                    period: p.index,
                    label: p.label.clone(),
                    income,
                    cost_of_goods_sold: cogs,
                    gross_profit,
                    expenses,
                    net_operating_income,
                    other_income,
                    other_expense,
                    net_income,
                    gross_margin: margin(gross_profit),
                    operating_margin: margin(net_operating_income),
                    net_margin: margin(net_income),
                }
            })
            .collect()
    }
}

/// One parsed P&L row ready to become an account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub name: String,
    pub account_type: AccountType,
    pub role: AccountRole,
    pub depth: usize,
    pub parent: Option<String>,
    /// 1-based source row.
    pub row: usize,
    pub values: Vec<LineValue>,
}

#[derive(Debug, Clone)]
pub struct FinancialModelBuilder {
    metadata: ReportMetadata,
    periods: Vec<Period>,
    rows: Vec<AccountRow>,
    seen: HashSet<(String, AccountType)>,
}

impl FinancialModelBuilder {
    pub fn new(periods: Vec<Period>, metadata: ReportMetadata) -> Self {
        Self {
            metadata,
            periods,
            rows: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn add_account(&mut self, row: AccountRow) -> Result<AccountId> {
        if row.values.len() != self.periods.len() {
            return Err(InsightError::RowLengthMismatch {
                row: row.row,
                account: row.name,
                expected: self.periods.len(),
                found: row.values.len(),
            });
        }

        let key = (row.name.trim().to_lowercase(), row.account_type);
        if !self.seen.insert(key) {
            return Err(InsightError::DuplicateAccount {
                row: row.row,
                name: row.name,
                section: row.account_type.label().to_string(),
            });
        }

        let id = AccountId(self.rows.len());
        self.rows.push(row);
        Ok(id)
    }

    /// Names used in more than one section are qualified with the section,
    /// e.g. `Refunds (Income)`.
    pub fn build(self) -> FinancialModel {
        let mut name_counts: HashMap<String, usize> = HashMap::new();
        for row in &self.rows {
            *name_counts.entry(row.name.trim().to_lowercase()).or_default() += 1;
        }

        let mut accounts = Vec::with_capacity(self.rows.len());
        let mut values = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.into_iter().enumerate() {
            let source_name = row.name.trim().to_string();
            let shared = name_counts
                .get(&source_name.to_lowercase())
                .is_some_and(|count| *count > 1);
            let name = if shared {
                debug!("Qualifying '{}' with its section", source_name);
                format!("{} ({})", source_name, row.account_type.label())
            } else {
                source_name.clone()
            };

            accounts.push(Account {
                id: AccountId(i),
                name,
                source_name,
                account_type: row.account_type,
                role: row.role,
                depth: row.depth,
                parent: row.parent,
                row: row.row,
            });
            values.push(row.values);
        }

        FinancialModel {
            metadata: self.metadata,
            periods: self.periods,
            accounts,
            values,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn periods(labels: &[&str]) -> Vec<Period> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| Period {
                index: i,
                label: label.to_string(),
                column: i + 1,
            })
            .collect()
    }

    pub fn leaf(name: &str, account_type: AccountType, values: &[Option<f64>]) -> AccountRow {
        AccountRow {
            name: name.to_string(),
            account_type,
            role: AccountRole::Leaf,
            depth: 0,
            parent: None,
            row: 0,
            values: values.to_vec(),
        }
    }

    /// A model of leaf accounts over `Jan 2025`, `Feb 2025`, ...
    pub fn model_of(accounts: &[(&str, AccountType, &[Option<f64>])]) -> FinancialModel {
        const MONTHS: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        let width = accounts.first().map(|a| a.2.len()).unwrap_or(0);
        let labels: Vec<String> = (0..width)
            .map(|i| format!("{} {}", MONTHS[i % 12], 2025 + (i / 12)))
            .collect();
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();

        let mut builder = FinancialModelBuilder::new(periods(&label_refs), ReportMetadata::default());
        for (i, (name, ty, values)) in accounts.iter().enumerate() {
            let mut row = leaf(name, *ty, values);
            row.row = i + 2;
            builder.add_account(row).unwrap();
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_builder_rejects_wrong_width() {
        let mut builder =
            FinancialModelBuilder::new(periods(&["Jan 2025", "Feb 2025"]), ReportMetadata::default());
        let mut row = leaf("Utilities", AccountType::Expense, &[Some(1.0)]);
        row.row = 9;
        match builder.add_account(row) {
            Err(InsightError::RowLengthMismatch { row, expected, found, account }) => {
                assert_eq!((row, expected, found), (9, 2, 1));
                assert_eq!(account, "Utilities");
            }
            other => panic!("expected RowLengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_in_same_section_is_rejected() {
        let mut builder = FinancialModelBuilder::new(periods(&["Jan 2025"]), ReportMetadata::default());
        builder
            .add_account(leaf("Refunds", AccountType::Expense, &[Some(1.0)]))
            .unwrap();
        let err = builder
            .add_account(leaf("refunds", AccountType::Expense, &[Some(2.0)]))
            .unwrap_err();
        assert!(matches!(err, InsightError::DuplicateAccount { .. }));
    }

    #[test]
    fn test_duplicate_across_sections_is_qualified() {
        let model = model_of(&[
            ("Refunds", AccountType::Income, &[Some(10.0)]),
            ("Refunds", AccountType::Expense, &[Some(4.0)]),
            ("Rent", AccountType::Expense, &[Some(1000.0)]),
        ]);
        let names: Vec<&str> = model.accounts().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Refunds (Income)", "Refunds (Expense)", "Rent"]);
        assert!(model.find_account("Refunds (Expense)").is_some());
    }

    #[test]
    fn test_absent_values_are_preserved() {
        let model = model_of(&[("Consulting", AccountType::Income, &[None, Some(5000.0)])]);
        let id = model.accounts()[0].id;
        assert_eq!(model.value(id, 0), None);
        assert_eq!(model.value(id, 1), Some(5000.0));
        assert_eq!(model.value(id, 7), None);
        assert_eq!(model.leaf_sum(AccountType::Income, 0), 0.0);
    }

    #[test]
    fn test_summaries_recompute_sections() {
        let model = model_of(&[
            ("Sales", AccountType::Income, &[Some(10_000.0)]),
            ("Materials", AccountType::CostOfGoodsSold, &[Some(4_000.0)]),
            ("Rent", AccountType::Expense, &[Some(1_000.0)]),
            ("Interest Income", AccountType::OtherIncome, &[Some(50.0)]),
            ("Interest Expense", AccountType::OtherExpense, &[Some(150.0)]),
        ]);
        let summary = &model.summaries()[0];
        assert_eq!(summary.gross_profit, 6_000.0);
        assert_eq!(summary.net_operating_income, 5_000.0);
        assert_eq!(summary.net_income, 4_900.0);
        assert_eq!(summary.gross_margin, Some(0.6));
        assert_eq!(summary.operating_margin, Some(0.5));
        assert_eq!(summary.net_margin, Some(0.49));
    }

    #[test]
    fn test_margins_absent_without_income() {
        let model = model_of(&[("Rent", AccountType::Expense, &[Some(1_000.0)])]);
        let summary = &model.summaries()[0];
        assert_eq!(summary.net_operating_income, -1_000.0);
        assert_eq!(summary.operating_margin, None);
        assert_eq!(summary.gross_margin, None);
    }

    #[test]
    fn test_match_account_rules() {
        let model = model_of(&[
            ("Rent", AccountType::Expense, &[Some(1.0)]),
            ("Office Supplies", AccountType::Expense, &[Some(1.0)]),
        ]);
        assert_eq!(model.match_account("6000 Rent").map(|a| a.name.as_str()), Some("Rent"));
        assert_eq!(
            model.match_account("Office:office supplies").map(|a| a.name.as_str()),
            Some("Office Supplies")
        );
        assert!(model.match_account("Travel").is_none());
    }
}
