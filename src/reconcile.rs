use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::FinancialModel;
use crate::rules::{classify_row, RowClass};
use crate::schema::{Account, AccountId, AccountRole, AccountType, SummaryKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ReconciliationScope {
    Section,
    Group,
    NetIncome,
}

/// A subtotal row whose reported value disagrees with its recomputation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ReconciliationIssue {
    pub scope: ReconciliationScope,
    pub account: String,
    pub account_id: AccountId,
    pub period: usize,
    pub reported: f64,
    pub recomputed: f64,
    pub difference: f64,
}

pub struct Reconciler<'a> {
    model: &'a FinancialModel,
}

impl<'a> Reconciler<'a> {
    pub fn new(model: &'a FinancialModel) -> Self {
        Self { model }
    }

    /// Checks every subtotal in every period. Blank cells count as zero.
    pub fn verify(&self, tolerance: f64) -> Vec<ReconciliationIssue> {
        let mut issues = Vec::new();

        for account in self.model.accounts() {
            match account.role {
                AccountRole::SectionTotal => {
                    self.compare(account, ReconciliationScope::Section, tolerance, &mut issues, |p| {
                        self.model.leaf_sum(account.account_type, p)
                    })
                }
                AccountRole::GroupTotal => {
                    let Some(group) = group_name(account) else {
                        continue;
                    };
                    let children: Vec<&Account> = self
                        .model
                        .accounts()
                        .iter()
                        .filter(|a| {
                            a.account_type == account.account_type
                                && matches!(a.role, AccountRole::Leaf | AccountRole::GroupTotal)
                                && a.id != account.id
                                && a.parent.as_deref().is_some_and(|p| p.eq_ignore_ascii_case(&group))
                        })
                        .collect();
                    if children.is_empty() {
                        continue;
                    }
                    self.compare(account, ReconciliationScope::Group, tolerance, &mut issues, |p| {
                        children.iter().filter_map(|c| self.model.value(c.id, p)).sum()
                    })
                }
                _ => {}
            }
        }

        if let Some(bottom_line) = self.bottom_line() {
            self.compare(bottom_line, ReconciliationScope::NetIncome, tolerance, &mut issues, |p| {
                self.recomputed_net_income(p)
            });
        }

        for issue in &issues {
            warn!(
                "'{}' in period {} reports {:.2} but its components sum to {:.2}",
                issue.account, issue.period, issue.reported, issue.recomputed
            );
        }
        issues
    }

    /// Net Income, or Net Operating Income when the report stops there.
    fn bottom_line(&self) -> Option<&'a Account> {
        if let Some(net) = self.model.summary_account(SummaryKind::NetIncome) {
            return Some(net);
        }
        let has_other = self.model.has_section(AccountType::OtherIncome)
            || self.model.has_section(AccountType::OtherExpense);
        if has_other {
            return None;
        }
        self.model.summary_account(SummaryKind::NetOperatingIncome)
    }

    fn recomputed_net_income(&self, period: usize) -> f64 {
        [
            AccountType::Income,
            AccountType::CostOfGoodsSold,
            AccountType::Expense,
            AccountType::OtherIncome,
            AccountType::OtherExpense,
        ]
        .iter()
        .map(|ty| ty.net_income_sign() * self.model.leaf_sum(*ty, period))
        .sum()
    }

    fn compare(
        &self,
        account: &Account,
        scope: ReconciliationScope,
        tolerance: f64,
        issues: &mut Vec<ReconciliationIssue>,
        recompute: impl Fn(usize) -> f64,
    ) {
        for period in self.model.periods() {
            let reported = self.model.value(account.id, period.index).unwrap_or(0.0);
            let recomputed = recompute(period.index);
            let difference = reported - recomputed;
            if difference.abs() > tolerance {
                issues.push(ReconciliationIssue {
                    scope,
                    account: account.name.clone(),
                    account_id: account.id,
                    period: period.index,
                    reported,
                    recomputed,
                    difference,
                });
            }
        }
    }
}

/// The group a "Total for ..." account closes.
fn group_name(account: &Account) -> Option<String> {
    match classify_row(&account.source_name, true) {
        RowClass::GroupTotal(name) => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::ingestion::RawTable;
    use crate::parser::parse_profit_and_loss;

    fn model(csv: &str) -> FinancialModel {
        let config = ParserConfig::default();
        let table = RawTable::from_csv_str(csv, &config).unwrap();
        parse_profit_and_loss(&table, &config).unwrap()
    }

    #[test]
    fn test_balanced_report_has_no_issues() {
        let model = model(
            "\
Account,Jan 2025,Feb 2025
Income,,
Sales,1000,1200
Total Income,1000,1200
Expenses,,
Rent,300,300
Office,,
Supplies,50,70
Postage,10,10
Total for Office,60,80
Total Expenses,360,380
Net Income,640,820
",
        );
        assert!(Reconciler::new(&model).verify(0.01).is_empty());
    }

    #[test]
    fn test_mismatches_are_reported_per_scope() {
        let model = model(
            "\
Account,Jan 2025,Feb 2025
Income,,
Sales,1000,1200
Total Income,1000,1250
Expenses,,
Office,,
Supplies,50,70
Total for Office,55,70
Total Expenses,50,70
Net Income,950,1100
",
        );
        let issues = Reconciler::new(&model).verify(0.01);

        let section: Vec<_> = issues
            .iter()
            .filter(|i| i.scope == ReconciliationScope::Section)
            .collect();
        assert_eq!(section.len(), 1);
        assert_eq!(section[0].period, 1);
        assert_eq!(section[0].difference, 50.0);

        let group: Vec<_> = issues
            .iter()
            .filter(|i| i.scope == ReconciliationScope::Group)
            .collect();
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].account, "Total for Office");

        // 1200 - 70 = 1130, reported 1100
        let net: Vec<_> = issues
            .iter()
            .filter(|i| i.scope == ReconciliationScope::NetIncome)
            .collect();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].recomputed, 1130.0);
    }

    #[test]
    fn test_operating_income_used_without_net_income_row() {
        let model = model(
            "\
Account,Jan 2025
Income,
Sales,1000
Expenses,
Rent,300
Net Operating Income,600
",
        );
        let issues = Reconciler::new(&model).verify(0.01);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].scope, ReconciliationScope::NetIncome);
        assert_eq!(issues[0].recomputed, 700.0);
    }

    #[test]
    fn test_rounding_within_tolerance() {
        let model = model(
            "\
Account,Jan 2025
Income,
Sales,1000.004
Total Income,1000
",
        );
        assert!(Reconciler::new(&model).verify(0.01).is_empty());
    }
}
