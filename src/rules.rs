//! Row classification for P&L exports.
//!
//! Every label is normalized (trimmed, lowercased, whitespace collapsed) and
//! checked against [`ROW_RULES`] in order; the first matching rule wins.
//! Labels that match nothing are "Total ..." group closers when they carry the
//! prefix, otherwise plain accounts.

use crate::schema::{AccountType, SummaryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    Exact(&'static str),
    Prefix(&'static str),
    Contains(&'static str),
}

impl Matcher {
    fn matches(&self, label: &str) -> bool {
        match self {
            Self::Exact(s) => label == *s,
            Self::Prefix(s) => label.starts_with(s),
            Self::Contains(s) => label.contains(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleClass {
    Metadata,
    SectionHeader(AccountType),
    SectionTotal(AccountType),
    Summary(SummaryKind),
}

#[derive(Debug, Clone, Copy)]
pub struct RowRule {
    pub matcher: Matcher,
    /// Only applies to label-only rows (no values in any period).
    pub requires_blank: bool,
    pub class: RuleClass,
}

const fn rule(matcher: Matcher, requires_blank: bool, class: RuleClass) -> RowRule {
    RowRule {
        matcher,
        requires_blank,
        class,
    }
}

use AccountType::*;
use Matcher::*;
use RuleClass::*;

pub const ROW_RULES: &[RowRule] = &[
    rule(Exact("accrual basis"), false, Metadata),
    rule(Exact("cash basis"), false, Metadata),
    rule(Prefix("accrual basis "), false, Metadata),
    rule(Prefix("cash basis "), false, Metadata),
    // section totals
    rule(Exact("total income"), false, SectionTotal(Income)),
    rule(Exact("total revenue"), false, SectionTotal(Income)),
    rule(Exact("total for income"), false, SectionTotal(Income)),
    rule(Exact("total cost of goods sold"), false, SectionTotal(CostOfGoodsSold)),
    rule(Exact("total for cost of goods sold"), false, SectionTotal(CostOfGoodsSold)),
    rule(Exact("total cost of sales"), false, SectionTotal(CostOfGoodsSold)),
    rule(Exact("total cogs"), false, SectionTotal(CostOfGoodsSold)),
    rule(Exact("total expenses"), false, SectionTotal(Expense)),
    rule(Exact("total for expenses"), false, SectionTotal(Expense)),
    rule(Exact("total expense"), false, SectionTotal(Expense)),
    rule(Exact("total operating expenses"), false, SectionTotal(Expense)),
    rule(Exact("total other income"), false, SectionTotal(OtherIncome)),
    rule(Exact("total for other income"), false, SectionTotal(OtherIncome)),
    rule(Exact("total other expenses"), false, SectionTotal(OtherExpense)),
    rule(Exact("total other expense"), false, SectionTotal(OtherExpense)),
    rule(Exact("total for other expenses"), false, SectionTotal(OtherExpense)),
    rule(Exact("total for other expense"), false, SectionTotal(OtherExpense)),
    rule(Exact("total other costs"), false, SectionTotal(OtherExpense)),
    // summaries
    rule(Exact("gross profit"), false, Summary(SummaryKind::GrossProfit)),
    rule(Exact("gross margin"), false, Summary(SummaryKind::GrossProfit)),
    rule(Exact("net operating income"), false, Summary(SummaryKind::NetOperatingIncome)),
    rule(Exact("operating income"), false, Summary(SummaryKind::NetOperatingIncome)),
    rule(Exact("net other income"), false, Summary(SummaryKind::NetOtherIncome)),
    rule(Exact("total other income/expense"), false, Summary(SummaryKind::NetOtherIncome)),
    rule(Exact("total other income (expense)"), false, Summary(SummaryKind::NetOtherIncome)),
    rule(Exact("net income"), false, Summary(SummaryKind::NetIncome)),
    rule(Exact("net profit"), false, Summary(SummaryKind::NetIncome)),
    rule(Exact("net income (loss)"), false, Summary(SummaryKind::NetIncome)),
    // section headers
    rule(Exact("income"), true, SectionHeader(Income)),
    rule(Exact("revenue"), true, SectionHeader(Income)),
    rule(Exact("ordinary income/expenses"), true, Metadata),
    rule(Exact("cost of goods sold"), true, SectionHeader(CostOfGoodsSold)),
    rule(Exact("cost of sales"), true, SectionHeader(CostOfGoodsSold)),
    rule(Exact("cogs"), true, SectionHeader(CostOfGoodsSold)),
    rule(Exact("expenses"), true, SectionHeader(Expense)),
    rule(Exact("expense"), true, SectionHeader(Expense)),
    rule(Exact("operating expenses"), true, SectionHeader(Expense)),
    rule(Exact("other income"), true, SectionHeader(OtherIncome)),
    rule(Exact("other expenses"), true, SectionHeader(OtherExpense)),
    rule(Exact("other expense"), true, SectionHeader(OtherExpense)),
    rule(Exact("other costs"), true, SectionHeader(OtherExpense)),
    rule(Contains("other income/expense"), true, Metadata),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowClass {
    Metadata,
    SectionHeader(AccountType),
    SectionTotal(AccountType),
    Summary(SummaryKind),
    /// Closes the group with this (source-cased) name.
    GroupTotal(String),
    Account,
}

pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Strips "Total for " / "Total " and a trailing " with sub-accounts".
fn group_total_name(label: &str) -> Option<String> {
    const SUFFIX: &str = " with sub-accounts";

    let trimmed = label.trim();
    let rest = ["total for ", "total "].iter().find_map(|prefix| {
        let head = trimmed.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| trimmed[prefix.len()..].trim())
    })?;

    let name = match rest
        .len()
        .checked_sub(SUFFIX.len())
        .and_then(|cut| Some((cut, rest.get(cut..)?)))
    {
        Some((cut, tail)) if tail.eq_ignore_ascii_case(SUFFIX) => rest[..cut].trim(),
        _ => rest,
    };
    (!name.is_empty()).then(|| name.to_string())
}

pub fn classify_row(label: &str, has_values: bool) -> RowClass {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return RowClass::Metadata;
    }

    for rule in ROW_RULES {
        if rule.requires_blank && has_values {
            continue;
        }
        if rule.matcher.matches(&normalized) {
            return match rule.class {
                RuleClass::Metadata => RowClass::Metadata,
                RuleClass::SectionHeader(ty) => RowClass::SectionHeader(ty),
                RuleClass::SectionTotal(ty) => RowClass::SectionTotal(ty),
                RuleClass::Summary(kind) => RowClass::Summary(kind),
            };
        }
    }

    match group_total_name(label) {
        Some(name) => RowClass::GroupTotal(name),
        None => RowClass::Account,
    }
}
