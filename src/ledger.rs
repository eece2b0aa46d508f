use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::chart_of_accounts::{ChartClass, ChartOfAccounts};
use crate::config::ParserConfig;
use crate::error::{InsightError, Result};
use crate::ingestion::RawTable;
use crate::model::FinancialModel;
use crate::schema::{Notice, Transaction};
use crate::utils::{self, AmountCell};

const TABLE_NAME: &str = "General Ledger";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Date,
    Account,
    Vendor,
    Description,
    Amount,
    Debit,
    Credit,
}

/// Header keyword → column role. Earlier entries win.
const COLUMN_KEYWORDS: &[(&str, ColumnRole)] = &[
    ("date", ColumnRole::Date),
    ("transaction date", ColumnRole::Date),
    ("account", ColumnRole::Account),
    ("distribution account", ColumnRole::Account),
    ("account name", ColumnRole::Account),
    ("account full name", ColumnRole::Account),
    ("vendor", ColumnRole::Vendor),
    ("payee", ColumnRole::Vendor),
    ("name", ColumnRole::Vendor),
    ("customer/vendor", ColumnRole::Vendor),
    ("vendor name", ColumnRole::Vendor),
    ("memo/description", ColumnRole::Description),
    ("memo", ColumnRole::Description),
    ("description", ColumnRole::Description),
    ("amount", ColumnRole::Amount),
    ("debit", ColumnRole::Debit),
    ("credit", ColumnRole::Credit),
];

#[derive(Debug, Default)]
struct LedgerColumns {
    date: Option<usize>,
    account: Option<usize>,
    vendor: Option<usize>,
    description: Option<usize>,
    amount: Option<usize>,
    debit: Option<usize>,
    credit: Option<usize>,
}

impl LedgerColumns {
    fn from_header(row: &[String]) -> Self {
        let mut columns = Self::default();
        for (i, cell) in row.iter().enumerate() {
            let label = cell.trim().to_lowercase();
            let Some(role) = COLUMN_KEYWORDS
                .iter()
                .find(|(keyword, _)| *keyword == label)
                .map(|(_, role)| *role)
            else {
                continue;
            };
            let slot = match role {
                ColumnRole::Date => &mut columns.date,
                ColumnRole::Account => &mut columns.account,
                ColumnRole::Vendor => &mut columns.vendor,
                ColumnRole::Description => &mut columns.description,
                ColumnRole::Amount => &mut columns.amount,
                ColumnRole::Debit => &mut columns.debit,
                ColumnRole::Credit => &mut columns.credit,
            };
            slot.get_or_insert(i);
        }
        columns
    }

    fn is_header(&self) -> bool {
        self.date.is_some() && (self.amount.is_some() || (self.debit.is_some() && self.credit.is_some()))
    }
}

/// A `Total for X` line and the amount the export states for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatedTotal {
    pub account: String,
    pub amount: f64,
    pub row: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLedger {
    pub transactions: Vec<Transaction>,
    pub stated_totals: Vec<StatedTotal>,
}

/// Reads a General Ledger export into transactions.
///
/// A flat export fills an account column on every row. A grouped export puts
/// the account name alone on a row with no date, and the dated rows below it
/// belong to that account. Some exports have an account column that is only
/// filled on those heading rows; those read as grouped.
pub struct GeneralLedgerParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> GeneralLedgerParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    pub fn parse(&self, table: &RawTable) -> Result<Vec<Transaction>> {
        self.parse_with_totals(table).map(|ledger| ledger.transactions)
    }

    pub fn parse_with_totals(&self, table: &RawTable) -> Result<ParsedLedger> {
        if table.is_empty() {
            return Err(InsightError::EmptyInput("the General Ledger is empty".to_string()));
        }
        if table.len() > self.config.max_rows {
            return Err(InsightError::InputTooLarge {
                kind: "row".to_string(),
                limit: self.config.max_rows,
                actual: table.len(),
            });
        }

        let (header_row, columns) = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i, LedgerColumns::from_header(row)))
            .find(|(_, columns)| columns.is_header())
            .ok_or_else(|| InsightError::MissingColumn {
                table: TABLE_NAME.to_string(),
                column: "Date and Amount".to_string(),
            })?;

        let Some(date_col) = columns.date else {
            return Err(InsightError::MissingColumn {
                table: TABLE_NAME.to_string(),
                column: "Date".to_string(),
            });
        };
        let grouped = columns.account.is_none();
        if grouped && date_col == 0 {
            return Err(InsightError::MissingColumn {
                table: TABLE_NAME.to_string(),
                column: "Account".to_string(),
            });
        }
        debug!(
            "General Ledger header on row {} ({} layout)",
            header_row + 1,
            if grouped { "grouped" } else { "flat" }
        );

        let mut transactions = Vec::new();
        let mut stated_totals = Vec::new();
        let mut current_account: Option<String> = None;

        for i in header_row + 1..table.len() {
            let row = i + 1;
            let first = table.cell(i, 0);
            let date_cell = table.cell(i, date_col);

            if is_total_label(first) || is_total_label(date_cell) {
                if let Some(account) = stated_total_account(first) {
                    // an unreadable total only loses the cross-check
                    if let Ok(Some(amount)) = self.read_amount(table, i, &columns) {
                        stated_totals.push(StatedTotal { account, amount, row });
                    }
                }
                debug!("Skipping total row {}", row);
                continue;
            }

            if date_cell.is_empty() || is_beginning_balance(date_cell) {
                if !first.is_empty() && !is_beginning_balance(first) {
                    current_account = Some(first.to_string());
                }
                continue;
            }
            if (0..table.rows[i].len()).any(|c| is_beginning_balance(table.cell(i, c))) {
                continue;
            }

            let named = columns.account.map(|c| table.cell(i, c)).unwrap_or("");
            let account = if !named.is_empty() {
                named.to_string()
            } else {
                match &current_account {
                    Some(name) => name.clone(),
                    None => {
                        debug!("Row {} has no account, skipping", row);
                        continue;
                    }
                }
            };

            let Some(amount) = self.read_amount(table, i, &columns)? else {
                debug!("Row {} has no amount, skipping", row);
                continue;
            };

            let date = utils::parse_transaction_date(date_cell).ok_or_else(|| InsightError::InvalidDate {
                row,
                value: date_cell.to_string(),
            })?;

            transactions.push(Transaction {
                date,
                account,
                account_type: None,
                vendor: optional_text(table, i, columns.vendor),
                amount,
                description: optional_text(table, i, columns.description),
                row,
            });
        }

        info!(
            "Parsed {} General Ledger transactions ({} stated totals)",
            transactions.len(),
            stated_totals.len()
        );
        Ok(ParsedLedger {
            transactions,
            stated_totals,
        })
    }

    /// `Ok(None)` when the row carries no amount at all.
    fn read_amount(&self, table: &RawTable, i: usize, columns: &LedgerColumns) -> Result<Option<f64>> {
        let cell_amount = |column: usize| -> Result<Option<f64>> {
            let raw = table.cell(i, column);
            match utils::parse_amount(raw) {
                AmountCell::Blank => Ok(None),
                AmountCell::Value(v) => Ok(Some(v)),
                AmountCell::NotNumeric => Err(InsightError::InvalidNumber {
                    row: i + 1,
                    column: column + 1,
                    value: raw.to_string(),
                }),
            }
        };

        if let Some(column) = columns.amount {
            return cell_amount(column);
        }
        match (columns.debit, columns.credit) {
            (Some(debit), Some(credit)) => {
                let debit = cell_amount(debit)?;
                let credit = cell_amount(credit)?;
                if debit.is_none() && credit.is_none() {
                    return Ok(None);
                }
                Ok(Some(debit.unwrap_or(0.0) - credit.unwrap_or(0.0)))
            }
            _ => Ok(None),
        }
    }
}

fn is_total_label(cell: &str) -> bool {
    let lower = cell.to_lowercase();
    lower == "total" || lower.starts_with("total for ") || lower.starts_with("total ")
}

/// `Total for Rent with sub-accounts` → `Rent`.
fn stated_total_account(cell: &str) -> Option<String> {
    const PREFIX: &str = "total for ";
    let head = cell.get(..PREFIX.len())?;
    if !head.eq_ignore_ascii_case(PREFIX) {
        return None;
    }
    let name = cell[PREFIX.len()..].trim();
    let name = name.strip_suffix(" with sub-accounts").unwrap_or(name).trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn is_beginning_balance(cell: &str) -> bool {
    cell.eq_ignore_ascii_case("beginning balance")
}

fn optional_text(table: &RawTable, row: usize, column: Option<usize>) -> Option<String> {
    let text = table.cell(row, column?);
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(text.to_string())
    }
}

pub fn parse_general_ledger(table: &RawTable, config: &ParserConfig) -> Result<Vec<Transaction>> {
    GeneralLedgerParser::new(config).parse(table)
}

/// Compares every `Total for X` line with the sum of the transactions parsed
/// for X and its `X:child` sub-accounts. Each disagreement beyond `tolerance`
/// becomes a notice.
pub fn verify_stated_totals(ledger: &ParsedLedger, tolerance: f64) -> Vec<Notice> {
    let mut notices = Vec::new();
    for stated in &ledger.stated_totals {
        let wanted = stated.account.to_lowercase();
        let child_prefix = format!("{}:", wanted);
        let path_suffix = format!(":{}", wanted);
        let parsed: f64 = ledger
            .transactions
            .iter()
            .filter(|t| {
                let account = t.account.to_lowercase();
                account == wanted || account.starts_with(&child_prefix) || account.ends_with(&path_suffix)
            })
            .map(|t| t.amount)
            .sum();

        if (parsed - stated.amount).abs() > tolerance {
            warn!(
                "General Ledger row {}: Total for {} states {:.2}, transactions sum to {:.2}",
                stated.row, stated.account, stated.amount, parsed
            );
            notices.push(Notice::LedgerTotalMismatch {
                account: stated.account.clone(),
                stated: stated.amount,
                parsed,
            });
        }
    }
    notices
}

/// Transactions ready for vendor analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedLedger {
    pub transactions: Vec<Transaction>,
    /// Ledger accounts with no P&L counterpart, sorted.
    pub unmatched_accounts: Vec<String>,
    pub balance_sheet_dropped: usize,
}

/// Attaches an account type to every transaction and renames ledger accounts
/// to the P&L account they match. Accounts the Chart of Accounts places on the
/// balance sheet are dropped.
pub fn classify_transactions(
    transactions: Vec<Transaction>,
    model: &FinancialModel,
    chart: Option<&ChartOfAccounts>,
) -> ClassifiedLedger {
    let mut unmatched = BTreeSet::new();
    let mut kept = Vec::with_capacity(transactions.len());
    let mut balance_sheet_dropped = 0;

    for mut txn in transactions {
        let class = chart.and_then(|c| c.lookup(&txn.account)).map(|entry| entry.class);
        if class == Some(ChartClass::BalanceSheet) {
            balance_sheet_dropped += 1;
            continue;
        }

        match model.match_account(&txn.account) {
            Some(account) => {
                txn.account_type = class
                    .and_then(|c| c.account_type())
                    .or(Some(account.account_type));
                txn.account = account.name.clone();
            }
            None => {
                txn.account_type = class.and_then(|c| c.account_type());
                unmatched.insert(txn.account.clone());
            }
        }
        kept.push(txn);
    }

    if balance_sheet_dropped > 0 {
        debug!("Dropped {} balance sheet transactions", balance_sheet_dropped);
    }
    ClassifiedLedger {
        transactions: kept,
        unmatched_accounts: unmatched.into_iter().collect(),
        balance_sheet_dropped,
    }
}
