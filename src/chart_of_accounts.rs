use std::collections::BTreeSet;

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{InsightError, Result};
use crate::ingestion::RawTable;
use crate::schema::{AccountType, Transaction};
use crate::utils;

/// What the Chart of Accounts says an account is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase", tag = "class", content = "account_type")]
pub enum ChartClass {
    ProfitAndLoss(AccountType),
    BalanceSheet,
    Unknown,
}

impl ChartClass {
    pub fn account_type(&self) -> Option<AccountType> {
        match self {
            Self::ProfitAndLoss(ty) => Some(*ty),
            Self::BalanceSheet | Self::Unknown => None,
        }
    }
}

use AccountType::*;

/// Platform type labels, matched case-insensitively.
const TYPE_MAP: &[(&str, ChartClass)] = &[
    ("bank", ChartClass::BalanceSheet),
    ("cash", ChartClass::BalanceSheet),
    ("cash and cash equivalents", ChartClass::BalanceSheet),
    ("accounts receivable", ChartClass::BalanceSheet),
    ("accounts receivable (a/r)", ChartClass::BalanceSheet),
    ("a/r", ChartClass::BalanceSheet),
    ("other current asset", ChartClass::BalanceSheet),
    ("other current assets", ChartClass::BalanceSheet),
    ("current assets", ChartClass::BalanceSheet),
    ("fixed asset", ChartClass::BalanceSheet),
    ("fixed assets", ChartClass::BalanceSheet),
    ("other asset", ChartClass::BalanceSheet),
    ("other assets", ChartClass::BalanceSheet),
    ("long-term assets", ChartClass::BalanceSheet),
    ("non-current assets", ChartClass::BalanceSheet),
    ("property, plant and equipment", ChartClass::BalanceSheet),
    ("inventory", ChartClass::BalanceSheet),
    ("prepaid expenses", ChartClass::BalanceSheet),
    ("accounts payable", ChartClass::BalanceSheet),
    ("accounts payable (a/p)", ChartClass::BalanceSheet),
    ("a/p", ChartClass::BalanceSheet),
    ("credit card", ChartClass::BalanceSheet),
    ("other current liability", ChartClass::BalanceSheet),
    ("other current liabilities", ChartClass::BalanceSheet),
    ("current liabilities", ChartClass::BalanceSheet),
    ("long term liability", ChartClass::BalanceSheet),
    ("long term liabilities", ChartClass::BalanceSheet),
    ("long-term liabilities", ChartClass::BalanceSheet),
    ("non-current liabilities", ChartClass::BalanceSheet),
    ("payroll liabilities", ChartClass::BalanceSheet),
    ("sales tax payable", ChartClass::BalanceSheet),
    ("loan", ChartClass::BalanceSheet),
    ("line of credit", ChartClass::BalanceSheet),
    ("equity", ChartClass::BalanceSheet),
    ("owner's equity", ChartClass::BalanceSheet),
    ("shareholders' equity", ChartClass::BalanceSheet),
    ("retained earnings", ChartClass::BalanceSheet),
    ("opening balance equity", ChartClass::BalanceSheet),
    ("income", ChartClass::ProfitAndLoss(Income)),
    ("revenue", ChartClass::ProfitAndLoss(Income)),
    ("sales", ChartClass::ProfitAndLoss(Income)),
    ("service revenue", ChartClass::ProfitAndLoss(Income)),
    ("sales revenue", ChartClass::ProfitAndLoss(Income)),
    ("other income", ChartClass::ProfitAndLoss(OtherIncome)),
    ("interest income", ChartClass::ProfitAndLoss(OtherIncome)),
    ("dividend income", ChartClass::ProfitAndLoss(OtherIncome)),
    ("cost of goods sold", ChartClass::ProfitAndLoss(CostOfGoodsSold)),
    ("cogs", ChartClass::ProfitAndLoss(CostOfGoodsSold)),
    ("cost of sales", ChartClass::ProfitAndLoss(CostOfGoodsSold)),
    ("cost of revenue", ChartClass::ProfitAndLoss(CostOfGoodsSold)),
    ("direct costs", ChartClass::ProfitAndLoss(CostOfGoodsSold)),
    ("expense", ChartClass::ProfitAndLoss(Expense)),
    ("expenses", ChartClass::ProfitAndLoss(Expense)),
    ("operating expense", ChartClass::ProfitAndLoss(Expense)),
    ("operating expenses", ChartClass::ProfitAndLoss(Expense)),
    ("general & administrative", ChartClass::ProfitAndLoss(Expense)),
    ("g&a", ChartClass::ProfitAndLoss(Expense)),
    ("selling expense", ChartClass::ProfitAndLoss(Expense)),
    ("depreciation", ChartClass::ProfitAndLoss(Expense)),
    ("amortization", ChartClass::ProfitAndLoss(Expense)),
    ("other expense", ChartClass::ProfitAndLoss(OtherExpense)),
    ("other expenses", ChartClass::ProfitAndLoss(OtherExpense)),
    ("interest expense", ChartClass::ProfitAndLoss(OtherExpense)),
];

pub fn classify_platform_type(label: &str) -> ChartClass {
    let wanted = label.trim().to_lowercase();
    TYPE_MAP
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, class)| *class)
        .unwrap_or(ChartClass::Unknown)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AccountEntry {
    pub name: String,
    pub number: Option<String>,
    #[schemars(description = "Type label exactly as exported")]
    pub platform_type: String,
    pub class: ChartClass,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ChartOfAccounts {
    pub accounts: Vec<AccountEntry>,
}

const HEADER_SEARCH_ROWS: usize = 15;
const TABLE_NAME: &str = "Chart of Accounts";

struct Columns {
    name: usize,
    account_type: usize,
    number: Option<usize>,
}

fn find_columns(header: &[String]) -> Option<Columns> {
    let cells: Vec<String> = header.iter().map(|c| c.trim().to_lowercase()).collect();
    let position = |pred: &dyn Fn(&str) -> bool| cells.iter().position(|c| pred(c.as_str()));

    let number = ["account #", "account number", "acct #", "number", "no."]
        .iter()
        .find_map(|candidate| position(&|c: &str| c.contains(*candidate)));

    let name = ["full name", "account name", "name"]
        .iter()
        .find_map(|candidate| {
            cells
                .iter()
                .enumerate()
                .position(|(i, c)| c.contains(*candidate) && Some(i) != number)
        })
        .or_else(|| {
            cells
                .iter()
                .enumerate()
                .position(|(i, c)| c.contains("account") && !c.contains('#') && Some(i) != number)
        })?;

    let account_type = position(&|c: &str| c == "type" || c == "account type")
        .or_else(|| position(&|c: &str| c.contains("type") && !c.contains("detail")))?;

    Some(Columns {
        name,
        account_type,
        number,
    })
}

impl ChartOfAccounts {
    /// Reads a Chart of Accounts export. The header is searched for in the
    /// first 15 rows.
    pub fn from_table(table: &RawTable) -> Result<Self> {
        let (header_row, columns) = table
            .rows
            .iter()
            .take(HEADER_SEARCH_ROWS)
            .enumerate()
            .find_map(|(i, row)| find_columns(row).map(|c| (i, c)))
            .ok_or_else(|| InsightError::MissingColumn {
                table: TABLE_NAME.to_string(),
                column: "Name and Type".to_string(),
            })?;
        debug!("Chart of Accounts header on row {}", header_row + 1);

        let mut accounts = Vec::new();
        for i in header_row + 1..table.len() {
            let name = table.cell(i, columns.name);
            let platform_type = table.cell(i, columns.account_type);
            if name.is_empty() || platform_type.is_empty() || name.eq_ignore_ascii_case("nan") {
                continue;
            }
            let number = columns
                .number
                .map(|c| table.cell(i, c))
                .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("nan"))
                .map(str::to_string);

            accounts.push(AccountEntry {
                name: name.to_string(),
                number,
                platform_type: platform_type.to_string(),
                class: classify_platform_type(platform_type),
            });
        }

        if accounts.is_empty() {
            return Err(InsightError::EmptyInput(
                "the Chart of Accounts has no accounts below its header".to_string(),
            ));
        }
        info!("Loaded {} accounts from the Chart of Accounts", accounts.len());
        Ok(Self { accounts })
    }

    /// Finds an account by exact name, a number-prefixed variant
    /// (`1000 Rent`, `1000-Rent`), a colon-path suffix or case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<&AccountEntry> {
        let numbered: Vec<String> = self
            .accounts
            .iter()
            .map(|a| match &a.number {
                Some(number) => format!("{} {}", number, a.name),
                None => a.name.clone(),
            })
            .collect();
        let mut candidates: Vec<(&str, usize)> = self
            .accounts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.as_str(), i))
            .collect();
        candidates.extend(numbered.iter().enumerate().map(|(i, n)| (n.as_str(), i)));

        utils::find_account_match(name, &candidates).and_then(|i| self.accounts.get(i))
    }

    pub fn account_type(&self, name: &str) -> Option<AccountType> {
        self.lookup(name).and_then(|entry| entry.class.account_type())
    }

    /// P&L accounts no transaction posts to, sorted. A parent counts as
    /// active when one of its `Parent:Child` accounts is.
    pub fn accounts_without_activity(&self, transactions: &[Transaction]) -> Vec<String> {
        let active: BTreeSet<String> = transactions
            .iter()
            .map(|t| match self.lookup(&t.account) {
                Some(entry) => entry.name.to_lowercase(),
                None => t.account.to_lowercase(),
            })
            .collect();

        let mut idle: Vec<String> = self
            .accounts
            .iter()
            .filter(|a| matches!(a.class, ChartClass::ProfitAndLoss(_)))
            .filter(|a| {
                let name = a.name.to_lowercase();
                let parent = format!("{}:", name);
                !active.contains(&name) && !active.iter().any(|n| n.starts_with(&parent))
            })
            .map(|a| a.name.clone())
            .collect();
        idle.sort();
        idle.dedup();
        idle
    }

    pub fn total_accounts(&self) -> usize {
        self.accounts.len()
    }

    fn section_label(class: &ChartClass) -> &'static str {
        match class {
            ChartClass::ProfitAndLoss(ty) => ty.label(),
            ChartClass::BalanceSheet => "Balance Sheet",
            ChartClass::Unknown => "Unclassified",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["Section", "Account Number", "Account Name", "Account Type"])?;
        for account in &self.accounts {
            writer.write_record([
                Self::section_label(&account.class),
                account.number.as_deref().unwrap_or(""),
                account.name.as_str(),
                account.platform_type.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| InsightError::IoError(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        output.push_str("# Chart of Accounts\n\n");

        let sections = [
            ChartClass::ProfitAndLoss(Income),
            ChartClass::ProfitAndLoss(CostOfGoodsSold),
            ChartClass::ProfitAndLoss(Expense),
            ChartClass::ProfitAndLoss(OtherIncome),
            ChartClass::ProfitAndLoss(OtherExpense),
            ChartClass::BalanceSheet,
            ChartClass::Unknown,
        ];
        for section in &sections {
            let members: Vec<&AccountEntry> =
                self.accounts.iter().filter(|a| a.class == *section).collect();
            if members.is_empty() {
                continue;
            }
            output.push_str(&format!("## {}\n\n", Self::section_label(section)));
            for account in members {
                match &account.number {
                    Some(number) => output.push_str(&format!("- {} {}\n", number, account.name)),
                    None => output.push_str(&format!("- {}\n", account.name)),
                }
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;

    const EXPORT: &str = "\
Acme Landscaping LLC,,,
Account List,,,
,,,
Account #,Full name,Type,Detail type
1000,Checking,Bank,Checking
4000,Sales,Income,Sales of Product Income
5000,Materials,Cost of Goods Sold,Supplies & Materials - COGS
6000,Rent,Expenses,Rent or Lease of Buildings
6100,Office:Supplies,Expenses,Office/General Administrative Expenses
7000,Interest Income,Other Income,Interest Earned
8000,Mystery,Something New,Other
";

    fn chart() -> ChartOfAccounts {
        let table = RawTable::from_csv_str(EXPORT, &ParserConfig::default()).unwrap();
        ChartOfAccounts::from_table(&table).unwrap()
    }

    fn posting(account: &str) -> Transaction {
        Transaction {
            date: chrono::NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            account: account.to_string(),
            account_type: None,
            vendor: None,
            amount: 10.0,
            description: None,
            row: 2,
        }
    }

    #[test]
    fn test_accounts_without_activity() {
        let chart = chart();
        let postings = [posting("6000 Rent"), posting("Supplies"), posting("Checking")];
        assert_eq!(
            chart.accounts_without_activity(&postings),
            vec!["Interest Income", "Materials", "Sales"]
        );
        assert_eq!(chart.accounts_without_activity(&[]).len(), 5);
    }

    #[test]
    fn test_header_and_type_mapping() {
        let chart = chart();
        assert_eq!(chart.total_accounts(), 7);
        assert_eq!(chart.accounts[0].class, ChartClass::BalanceSheet);
        assert_eq!(chart.accounts[0].number.as_deref(), Some("1000"));
        assert_eq!(chart.account_type("Rent"), Some(Expense));
        assert_eq!(chart.account_type("Materials"), Some(CostOfGoodsSold));
        assert_eq!(chart.account_type("Interest Income"), Some(OtherIncome));
        assert_eq!(chart.lookup("Mystery").unwrap().class, ChartClass::Unknown);
        assert_eq!(chart.account_type("Checking"), None);
    }

    #[test]
    fn test_lookup_variants() {
        let chart = chart();
        assert_eq!(chart.lookup("6000 Rent").unwrap().name, "Rent");
        assert_eq!(chart.lookup("6000-Rent").unwrap().name, "Rent");
        assert_eq!(chart.lookup("rent").unwrap().name, "Rent");
        assert_eq!(chart.lookup("Supplies").unwrap().name, "Office:Supplies");
        assert_eq!(chart.lookup("Facilities:Rent").unwrap().name, "Rent");
        assert!(chart.lookup("Travel").is_none());
    }

    #[test]
    fn test_type_labels_are_case_insensitive() {
        assert_eq!(classify_platform_type("EXPENSES"), ChartClass::ProfitAndLoss(Expense));
        assert_eq!(classify_platform_type(" Fixed Asset "), ChartClass::BalanceSheet);
        assert_eq!(classify_platform_type("Crypto"), ChartClass::Unknown);
    }

    #[test]
    fn test_missing_columns() {
        let table = RawTable::from_csv_str("Name,Balance\nRent,10\n", &ParserConfig::default()).unwrap();
        assert!(matches!(
            ChartOfAccounts::from_table(&table),
            Err(InsightError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_chart_to_markdown() {
        let markdown = chart().to_markdown();
        assert!(markdown.contains("# Chart of Accounts"));
        assert!(markdown.contains("## Expense"));
        assert!(markdown.contains("- 6000 Rent"));
        assert!(markdown.contains("## Unclassified"));
    }

    #[test]
    fn test_chart_to_csv() {
        let csv = chart().to_csv().unwrap();
        assert!(csv.starts_with("Section,Account Number,Account Name,Account Type"));
        assert!(csv.contains("Expense,6000,Rent,Expenses"));
        assert!(csv.contains("Balance Sheet,1000,Checking,Bank"));
    }
}
