//! # P&L Insights
//!
//! Turns Profit & Loss exports from accounting platforms into a structured
//! financial model, then flags the month-over-month changes, cost anomalies and
//! vendor concentration a bookkeeper would want to look at.
//!
//! ## Core Concepts
//!
//! - **Financial Model**: accounts × periods × optional line values, parsed from
//!   a P&L-by-month export. Blank cells stay blank; they are never zero.
//! - **Findings**: typed flags with a severity, a dollar magnitude and an
//!   explanation, produced fresh on every run.
//! - **Notices**: non-fatal conditions, such as vendor analysis being skipped
//!   because no General Ledger was supplied.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pnl_insights::*;
//!
//! let config = AnalysisConfig::default();
//! let pnl = RawTable::from_csv_str(
//!     "Account,Jan 2025,Feb 2025\nExpenses,,\nRent,1000,1000\nUtilities,200,600\n",
//!     &config.parser,
//! )?;
//!
//! let report = InsightPipeline::new(config)?.analyze(AnalysisInputs::new(&pnl))?;
//! for finding in &report.findings {
//!     println!("{:?}: {}", finding.severity, finding.explanation);
//! }
//! ```

pub mod anomaly;
pub mod chart_of_accounts;
pub mod config;
pub mod error;
pub mod expense;
pub mod ingestion;
pub mod insights;
pub mod ledger;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod rules;
pub mod schema;
pub mod stats;
pub mod utils;
pub mod variance;
pub mod vendor;

pub use anomaly::{statistical_stability, structural_stability, AnomalyEngine};
pub use chart_of_accounts::{AccountEntry, ChartClass, ChartOfAccounts};
pub use config::*;
pub use error::{InsightError, Result};
pub use expense::{classify_expense, ExpenseEngine, ExpenseStructure};
pub use ingestion::{read_table, RawTable};
pub use insights::InsightAggregator;
pub use ledger::{
    classify_transactions, parse_general_ledger, verify_stated_totals, ClassifiedLedger, GeneralLedgerParser,
    ParsedLedger, StatedTotal,
};
pub use model::{AccountRow, FinancialModel, FinancialModelBuilder, PeriodSummary, ReportMetadata};
pub use parser::{parse_profit_and_loss, ProfitAndLossParser};
pub use reconcile::{ReconciliationIssue, ReconciliationScope, Reconciler};
pub use schema::*;
pub use variance::{classify_change, Change, VarianceEngine};
pub use vendor::{normalize_vendor_name, VendorAnalysis, VendorEngine};

use std::path::Path;

use log::{info, warn};
use serde::Serialize;

/// The tables one analysis run reads. Only the P&L is required.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInputs<'a> {
    pub profit_and_loss: &'a RawTable,
    pub general_ledger: Option<&'a RawTable>,
    pub chart_of_accounts: Option<&'a RawTable>,
}

impl<'a> AnalysisInputs<'a> {
    pub fn new(profit_and_loss: &'a RawTable) -> Self {
        Self {
            profit_and_loss,
            general_ledger: None,
            chart_of_accounts: None,
        }
    }

    pub fn with_general_ledger(mut self, table: &'a RawTable) -> Self {
        self.general_ledger = Some(table);
        self
    }

    pub fn with_chart_of_accounts(mut self, table: &'a RawTable) -> Self {
        self.chart_of_accounts = Some(table);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub model: FinancialModel,
    pub summaries: Vec<PeriodSummary>,
    pub findings: Vec<Finding>,
    pub notices: Vec<Notice>,
    pub vendor_analysis: Option<VendorAnalysis>,
    pub expense_structure: Option<ExpenseStructure>,
    pub chart_of_accounts: Option<ChartOfAccounts>,
}

impl AnalysisReport {
    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A secondary input that was supplied but could not be read.
type SecondaryInput<'a> = Option<std::result::Result<&'a RawTable, String>>;

pub struct InsightPipeline {
    config: AnalysisConfig,
}

impl InsightPipeline {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(&self, inputs: AnalysisInputs<'_>) -> Result<AnalysisReport> {
        self.run(
            inputs.profit_and_loss,
            inputs.general_ledger.map(Ok),
            inputs.chart_of_accounts.map(Ok),
        )
    }

    /// Reads the exports from disk. Only a P&L that cannot be read or parsed
    /// fails the run.
    pub fn analyze_files(
        &self,
        profit_and_loss: &Path,
        general_ledger: Option<&Path>,
        chart_of_accounts: Option<&Path>,
    ) -> Result<AnalysisReport> {
        let pnl = read_table(profit_and_loss, &self.config.parser)?;
        let ledger = general_ledger.map(|p| read_table(p, &self.config.parser).map_err(|e| e.to_string()));
        let chart = chart_of_accounts.map(|p| read_table(p, &self.config.parser).map_err(|e| e.to_string()));

        self.run(
            &pnl,
            ledger.as_ref().map(|r| r.as_ref().map_err(Clone::clone)),
            chart.as_ref().map(|r| r.as_ref().map_err(Clone::clone)),
        )
    }

    fn run(
        &self,
        profit_and_loss: &RawTable,
        general_ledger: SecondaryInput<'_>,
        chart_of_accounts: SecondaryInput<'_>,
    ) -> Result<AnalysisReport> {
        let model = parse_profit_and_loss(profit_and_loss, &self.config.parser)?;
        let mut notices = Vec::new();

        let chart = match chart_of_accounts {
            None => None,
            Some(table) => match table.and_then(|t| ChartOfAccounts::from_table(t).map_err(|e| e.to_string())) {
                Ok(chart) => Some(chart),
                Err(reason) => {
                    warn!("Ignoring the Chart of Accounts: {}", reason);
                    notices.push(Notice::ChartOfAccountsIgnored { reason });
                    None
                }
            },
        };

        let ledger = match general_ledger {
            None => Err("no General Ledger was provided".to_string()),
            Some(table) => table.and_then(|t| {
                GeneralLedgerParser::new(&self.config.parser)
                    .parse_with_totals(t)
                    .map_err(|e| e.to_string())
            }),
        };
        let transactions = ledger.and_then(|ledger| {
            notices.extend(verify_stated_totals(&ledger, self.config.variance.reconciliation_tolerance));
            if let Some(chart) = &chart {
                let idle = chart.accounts_without_activity(&ledger.transactions);
                if !idle.is_empty() {
                    notices.push(Notice::ChartAccountsWithoutActivity { accounts: idle });
                }
            }
            Ok(ledger.transactions)
        });

        let mut findings = VarianceEngine::new(&self.config.variance).analyze(&model);
        let anomaly = AnomalyEngine::new(&self.config);

        let classified = transactions.and_then(|transactions| {
            if transactions.is_empty() {
                return Err("the General Ledger contains no transactions".to_string());
            }
            let classified = classify_transactions(transactions, &model, chart.as_ref());
            if !classified.unmatched_accounts.is_empty() {
                notices.push(Notice::LedgerAccountsUnmatched {
                    accounts: classified.unmatched_accounts.clone(),
                });
            }
            if classified.transactions.is_empty() {
                return Err("every General Ledger transaction posts to a balance sheet account".to_string());
            }
            Ok(classified)
        });

        let vendor_analysis = match classified {
            Err(reason) => {
                warn!("Vendor analysis skipped: {}", reason);
                notices.push(Notice::VendorAnalysisSkipped { reason });
                findings.extend(anomaly.analyze(&model, None, None));
                None
            }
            Ok(classified) => {
                let outcome = VendorEngine::new(&self.config.vendor).analyze(&model, &classified.transactions);
                findings.extend(outcome.findings);
                notices.extend(outcome.notices);
                findings.extend(anomaly.analyze(
                    &model,
                    Some(&classified.transactions),
                    Some(&outcome.analysis),
                ));
                Some(outcome.analysis)
            }
        };

        let expense = ExpenseEngine::new(&self.config.expense).analyze(&model);
        findings.extend(expense.findings);

        let findings = InsightAggregator::new().aggregate(findings);
        info!(
            "Analysis complete: {} periods, {} accounts, {} findings, {} notices",
            model.periods().len(),
            model.accounts().len(),
            findings.len(),
            notices.len()
        );

        Ok(AnalysisReport {
            summaries: model.summaries(),
            model,
            findings,
            notices,
            vendor_analysis,
            expense_structure: expense.structure,
            chart_of_accounts: chart,
        })
    }
}

/// Runs the pipeline over in-memory tables with the given config.
pub fn analyze_report(inputs: AnalysisInputs<'_>, config: AnalysisConfig) -> Result<AnalysisReport> {
    InsightPipeline::new(config)?.analyze(inputs)
}
