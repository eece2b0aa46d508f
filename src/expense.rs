use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{ExpenseConfig, Industry};
use crate::model::FinancialModel;
use crate::schema::{AccountType, Finding, Magnitude, Severity, Signal};
use crate::utils::format_currency;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum CostBehavior {
    Fixed,
    Variable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Discretion {
    Essential,
    Discretionary,
}

use CostBehavior::{Fixed, Variable};
use Discretion::{Discretionary, Essential};

/// Account-name keyword → cost class. First match wins.
pub const EXPENSE_CLASSES: &[(&str, CostBehavior, Discretion)] = &[
    ("office supplies", Variable, Discretionary),
    ("rent", Fixed, Essential),
    ("lease", Fixed, Essential),
    ("insurance", Fixed, Essential),
    ("depreciation", Fixed, Essential),
    ("amortization", Fixed, Essential),
    ("salary", Fixed, Essential),
    ("salaries", Fixed, Essential),
    ("wages", Fixed, Essential),
    ("payroll", Fixed, Essential),
    ("benefits", Fixed, Essential),
    ("health", Fixed, Essential),
    ("license", Fixed, Essential),
    ("permit", Fixed, Essential),
    ("interest", Fixed, Essential),
    ("utilities", Variable, Essential),
    ("telephone", Variable, Essential),
    ("internet", Variable, Essential),
    ("bank", Variable, Essential),
    ("merchant", Variable, Essential),
    ("processing", Variable, Essential),
    ("accounting", Variable, Essential),
    ("bookkeeping", Variable, Essential),
    ("legal", Variable, Essential),
    ("professional", Variable, Essential),
    ("shipping", Variable, Essential),
    ("freight", Variable, Essential),
    ("postage", Variable, Essential),
    ("advertising", Variable, Discretionary),
    ("marketing", Variable, Discretionary),
    ("promotion", Variable, Discretionary),
    ("travel", Variable, Discretionary),
    ("entertainment", Variable, Discretionary),
    ("meals", Variable, Discretionary),
    ("supplies", Variable, Discretionary),
    ("training", Variable, Discretionary),
    ("education", Variable, Discretionary),
    ("subscription", Variable, Discretionary),
    ("software", Variable, Discretionary),
    ("dues", Variable, Discretionary),
    ("membership", Variable, Discretionary),
    ("donations", Variable, Discretionary),
    ("gifts", Variable, Discretionary),
];

/// Unrecognized names are variable and discretionary.
pub fn classify_expense(name: &str) -> (CostBehavior, Discretion) {
    let lower = name.to_lowercase();
    EXPENSE_CLASSES
        .iter()
        .find(|(keyword, _, _)| lower.contains(keyword))
        .map(|(_, behavior, discretion)| (*behavior, *discretion))
        .unwrap_or((Variable, Discretionary))
}

/// Typical operating expenses as a share of revenue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Benchmark {
    pub low: f64,
    pub typical: f64,
    pub high: f64,
}

impl Industry {
    pub fn benchmark(&self) -> Benchmark {
        let (low, typical, high) = match self {
            Industry::Retail => (0.15, 0.20, 0.30),
            Industry::Ecommerce => (0.10, 0.15, 0.25),
            Industry::ProfessionalServices => (0.20, 0.30, 0.45),
            Industry::Manufacturing => (0.10, 0.15, 0.25),
            Industry::Construction => (0.12, 0.18, 0.28),
            Industry::Restaurant => (0.25, 0.35, 0.45),
            Industry::Healthcare => (0.15, 0.22, 0.35),
            Industry::Technology => (0.20, 0.30, 0.50),
            Industry::General => (0.15, 0.25, 0.40),
        };
        Benchmark { low, typical, high }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum BenchmarkPosition {
    Below,
    Within,
    Above,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum CostStructure {
    FixedHeavy,
    Balanced,
    VariableHeavy,
}

/// One operating expense account summed over every period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ExpenseCategory {
    pub account: String,
    pub total: f64,
    pub share_of_expenses: f64,
    #[schemars(description = "None when the report has no revenue")]
    pub share_of_revenue: Option<f64>,
    pub behavior: CostBehavior,
    pub discretion: Discretion,
}

/// How operating expenses split up and how they compare with revenue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ExpenseStructure {
    pub industry: Industry,
    pub benchmark: Benchmark,
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub expenses_share_of_revenue: Option<f64>,
    pub benchmark_position: Option<BenchmarkPosition>,
    pub fixed_costs: f64,
    pub variable_costs: f64,
    pub discretionary_costs: f64,
    pub essential_costs: f64,
    pub cost_structure: CostStructure,
    /// Largest first.
    pub categories: Vec<ExpenseCategory>,
}

impl ExpenseStructure {
    pub fn fixed_share(&self) -> f64 {
        if self.total_expenses > 0.0 {
            self.fixed_costs / self.total_expenses
        } else {
            0.0
        }
    }

    pub fn top_expenses(&self, n: usize) -> &[ExpenseCategory] {
        &self.categories[..n.min(self.categories.len())]
    }
}

pub struct ExpenseOutcome {
    pub structure: Option<ExpenseStructure>,
    pub findings: Vec<Finding>,
}

pub struct ExpenseEngine<'a> {
    config: &'a ExpenseConfig,
}

impl<'a> ExpenseEngine<'a> {
    pub fn new(config: &'a ExpenseConfig) -> Self {
        Self { config }
    }

    /// `structure` is `None` when the report has no operating expenses.
    pub fn analyze(&self, model: &FinancialModel) -> ExpenseOutcome {
        let Some(structure) = self.structure(model) else {
            debug!("No operating expenses, skipping expense structure");
            return ExpenseOutcome {
                structure: None,
                findings: Vec::new(),
            };
        };

        let mut findings = self.high_revenue_share(&structure);
        findings.extend(self.benchmark_finding(&structure));
        info!(
            "Expense structure: {} accounts, {} total, {} findings",
            structure.categories.len(),
            format_currency(structure.total_expenses),
            findings.len()
        );
        ExpenseOutcome {
            structure: Some(structure),
            findings,
        }
    }

    pub fn structure(&self, model: &FinancialModel) -> Option<ExpenseStructure> {
        let total_revenue: f64 = model
            .leaf_accounts()
            .filter(|a| a.account_type == AccountType::Income)
            .flat_map(|a| model.series(a.id).iter().flatten())
            .sum();

        let mut categories: Vec<(String, f64)> = model
            .leaf_accounts()
            .filter(|a| a.account_type == AccountType::Expense)
            .map(|a| (a.name.clone(), model.series(a.id).iter().flatten().sum::<f64>().abs()))
            .filter(|(_, total)| *total >= 0.01)
            .collect();
        if categories.is_empty() {
            return None;
        }
        categories.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let total_expenses: f64 = categories.iter().map(|(_, total)| total).sum();
        let revenue_share = |amount: f64| (total_revenue > 0.0).then(|| amount / total_revenue);

        let categories: Vec<ExpenseCategory> = categories
            .into_iter()
            .map(|(account, total)| {
                let (behavior, discretion) = classify_expense(&account);
                ExpenseCategory {
                    share_of_expenses: total / total_expenses,
                    share_of_revenue: revenue_share(total),
                    account,
                    total,
                    behavior,
                    discretion,
                }
            })
            .collect();

        let fixed_costs: f64 = categories.iter().filter(|c| c.behavior == Fixed).map(|c| c.total).sum();
        let discretionary_costs: f64 = categories
            .iter()
            .filter(|c| c.discretion == Discretionary)
            .map(|c| c.total)
            .sum();

        let benchmark = self.config.industry.benchmark();
        let expenses_share_of_revenue = revenue_share(total_expenses);
        let benchmark_position = expenses_share_of_revenue.map(|share| {
            if share < benchmark.low {
                BenchmarkPosition::Below
            } else if share > benchmark.high {
                BenchmarkPosition::Above
            } else {
                BenchmarkPosition::Within
            }
        });

        let fixed_share = fixed_costs / total_expenses;
        let cost_structure = if fixed_share >= self.config.fixed_heavy_share {
            CostStructure::FixedHeavy
        } else if fixed_share <= self.config.variable_heavy_share {
            CostStructure::VariableHeavy
        } else {
            CostStructure::Balanced
        };

        Some(ExpenseStructure {
            industry: self.config.industry,
            benchmark,
            total_revenue,
            total_expenses,
            expenses_share_of_revenue,
            benchmark_position,
            fixed_costs,
            variable_costs: total_expenses - fixed_costs,
            discretionary_costs,
            essential_costs: total_expenses - discretionary_costs,
            cost_structure,
            categories,
        })
    }

    fn high_revenue_share(&self, structure: &ExpenseStructure) -> Vec<Finding> {
        structure
            .categories
            .iter()
            .filter_map(|c| {
                let share = c.share_of_revenue?;
                if share <= self.config.high_revenue_share {
                    return None;
                }
                Some(
                    Finding::new(
                        Signal::HighRevenueShare,
                        Severity::Warning,
                        Magnitude::with_percent(c.total, share),
                        format!(
                            "{} totals {}, {:.1}% of revenue",
                            c.account,
                            format_currency(c.total),
                            share * 100.0
                        ),
                    )
                    .with_account_name(&c.account)
                    .with_action("Check whether this spend is growing faster than revenue"),
                )
            })
            .collect()
    }

    fn benchmark_finding(&self, structure: &ExpenseStructure) -> Option<Finding> {
        let share = structure.expenses_share_of_revenue?;
        let b = &structure.benchmark;
        let (signal, severity, action) = match structure.benchmark_position? {
            BenchmarkPosition::Within => return None,
            BenchmarkPosition::Above => (
                Signal::OverheadAboveBenchmark,
                Severity::Warning,
                "Review discretionary spending for savings",
            ),
            BenchmarkPosition::Below => (
                Signal::OverheadBelowBenchmark,
                Severity::Info,
                "Confirm that no operating expenses are missing or coded to cost of goods sold",
            ),
        };

        Some(
            Finding::new(
                signal,
                severity,
                Magnitude::with_percent(structure.total_expenses, share),
                format!(
                    "Operating expenses are {:.1}% of revenue, outside the typical {:.0}-{:.0}% range",
                    share * 100.0,
                    b.low * 100.0,
                    b.high * 100.0
                ),
            )
            .with_action(action),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::model_of;

    #[test]
    fn test_classify_expense() {
        assert_eq!(classify_expense("Rent or Lease"), (Fixed, Essential));
        assert_eq!(classify_expense("Office Supplies"), (Variable, Discretionary));
        assert_eq!(classify_expense("Utilities"), (Variable, Essential));
        assert_eq!(classify_expense("Widgets"), (Variable, Discretionary));
    }

    #[test]
    fn test_structure_splits_costs() {
        let config = ExpenseConfig::default();
        let model = model_of(&[
            ("Sales", AccountType::Income, &[Some(10_000.0), Some(10_000.0)]),
            ("Rent", AccountType::Expense, &[Some(1_500.0), Some(1_500.0)]),
            ("Advertising", AccountType::Expense, &[Some(400.0), Some(600.0)]),
            ("Utilities", AccountType::Expense, &[Some(300.0), None]),
            ("Materials", AccountType::CostOfGoodsSold, &[Some(2_000.0), Some(2_000.0)]),
        ]);
        let structure = ExpenseEngine::new(&config).structure(&model).unwrap();

        assert_eq!(structure.total_revenue, 20_000.0);
        assert_eq!(structure.total_expenses, 4_300.0);
        assert_eq!(structure.categories[0].account, "Rent");
        assert_eq!(structure.categories[0].share_of_revenue, Some(0.15));
        assert_eq!(structure.fixed_costs, 3_000.0);
        assert_eq!(structure.variable_costs, 1_300.0);
        assert_eq!(structure.discretionary_costs, 1_000.0);
        assert_eq!(structure.essential_costs, 3_300.0);
        assert_eq!(structure.benchmark_position, Some(BenchmarkPosition::Within));
        assert_eq!(structure.cost_structure, CostStructure::Balanced);
        assert!((structure.fixed_share() - 3_000.0 / 4_300.0).abs() < 1e-12);
        assert_eq!(structure.top_expenses(2).len(), 2);
        assert_eq!(structure.top_expenses(10).len(), 3);
    }

    #[test]
    fn test_findings_for_high_share_and_benchmark() {
        let config = ExpenseConfig::default();
        let model = model_of(&[
            ("Sales", AccountType::Income, &[Some(10_000.0)]),
            ("Rent", AccountType::Expense, &[Some(3_000.0)]),
            ("Payroll", AccountType::Expense, &[Some(2_000.0)]),
            ("Travel", AccountType::Expense, &[Some(500.0)]),
        ]);
        let outcome = ExpenseEngine::new(&config).analyze(&model);
        let structure = outcome.structure.unwrap();
        assert_eq!(structure.benchmark_position, Some(BenchmarkPosition::Above));
        assert_eq!(structure.cost_structure, CostStructure::FixedHeavy);

        let high: Vec<_> = outcome
            .findings
            .iter()
            .filter(|f| f.signal == Signal::HighRevenueShare)
            .filter_map(|f| f.account.as_deref())
            .collect();
        assert_eq!(high, vec!["Rent", "Payroll"]);
        assert!(outcome
            .findings
            .iter()
            .any(|f| f.signal == Signal::OverheadAboveBenchmark && f.severity == Severity::Warning));
    }

    #[test]
    fn test_no_revenue_has_no_shares() {
        let config = ExpenseConfig::default();
        let model = model_of(&[("Rent", AccountType::Expense, &[Some(1_000.0)])]);
        let outcome = ExpenseEngine::new(&config).analyze(&model);
        let structure = outcome.structure.unwrap();
        assert_eq!(structure.expenses_share_of_revenue, None);
        assert_eq!(structure.benchmark_position, None);
        assert!(outcome.findings.is_empty());

        let empty = model_of(&[("Sales", AccountType::Income, &[Some(1_000.0)])]);
        assert!(ExpenseEngine::new(&config).analyze(&empty).structure.is_none());
    }
}
