use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{InsightError, Result};

/// Thresholds and limits for every analysis stage.
///
/// Each section deserializes with its defaults, so a partial JSON document
/// such as `{"variance": {"pct_threshold": 0.3}}` is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    pub parser: ParserConfig,
    pub variance: VarianceConfig,
    pub anomaly: AnomalyConfig,
    pub vendor: VendorConfig,
    pub expense: ExpenseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ParserConfig {
    #[schemars(description = "Maximum number of rows read from any input table")]
    pub max_rows: usize,

    #[schemars(description = "Maximum number of columns read from any input table")]
    pub max_columns: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_rows: 100_000,
            max_columns: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct VarianceConfig {
    #[schemars(description = "Minimum absolute month-over-month change as a fraction (0.20 = 20%)")]
    pub pct_threshold: f64,

    #[schemars(description = "Minimum absolute dollar change before any change is reported")]
    pub dollar_floor: f64,

    #[schemars(
        description = "Scales the dollar floor with account size: the floor is at least this fraction of the trailing average magnitude"
    )]
    pub trailing_floor_fraction: f64,

    #[schemars(description = "Coefficient of variation above which an account is reported as volatile")]
    pub volatility_cv_threshold: f64,

    #[schemars(description = "Minimum number of present values before trend and volatility are assessed")]
    pub trend_min_periods: usize,

    #[schemars(description = "Largest subtotal difference, in dollars, accepted as a rounding difference")]
    pub reconciliation_tolerance: f64,

    #[schemars(
        description = "Also require a trend's first-to-last change to agree with its direction and exceed the dollar floor"
    )]
    pub trend_requires_net_change: bool,
}

impl Default for VarianceConfig {
    fn default() -> Self {
        Self {
            pct_threshold: 0.20,
            dollar_floor: 100.0,
            trailing_floor_fraction: 0.05,
            volatility_cv_threshold: 0.50,
            trend_min_periods: 3,
            reconciliation_tolerance: 0.01,
            trend_requires_net_change: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct AnomalyConfig {
    #[schemars(description = "Coefficient of variation at which the statistical stability score reaches one half")]
    pub stability_cv_threshold: f64,

    #[schemars(description = "Weight of the keyword-based structural score in the combined stability score")]
    pub structural_weight: f64,

    #[schemars(description = "Combined stability score at or above which an account is treated as should-be-stable")]
    pub stable_score_threshold: f64,

    #[schemars(description = "Absolute z-score at or above which a stable account's value is a deviation")]
    pub z_threshold: f64,

    #[schemars(description = "Minimum number of trailing present values needed to form a baseline")]
    pub min_baseline_periods: usize,

    #[schemars(description = "Maximum number of trailing present values in the baseline")]
    pub baseline_window: usize,

    #[schemars(description = "Lower bound on the baseline standard deviation as a fraction of the baseline mean")]
    pub min_sigma_fraction: f64,

    #[schemars(description = "A ledger transaction larger than this multiple of the account's mean is unusual")]
    pub unusual_multiplier: f64,

    #[schemars(description = "Minimum dollar amount for an unusual transaction")]
    pub unusual_floor: f64,

    #[schemars(
        description = "Share of an account's ledger spend from recurring vendors at which small deviations are suppressed"
    )]
    pub recurring_suppression_share: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            stability_cv_threshold: 0.15,
            structural_weight: 0.4,
            stable_score_threshold: 0.6,
            z_threshold: 3.0,
            min_baseline_periods: 3,
            baseline_window: 12,
            min_sigma_fraction: 0.02,
            unusual_multiplier: 3.0,
            unusual_floor: 500.0,
            recurring_suppression_share: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct VendorConfig {
    #[schemars(description = "Share of a category's spend above which a single vendor is a concentration risk")]
    pub share_threshold: f64,

    #[schemars(description = "Number of top vendors considered for the combined concentration check")]
    pub top_n: usize,

    #[schemars(description = "Combined share of the top vendors above which a category is concentrated")]
    pub top_n_share_threshold: f64,

    #[schemars(description = "Categories with less total spend than this are not assessed")]
    pub min_category_spend: f64,

    #[schemars(description = "Share of a category's spend without a vendor above which a notice is raised")]
    pub unattributed_notice_share: f64,

    #[schemars(description = "Fraction of calendar months a vendor must be active in to be recurring")]
    pub recurring_min_presence: f64,

    #[schemars(description = "Allowed deviation of each active month's total from the median, as a fraction")]
    pub recurring_amount_tolerance: f64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            share_threshold: 0.40,
            top_n: 3,
            top_n_share_threshold: 0.80,
            min_category_spend: 500.0,
            unattributed_notice_share: 0.20,
            recurring_min_presence: 0.75,
            recurring_amount_tolerance: 0.10,
        }
    }
}

/// Industry whose overhead range the operating expenses are compared with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Industry {
    Retail,
    Ecommerce,
    ProfessionalServices,
    Manufacturing,
    Construction,
    Restaurant,
    Healthcare,
    Technology,
    #[default]
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct ExpenseConfig {
    #[schemars(description = "Industry benchmark used for operating expenses as a share of revenue")]
    pub industry: Industry,

    #[schemars(description = "Share of revenue above which a single expense account is reported")]
    pub high_revenue_share: f64,

    #[schemars(description = "Share of fixed costs at or above which the cost structure is fixed-heavy")]
    pub fixed_heavy_share: f64,

    #[schemars(description = "Share of fixed costs at or below which the cost structure is variable-heavy")]
    pub variable_heavy_share: f64,

    #[schemars(description = "Number of largest expense accounts listed in the expense structure")]
    pub top_expenses: usize,
}

impl Default for ExpenseConfig {
    fn default() -> Self {
        Self {
            industry: Industry::General,
            high_revenue_share: 0.10,
            fixed_heavy_share: 0.70,
            variable_heavy_share: 0.30,
            top_expenses: 5,
        }
    }
}

fn invalid(field: &str, details: impl Into<String>) -> InsightError {
    InsightError::InvalidConfig {
        field: field.to_string(),
        details: details.into(),
    }
}

fn check_fraction(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, format!("must be between 0 and 1, got {}", value)));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(field, format!("must be a positive number, got {}", value)));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, format!("must not be negative, got {}", value)));
    }
    Ok(())
}

impl AnalysisConfig {
    /// Range-checks every threshold.
    pub fn validate(&self) -> Result<()> {
        let p = &self.parser;
        if p.max_rows == 0 {
            return Err(invalid("parser.max_rows", "must be at least 1"));
        }
        if p.max_columns < 2 {
            return Err(invalid("parser.max_columns", "must be at least 2"));
        }

        let v = &self.variance;
        check_positive("variance.pct_threshold", v.pct_threshold)?;
        check_non_negative("variance.dollar_floor", v.dollar_floor)?;
        check_fraction("variance.trailing_floor_fraction", v.trailing_floor_fraction)?;
        check_positive("variance.volatility_cv_threshold", v.volatility_cv_threshold)?;
        if v.trend_min_periods < 2 {
            return Err(invalid("variance.trend_min_periods", "must be at least 2"));
        }
        check_non_negative("variance.reconciliation_tolerance", v.reconciliation_tolerance)?;

        let a = &self.anomaly;
        check_positive("anomaly.stability_cv_threshold", a.stability_cv_threshold)?;
        check_fraction("anomaly.structural_weight", a.structural_weight)?;
        check_fraction("anomaly.stable_score_threshold", a.stable_score_threshold)?;
        check_positive("anomaly.z_threshold", a.z_threshold)?;
        if a.min_baseline_periods < 2 {
            return Err(invalid("anomaly.min_baseline_periods", "must be at least 2"));
        }
        if a.baseline_window < a.min_baseline_periods {
            return Err(invalid(
                "anomaly.baseline_window",
                format!(
                    "must be at least min_baseline_periods ({}), got {}",
                    a.min_baseline_periods, a.baseline_window
                ),
            ));
        }
        check_non_negative("anomaly.min_sigma_fraction", a.min_sigma_fraction)?;
        check_positive("anomaly.unusual_multiplier", a.unusual_multiplier)?;
        check_non_negative("anomaly.unusual_floor", a.unusual_floor)?;
        check_fraction("anomaly.recurring_suppression_share", a.recurring_suppression_share)?;

        let vc = &self.vendor;
        check_fraction("vendor.share_threshold", vc.share_threshold)?;
        if vc.top_n == 0 {
            return Err(invalid("vendor.top_n", "must be at least 1"));
        }
        check_fraction("vendor.top_n_share_threshold", vc.top_n_share_threshold)?;
        check_non_negative("vendor.min_category_spend", vc.min_category_spend)?;
        check_fraction("vendor.unattributed_notice_share", vc.unattributed_notice_share)?;
        check_fraction("vendor.recurring_min_presence", vc.recurring_min_presence)?;
        check_fraction("vendor.recurring_amount_tolerance", vc.recurring_amount_tolerance)?;

        let e = &self.expense;
        check_fraction("expense.high_revenue_share", e.high_revenue_share)?;
        check_fraction("expense.fixed_heavy_share", e.fixed_heavy_share)?;
        check_fraction("expense.variable_heavy_share", e.variable_heavy_share)?;
        if e.variable_heavy_share >= e.fixed_heavy_share {
            return Err(invalid(
                "expense.variable_heavy_share",
                format!(
                    "must be below fixed_heavy_share ({}), got {}",
                    e.fixed_heavy_share, e.variable_heavy_share
                ),
            ));
        }

        Ok(())
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AnalysisConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = Self::generate_json_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.variance.pct_threshold, 0.20);
        assert_eq!(config.variance.dollar_floor, 100.0);
        assert_eq!(config.vendor.share_threshold, 0.40);
        assert_eq!(config.parser.max_rows, 100_000);
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config = AnalysisConfig::from_json(r#"{"variance": {"pct_threshold": 0.3}}"#).unwrap();
        assert_eq!(config.variance.pct_threshold, 0.3);
        assert_eq!(config.variance.dollar_floor, 100.0);
        assert_eq!(config.anomaly, AnomalyConfig::default());
    }

    #[test]
    fn test_expense_industry_from_json() {
        let config = AnalysisConfig::from_json(r#"{"expense": {"industry": "professional_services"}}"#).unwrap();
        assert_eq!(config.expense.industry, Industry::ProfessionalServices);
        assert_eq!(config.expense.high_revenue_share, 0.10);

        let mut config = AnalysisConfig::default();
        config.expense.variable_heavy_share = 0.8;
        assert!(matches!(
            config.validate(),
            Err(InsightError::InvalidConfig { field, .. }) if field == "expense.variable_heavy_share"
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = AnalysisConfig::default();
        config.vendor.share_threshold = 1.5;
        match config.validate() {
            Err(InsightError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "vendor.share_threshold")
            }
            other => panic!("expected InvalidConfig, got {:?}", other),
        }

        let mut config = AnalysisConfig::default();
        config.anomaly.baseline_window = 2;
        assert!(config.validate().is_err());

        assert!(AnalysisConfig::from_json(r#"{"parser": {"max_rows": 0}}"#).is_err());
    }

    #[test]
    fn test_schema_generation() {
        let json = AnalysisConfig::schema_as_json().unwrap();
        assert!(json.contains("pct_threshold"));
        assert!(json.contains("recurring_min_presence"));
    }
}
