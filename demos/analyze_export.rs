use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use pnl_insights::{utils, AnalysisConfig, InsightPipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ChartFormat {
    Markdown,
    Csv,
    Json,
}

#[derive(Parser)]
#[command(name = "analyze_export", about = "Flags variances, anomalies and vendor concentration in a P&L export.")]
struct Args {
    /// Profit & Loss by month export (CSV or Excel)
    profit_and_loss: PathBuf,

    /// General Ledger export, enables vendor analysis
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Chart of Accounts export
    #[arg(long)]
    chart: Option<PathBuf>,

    /// JSON analysis config, missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the whole report as JSON
    #[arg(long)]
    json: bool,

    /// Also print the parsed Chart of Accounts in this format
    #[arg(long, value_enum)]
    export_chart: Option<ChartFormat>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AnalysisConfig::from_json(&fs::read_to_string(path)?)?,
        None => AnalysisConfig::default(),
    };
    let pipeline = InsightPipeline::new(config)?;
    let report = pipeline.analyze_files(&args.profit_and_loss, args.ledger.as_deref(), args.chart.as_deref())?;

    if args.json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    let metadata = report.model.metadata();
    println!(
        "📊 {} ({})",
        metadata.company.as_deref().unwrap_or("Unnamed company"),
        metadata.date_range.as_deref().unwrap_or("no date range")
    );
    println!(
        "   {} periods, {} accounts\n",
        report.model.periods().len(),
        report.model.accounts().len()
    );

    let margin = |m: Option<f64>| m.map(|m| format!("{:.1}%", m * 100.0)).unwrap_or_else(|| "-".to_string());
    for summary in &report.summaries {
        println!(
            "   {:<10} income {:>14}  net {:>14}  operating margin {:>7}",
            summary.label,
            utils::format_currency(summary.income),
            utils::format_currency(summary.net_income),
            margin(summary.operating_margin)
        );
    }

    if let Some(structure) = &report.expense_structure {
        println!(
            "\n💰 Operating expenses {} ({} of revenue, typical {:.0}-{:.0}%)",
            utils::format_currency(structure.total_expenses),
            margin(structure.expenses_share_of_revenue),
            structure.benchmark.low * 100.0,
            structure.benchmark.high * 100.0
        );
        println!(
            "   fixed {}  variable {}  discretionary {}",
            utils::format_currency(structure.fixed_costs),
            utils::format_currency(structure.variable_costs),
            utils::format_currency(structure.discretionary_costs)
        );
        for category in structure.top_expenses(pipeline.config().expense.top_expenses) {
            println!(
                "   {:<30} {:>14}  {:>6.1}%",
                category.account,
                utils::format_currency(category.total),
                category.share_of_expenses * 100.0
            );
        }
    }

    println!("\n🔎 {} findings", report.findings.len());
    for finding in &report.findings {
        println!("  [{:?}] {}", finding.severity, finding.explanation);
        if let Some(action) = &finding.suggested_action {
            println!("           → {}", action);
        }
    }

    if !report.notices.is_empty() {
        println!("\n⚠️  Notices");
        for notice in &report.notices {
            println!("  {:?}", notice);
        }
    }

    if let (Some(format), Some(chart)) = (args.export_chart, &report.chart_of_accounts) {
        println!();
        match format {
            ChartFormat::Markdown => println!("{}", chart.to_markdown()),
            ChartFormat::Csv => println!("{}", chart.to_csv()?),
            ChartFormat::Json => println!("{}", chart.to_json()?),
        }
    }

    Ok(())
}
