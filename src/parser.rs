use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::ParserConfig;
use crate::error::{InsightError, Result};
use crate::ingestion::RawTable;
use crate::model::{AccountRow, FinancialModel, FinancialModelBuilder, ReportMetadata};
use crate::rules::{classify_row, RowClass};
use crate::schema::{AccountRole, AccountType, LineValue, Period};
use crate::utils::{self, AmountCell};

/// Located header row of a P&L export.
#[derive(Debug, Clone, PartialEq)]
struct Header {
    row: usize,
    /// Number of cells after the label column.
    width: usize,
    periods: Vec<Period>,
    total_column: Option<usize>,
}

/// Turns a "Profit and Loss by Month" export into a [`FinancialModel`].
pub struct ProfitAndLossParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> ProfitAndLossParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    pub fn parse(&self, table: &RawTable) -> Result<FinancialModel> {
        if table.is_empty() {
            return Err(InsightError::EmptyInput(
                "the profit and loss export has no content".to_string(),
            ));
        }
        let widest = table.rows.iter().map(Vec::len).max().unwrap_or(0);
        if table.len() > self.config.max_rows {
            return Err(InsightError::InputTooLarge {
                kind: "row".to_string(),
                limit: self.config.max_rows,
                actual: table.len(),
            });
        }
        if widest > self.config.max_columns {
            return Err(InsightError::InputTooLarge {
                kind: "column".to_string(),
                limit: self.config.max_columns,
                actual: widest,
            });
        }

        let header = find_header(table)?;
        let metadata = read_preamble(table, &header);
        info!(
            "Found {} periods in header row {}{}",
            header.periods.len(),
            header.row + 1,
            if header.total_column.is_some() { " (plus a Total column)" } else { "" }
        );

        let mut builder = FinancialModelBuilder::new(header.periods.clone(), metadata);
        let mut state = SectionState::default();

        for (index, row) in table.rows.iter().enumerate().skip(header.row + 1) {
            self.parse_row(&header, index, row, &mut state, &mut builder)?;
        }

        if builder.period_count() == 0 || state.accounts == 0 {
            return Err(InsightError::EmptyInput(
                "no account rows were found below the header".to_string(),
            ));
        }

        let model = builder.build();
        info!(
            "Parsed {} accounts ({} leaves) across {} periods",
            model.accounts().len(),
            model.leaf_accounts().count(),
            model.periods().len()
        );
        Ok(model)
    }

    fn parse_row(
        &self,
        header: &Header,
        index: usize,
        row: &[String],
        state: &mut SectionState,
        builder: &mut FinancialModelBuilder,
    ) -> Result<()> {
        let row_number = index + 1;
        let raw_label = row.first().map(String::as_str).unwrap_or("");
        let label = raw_label.trim();
        let cells = row.get(1..).unwrap_or(&[]);
        let has_values = cells.iter().any(|c| !c.trim().is_empty());

        if label.is_empty() {
            if has_values {
                warn!("Skipping row {}: values without an account name", row_number);
            }
            return Ok(());
        }

        let class = classify_row(label, has_values);
        debug!("Row {} '{}' classified as {:?}", row_number, label, class);

        match class {
            RowClass::Metadata => Ok(()),
            RowClass::SectionHeader(ty) => {
                state.open_section(ty);
                Ok(())
            }
            RowClass::SectionTotal(ty) => {
                let values = read_values(header, row_number, label, cells)?;
                state.close_section();
                state.add(builder, label, ty, AccountRole::SectionTotal, 0, None, row_number, values)
            }
            RowClass::Summary(kind) => {
                let values = read_values(header, row_number, label, cells)?;
                state.close_section();
                state.add(
                    builder,
                    label,
                    AccountType::NetIncome,
                    AccountRole::Summary(kind),
                    0,
                    None,
                    row_number,
                    values,
                )
            }
            RowClass::GroupTotal(name) => {
                let Some(ty) = state.section else {
                    warn!("Ignoring '{}' on row {}: not inside a section", label, row_number);
                    return Ok(());
                };
                let values = read_values(header, row_number, label, cells)?;
                state.close_group(&name);
                let depth = state.groups.len();
                let parent = state.groups.last().cloned();
                state.add(builder, label, ty, AccountRole::GroupTotal, depth, parent, row_number, values)
            }
            RowClass::Account if !has_values => {
                if state.section.is_some() {
                    debug!("Row {} opens group '{}'", row_number, label);
                    state.groups.push(label.to_string());
                } else {
                    debug!("Skipping label-only row {} outside any section", row_number);
                }
                Ok(())
            }
            RowClass::Account => {
                let Some(ty) = state.section else {
                    return Err(InsightError::AccountOutsideSection {
                        row: row_number,
                        name: label.to_string(),
                    });
                };
                let values = read_values(header, row_number, label, cells)?;
                let depth = state.groups.len().max(indentation(raw_label) / 2);
                let parent = state.groups.last().cloned();
                state.add(builder, label, ty, AccountRole::Leaf, depth, parent, row_number, values)
            }
        }
    }
}

pub fn parse_profit_and_loss(table: &RawTable, config: &ParserConfig) -> Result<FinancialModel> {
    ProfitAndLossParser::new(config).parse(table)
}

#[derive(Debug, Default)]
struct SectionState {
    section: Option<AccountType>,
    groups: Vec<String>,
    accounts: usize,
}

impl SectionState {
    fn open_section(&mut self, ty: AccountType) {
        self.section = Some(ty);
        self.groups.clear();
    }

    fn close_section(&mut self) {
        self.section = None;
        self.groups.clear();
    }

    /// Pops back to and including the named group. A total with no open
    /// group of that name leaves the stack alone.
    fn close_group(&mut self, name: &str) {
        if let Some(pos) = self
            .groups
            .iter()
            .rposition(|g| g.eq_ignore_ascii_case(name))
        {
            self.groups.truncate(pos);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add(
        &mut self,
        builder: &mut FinancialModelBuilder,
        name: &str,
        account_type: AccountType,
        role: AccountRole,
        depth: usize,
        parent: Option<String>,
        row: usize,
        values: Vec<LineValue>,
    ) -> Result<()> {
        builder.add_account(AccountRow {
            name: name.to_string(),
            account_type,
            role,
            depth,
            parent,
            row,
            values,
        })?;
        self.accounts += 1;
        Ok(())
    }
}

fn indentation(raw: &str) -> usize {
    raw.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Index of the last non-empty cell plus one.
fn extent(cells: &[String]) -> usize {
    cells
        .iter()
        .rposition(|c| !c.trim().is_empty())
        .map(|p| p + 1)
        .unwrap_or(0)
}

fn is_numeric_row(cells: &[String]) -> bool {
    cells
        .iter()
        .any(|c| matches!(utils::parse_amount(c), AmountCell::Value(_)))
}

/// Most common extent among the numeric rows below `start`; ties go to the wider.
fn modal_numeric_extent(table: &RawTable, start: usize) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for row in table.rows.iter().skip(start) {
        let cells = row.get(1..).unwrap_or(&[]);
        if is_numeric_row(cells) {
            *counts.entry(extent(cells)).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(width, _)| width)
}

fn header_candidate(index: usize, row: &[String]) -> Option<Header> {
    let cells = row.get(1..).unwrap_or(&[]);
    let width = extent(cells);
    if width == 0 {
        return None;
    }

    let mut periods = Vec::new();
    let mut total_column = None;
    for (offset, cell) in cells[..width].iter().enumerate() {
        let token = cell.trim();
        let column = offset + 1;
        if utils::is_total_column_label(token) {
            total_column = Some(column);
        } else if utils::is_date_like(token) {
            periods.push(Period {
                index: periods.len(),
                label: token.to_string(),
                column,
            });
        } else {
            return None;
        }
    }

    if periods.is_empty() {
        return None;
    }
    Some(Header {
        row: index,
        width,
        periods,
        total_column,
    })
}

fn find_header(table: &RawTable) -> Result<Header> {
    let mut first_candidate = None;
    for (index, row) in table.rows.iter().enumerate() {
        let Some(candidate) = header_candidate(index, row) else {
            continue;
        };
        match modal_numeric_extent(table, index + 1) {
            Some(modal) if modal != candidate.width => {
                debug!(
                    "Row {} looks like a header but has {} value columns, data rows have {}",
                    index + 1,
                    candidate.width,
                    modal
                );
                if first_candidate.is_none() {
                    first_candidate = Some(candidate);
                }
            }
            _ => return Ok(candidate),
        }
    }
    first_candidate.ok_or(InsightError::HeaderNotFound)
}

fn read_preamble(table: &RawTable, header: &Header) -> ReportMetadata {
    let mut metadata = ReportMetadata {
        has_total_column: header.total_column.is_some(),
        ..ReportMetadata::default()
    };

    for row in table.rows.iter().take(header.row) {
        let Some(text) = row.iter().map(|c| c.trim()).find(|c| !c.is_empty()) else {
            continue;
        };
        let lower = text.to_lowercase();
        let is_title = ["profit and loss", "profit & loss", "income statement"]
            .iter()
            .any(|t| lower.contains(t));

        if is_title && metadata.title.is_none() {
            metadata.title = Some(text.to_string());
        } else if utils::is_date_like(text) && metadata.date_range.is_none() {
            metadata.date_range = Some(text.to_string());
        } else if metadata.company.is_none() && !is_title {
            metadata.company = Some(text.to_string());
        }
    }
    metadata
}

/// Reads one value per period, enforcing the header's width first.
fn read_values(
    header: &Header,
    row_number: usize,
    label: &str,
    cells: &[String],
) -> Result<Vec<LineValue>> {
    let used = extent(cells);
    if used > 0 && (cells.len() < header.width || used > header.width) {
        return Err(InsightError::RowLengthMismatch {
            row: row_number,
            account: label.to_string(),
            expected: header.width,
            found: if used > header.width { used } else { cells.len() },
        });
    }

    header
        .periods
        .iter()
        .map(|period| {
            let raw = cells.get(period.column - 1).map(|c| c.trim()).unwrap_or("");
            match utils::parse_amount(raw) {
                AmountCell::Blank => Ok(None),
                AmountCell::Value(v) => Ok(Some(v)),
                AmountCell::NotNumeric => Err(InsightError::InvalidNumber {
                    row: row_number,
                    column: period.column + 1,
                    value: raw.to_string(),
                }),
            }
        })
        .collect()
}
