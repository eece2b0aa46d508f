use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// A calendar month as `(year, month)`, month in `1..=12`.
pub type YearMonth = (i32, u32);

static MONTH_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b\.?",
    )
    .unwrap()
});

static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}[-/.]\d{1,2}([-/.]\d{1,2})?|\d{1,2}[-/.]\d{4}|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4})$")
        .unwrap()
});

static QUARTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(q[1-4]|fy\s*-?\s*(19|20)?\d{2})\b").unwrap());

static FOUR_DIGIT_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());

static MONTH_SHORT_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z]+\.?[\s\-/']*(\d{2})$").unwrap()
});

static YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[-/.](\d{1,2})(?:[-/.](\d{1,2}))?$").unwrap());

static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2})[-/.](\d{4})$").unwrap());

static CURRENCY_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[$€£¥,\s]").unwrap());

/// Outcome of reading one spreadsheet cell as an amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountCell {
    /// Empty cell: no activity, distinct from zero.
    Blank,
    Value(f64),
    NotNumeric,
}

/// Parses accounting notation: `$1,234.50`, `(250.00)`, `250-`, `€ 12`, `-`.
///
/// A lone dash is the accounting convention for zero.
pub fn parse_amount(raw: &str) -> AmountCell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return AmountCell::Blank;
    }
    if matches!(trimmed, "-" | "–" | "—") {
        return AmountCell::Value(0.0);
    }

    let cleaned = CURRENCY_NOISE.replace_all(trimmed, "");
    let mut s: &str = &cleaned;
    let mut negative = false;

    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner;
    } else if let Some(inner) = s.strip_suffix('-') {
        negative = true;
        s = inner;
    }

    if s.is_empty() || !s.chars().any(|c| c.is_ascii_digit()) {
        return AmountCell::NotNumeric;
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return AmountCell::NotNumeric;
    }

    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => AmountCell::Value(if negative { -v } else { v }),
        _ => AmountCell::NotNumeric,
    }
}

/// True for header tokens that name a reporting period.
///
/// Pure numbers are never date-like, so a numeric data row cannot be mistaken
/// for the header. Any token carrying a four-digit year plus letters counts,
/// which admits non-English month labels such as `janv. 2025`.
pub fn is_date_like(token: &str) -> bool {
    let t = token.trim();
    if t.is_empty() {
        return false;
    }
    if MONTH_WORD.is_match(t) || NUMERIC_DATE.is_match(t) || QUARTER.is_match(t) {
        return true;
    }
    FOUR_DIGIT_YEAR.is_match(t) && t.chars().any(|c| c.is_alphabetic())
}

/// Header label of the per-row total column many exports append.
pub fn is_total_column_label(token: &str) -> bool {
    token.trim().eq_ignore_ascii_case("total")
}

fn month_from_word(word: &str) -> Option<u32> {
    let lower = word.to_ascii_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Interprets a period label as a calendar month, when it names exactly one.
///
/// Only used to line ledger dates up with P&L columns; period order never
/// depends on this.
pub fn parse_period_month(label: &str) -> Option<YearMonth> {
    let t = label.trim();

    if let Some(caps) = YEAR_MONTH.captures(t) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        return (1..=12).contains(&month).then_some((year, month));
    }
    if let Some(caps) = MONTH_YEAR.captures(t) {
        let month: u32 = caps[1].parse().ok()?;
        let year: i32 = caps[2].parse().ok()?;
        return (1..=12).contains(&month).then_some((year, month));
    }

    let months: Vec<u32> = MONTH_WORD
        .captures_iter(t)
        .map(|caps| month_from_word(&caps[1]))
        .collect::<Option<_>>()?;
    let (&month, rest) = months.split_first()?;
    // "Jan - Mar 2025" spans several months, "Jan 1 - Jan 31, 2025" does not
    if rest.iter().any(|m| *m != month) {
        return None;
    }

    let years: Vec<&str> = FOUR_DIGIT_YEAR.captures_iter(t).filter_map(|c| c.get(1)).map(|m| m.as_str()).collect();
    if let Some((&year, others)) = years.split_first() {
        if others.iter().any(|y| *y != year) {
            return None;
        }
        return Some((year.parse().ok()?, month));
    }
    let caps = MONTH_SHORT_YEAR.captures(t)?;
    let short: i32 = caps[1].parse().ok()?;
    Some((2000 + short, month))
}

/// Converts an Excel serial day number to a date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.trunc() as i64))
}

fn parse_slash_date(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].trim().parse().ok()?;
    let d: u32 = parts[1].trim().parse().ok()?;
    let year_part = parts[2].trim();
    let y: i32 = year_part.parse().ok()?;
    let y = match year_part.len() {
        2 => 2000 + y,
        4 => y,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Parses the date formats ledger exports use, including Excel serials.
pub fn parse_transaction_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(date) = parse_slash_date(t) {
        return Some(date);
    }

    // "2025-01-15 00:00:00" from spreadsheet datetimes
    let date_part = t.split(|c| c == ' ' || c == 'T').next().unwrap_or(t);
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d-%b-%Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Some(date);
        }
    }
    for format in ["%b %d, %Y", "%B %d, %Y", "%d-%b-%Y", "%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(t, format) {
            return Some(date);
        }
    }

    if let Ok(serial) = t.parse::<f64>() {
        return excel_serial_to_date(serial);
    }
    None
}

pub fn year_month(date: NaiveDate) -> YearMonth {
    (date.year(), date.month())
}

pub fn next_month((year, month): YearMonth) -> YearMonth {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

pub fn months_between(start: YearMonth, end: YearMonth) -> i32 {
    let year_diff = end.0 - start.0;
    let month_diff = end.1 as i32 - start.1 as i32;
    year_diff * 12 + month_diff
}

/// Every month from `start` to `end`, both inclusive.
pub fn month_span(start: YearMonth, end: YearMonth) -> Vec<YearMonth> {
    let mut months = Vec::new();
    let mut current = start;
    while current <= end {
        months.push(current);
        current = next_month(current);
    }
    months
}

static ACCOUNT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?(?:\s*[-·:.]\s*|\s+)").unwrap());

/// Drops a leading account number: `1000 Rent`, `1000-Rent`, `1000 · Rent`.
pub fn strip_account_number(name: &str) -> &str {
    let trimmed = name.trim();
    match ACCOUNT_NUMBER.find(trimmed) {
        Some(m) if m.end() < trimmed.len() => &trimmed[m.end()..],
        _ => trimmed,
    }
}

/// Last segment of a colon path: `Office:Rent` → `Rent`.
pub fn leaf_segment(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name).trim()
}

/// Finds the candidate an account name refers to.
///
/// Tries, in order: exact name, case-insensitive name, name without a leading
/// account number, and the last colon-path segment.
pub fn find_account_match<T: Copy>(query: &str, candidates: &[(&str, T)]) -> Option<T> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    let keys: [fn(&str) -> String; 4] = [
        |n| n.trim().to_string(),
        |n| n.trim().to_lowercase(),
        |n| strip_account_number(n).to_lowercase(),
        |n| leaf_segment(strip_account_number(n)).to_lowercase(),
    ];

    keys.iter().find_map(|key| {
        let wanted = key(query);
        candidates
            .iter()
            .find(|(name, _)| key(name) == wanted)
            .map(|(_, value)| *value)
    })
}

/// Accounting style: `$1,234.56`, negatives as `($1,234.56)`.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let body = format!("${}.{:02}", grouped, cents % 100);
    if amount < 0.0 && cents > 0 {
        format!("({})", body)
    } else {
        body
    }
}

/// `0.253` → `+25.3%`
pub fn format_percent(fraction: f64) -> String {
    format!("{:+.1}%", fraction * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_accounting_notation() {
        assert_eq!(parse_amount("1,234.50"), AmountCell::Value(1234.5));
        assert_eq!(parse_amount("$1,000"), AmountCell::Value(1000.0));
        assert_eq!(parse_amount("(250.00)"), AmountCell::Value(-250.0));
        assert_eq!(parse_amount("($1,250.00)"), AmountCell::Value(-1250.0));
        assert_eq!(parse_amount("250-"), AmountCell::Value(-250.0));
        assert_eq!(parse_amount("€ 12"), AmountCell::Value(12.0));
        assert_eq!(parse_amount("-42.1"), AmountCell::Value(-42.1));
    }

    #[test]
    fn test_parse_amount_blank_dash_and_garbage() {
        assert_eq!(parse_amount(""), AmountCell::Blank);
        assert_eq!(parse_amount("   "), AmountCell::Blank);
        assert_eq!(parse_amount("-"), AmountCell::Value(0.0));
        assert_eq!(parse_amount("n/a"), AmountCell::NotNumeric);
        assert_eq!(parse_amount("12abc"), AmountCell::NotNumeric);
        assert_eq!(parse_amount("$"), AmountCell::NotNumeric);
        assert_eq!(parse_amount("inf"), AmountCell::NotNumeric);
    }

    #[test]
    fn test_is_date_like() {
        assert!(is_date_like("Jan 2025"));
        assert!(is_date_like("January 2025"));
        assert!(is_date_like("Sept. 2024"));
        assert!(is_date_like("Jan-25"));
        assert!(is_date_like("2025-01"));
        assert!(is_date_like("01/2025"));
        assert!(is_date_like("Q1 2025"));
        assert!(is_date_like("janv. 2025"));
        assert!(is_date_like("Jan 1 - Jan 31, 2025"));

        assert!(!is_date_like("2025"));
        assert!(!is_date_like("1,000.00"));
        assert!(!is_date_like("Total"));
        assert!(!is_date_like("Rent"));
        assert!(!is_date_like(""));
    }

    #[test]
    fn test_parse_period_month() {
        assert_eq!(parse_period_month("Jan 2025"), Some((2025, 1)));
        assert_eq!(parse_period_month("December 2024"), Some((2024, 12)));
        assert_eq!(parse_period_month("Feb-25"), Some((2025, 2)));
        assert_eq!(parse_period_month("2025-03"), Some((2025, 3)));
        assert_eq!(parse_period_month("2025-03-31"), Some((2025, 3)));
        assert_eq!(parse_period_month("04/2025"), Some((2025, 4)));
        assert_eq!(parse_period_month("Jan 1-31, 2025"), Some((2025, 1)));
        assert_eq!(parse_period_month("Jan - Mar 2025"), None);
        assert_eq!(parse_period_month("Jan 1 - Jan 31, 2025"), Some((2025, 1)));
        assert_eq!(parse_period_month("Feb 1, 2025 - Feb 28, 2025"), Some((2025, 2)));
        assert_eq!(parse_period_month("Jan 2024 - Jan 2025"), None);
        assert_eq!(parse_period_month("Q1 2025"), None);
        assert_eq!(parse_period_month("2025-13"), None);
    }

    #[test]
    fn test_parse_transaction_date_formats() {
        let jan_15 = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(parse_transaction_date("01/15/2025"), Some(jan_15));
        assert_eq!(parse_transaction_date("1/15/25"), Some(jan_15));
        assert_eq!(parse_transaction_date("2025-01-15"), Some(jan_15));
        assert_eq!(parse_transaction_date("2025-01-15 00:00:00"), Some(jan_15));
        assert_eq!(parse_transaction_date("15-Jan-2025"), Some(jan_15));
        assert_eq!(parse_transaction_date("Jan 15, 2025"), Some(jan_15));
        assert_eq!(parse_transaction_date("45672"), Some(jan_15));
        assert_eq!(parse_transaction_date("13/45/2025"), None);
        assert_eq!(parse_transaction_date("soon"), None);
    }

    #[test]
    fn test_month_span_crosses_year_end() {
        let span = month_span((2024, 11), (2025, 2));
        assert_eq!(span, vec![(2024, 11), (2024, 12), (2025, 1), (2025, 2)]);
        assert_eq!(months_between((2024, 11), (2025, 2)), 3);
        assert!(month_span((2025, 2), (2025, 1)).is_empty());
    }

    #[test]
    fn test_account_name_matching() {
        assert_eq!(strip_account_number("1000 Rent"), "Rent");
        assert_eq!(strip_account_number("1000-Rent"), "Rent");
        assert_eq!(strip_account_number("6010 · Rent"), "Rent");
        assert_eq!(strip_account_number("401k Match"), "401k Match");
        assert_eq!(strip_account_number("2024"), "2024");
        assert_eq!(leaf_segment("Office:Rent"), "Rent");

        let candidates = [("Rent", 0), ("Office Supplies", 1), ("Utilities", 2)];
        assert_eq!(find_account_match("Rent", &candidates), Some(0));
        assert_eq!(find_account_match("office supplies", &candidates), Some(1));
        assert_eq!(find_account_match("6200 Utilities", &candidates), Some(2));
        assert_eq!(find_account_match("Facilities:Rent", &candidates), Some(0));
        assert_eq!(find_account_match("Travel", &candidates), None);
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(1234.5), "$1,234.50");
        assert_eq!(format_currency(-400.0), "($400.00)");
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(1_000_000.0), "$1,000,000.00");
        assert_eq!(format_percent(2.0), "+200.0%");
        assert_eq!(format_percent(-0.25), "-25.0%");
    }
}
