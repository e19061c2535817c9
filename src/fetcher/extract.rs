//! OTP extraction from the inbox page.
//!
//! The page lists messages as table rows. Rows are scanned in document
//! order and the first 6-digit token found wins, even when an unrelated
//! number (a date, an amount) appears before the real code.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

#[allow(clippy::expect_used)]
static OTP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9]{6})\b").expect("OTP pattern is valid"));

#[allow(clippy::expect_used)]
static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table tr").expect("row selector is valid"));

#[allow(clippy::expect_used)]
static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("cell selector is valid"));

/// Returns the first 6-digit token in the page's table rows.
#[must_use]
pub fn extract_first_otp(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    document
        .select(&ROW_SELECTOR)
        .find_map(|row| find_otp(&row_text(row)))
}

/// Text of the row's second cell, or of the whole row when it has fewer cells.
fn row_text(row: ElementRef<'_>) -> String {
    let mut cells = row.select(&CELL_SELECTOR);
    let source = match (cells.next(), cells.next()) {
        (Some(_), Some(second)) => second,
        _ => row,
    };
    source.text().collect::<Vec<_>>().join(" ")
}

/// First 6-digit token in a piece of text.
#[must_use]
pub fn find_otp(text: &str) -> Option<String> {
    OTP_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}
