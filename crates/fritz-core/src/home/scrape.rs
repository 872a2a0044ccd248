// Thermostat overview table scraping, used when the firmware has no
// structured device list.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::warn;

use super::devices::ThermostatRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("markup contains no table")]
    NoTable,
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
}

struct RowSelectors {
    name: Selector,
    current: Selector,
    target: Selector,
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|err| ParseError::Selector {
        selector: css.to_string(),
        message: err.to_string(),
    })
}

// the target display splits value and unit into sibling spans
fn cell_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

/// Parses "24,0 °C" style numbers: first comma becomes the decimal point,
/// surrounding whitespace and unit markers are dropped.
pub fn parse_decimal(text: &str) -> Option<f64> {
    text.replacen(',', ".", 1)
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '°' | 'C' | 'F'))
        .parse()
        .ok()
}

/// Extracts every well-formed thermostat row of the first table.
///
/// Rows with a missing cell or an unparsable number are skipped with a
/// warning; only a missing table fails the whole parse.
pub fn parse_thermostat_table(markup: &str) -> Result<Vec<ThermostatRecord>, ParseError> {
    let document = Html::parse_fragment(markup);
    let table = document
        .select(&selector("table")?)
        .next()
        .ok_or(ParseError::NoTable)?;

    let rows = selector("tr")?;
    let cells = RowSelectors {
        name: selector("td.name")?,
        current: selector("td.temperature")?,
        target: selector("td.target_temperature .numdisplay")?,
    };

    let mut records = Vec::new();
    for (index, row) in table.select(&rows).enumerate() {
        if row.value().classes().any(|class| class == "thead") {
            continue;
        }
        if let Some(record) = parse_row(index, row, &cells) {
            records.push(record);
        }
    }

    Ok(records)
}

fn parse_row(index: usize, row: ElementRef<'_>, cells: &RowSelectors) -> Option<ThermostatRecord> {
    let text_of = |selector: &Selector, field: &str| {
        let text = row.select(selector).next().map(cell_text);
        if text.is_none() {
            warn!(row = index, field, "thermostat row without cell, skipping");
        }
        text
    };
    let number_of = |text: &str, field: &str| {
        let value = parse_decimal(text);
        if value.is_none() {
            warn!(row = index, field, text, "unparsable number, skipping row");
        }
        value
    };

    let name = text_of(&cells.name, "name")?;
    let current = text_of(&cells.current, "temperature")?;
    let target = text_of(&cells.target, "target_temperature")?;

    Some(ThermostatRecord {
        current_temperature: Some(number_of(&current, "temperature")?),
        target_temperature: Some(number_of(&target, "target_temperature")?),
        name,
    })
}
