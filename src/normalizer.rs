use crate::error::{BridgeError, Result};
use crate::ingestion::RawTable;
use crate::schema::{columns, Opportunity, Transition, OPPORTUNITIES_TABLE, TRANSITIONS_TABLE};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DATETIME_FORMATS: [&str; 10] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%Y/%m/%d %H:%M:%S",
    "%d-%b-%Y %H:%M:%S",
];

// Two-digit years are tried first: `%Y` would otherwise read "24" as year 24.
const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y", "%b %d, %Y", "%B %d, %Y",
];

/// Row accounting for one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub opportunity_rows: usize,
    pub opportunities_kept: usize,
    pub opportunities_dropped_for_dates: usize,
    pub opportunities_dropped_for_amounts: usize,
    pub coerced_ages: usize,
    pub transition_rows: usize,
    pub transitions_kept: usize,
    pub transitions_dropped_for_dates: usize,
    pub coerced_transition_amounts: usize,
}

impl NormalizationReport {
    pub fn dropped_rows(&self) -> usize {
        self.opportunities_dropped_for_dates
            + self.opportunities_dropped_for_amounts
            + self.transitions_dropped_for_dates
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedTables {
    pub opportunities: Vec<Opportunity>,
    pub transitions: Vec<Transition>,
    pub report: NormalizationReport,
}

pub fn normalize(opportunities: &RawTable, transitions: &RawTable) -> Result<NormalizedTables> {
    let mut report = NormalizationReport::default();
    let opportunities = normalize_opportunities(opportunities, &mut report)?;
    let transitions = normalize_transitions(transitions, &mut report)?;

    if report.dropped_rows() > 0 {
        warn!(
            "Dropped {} opportunity rows with unparsable dates, {} with non-numeric Net-New Dollars, {} transition rows with unparsable dates",
            report.opportunities_dropped_for_dates,
            report.opportunities_dropped_for_amounts,
            report.transitions_dropped_for_dates
        );
    }

    Ok(NormalizedTables {
        opportunities,
        transitions,
        report,
    })
}

pub fn normalize_opportunities(
    table: &RawTable,
    report: &mut NormalizationReport,
) -> Result<Vec<Opportunity>> {
    table.require_columns(OPPORTUNITIES_TABLE, &columns::OPPORTUNITY_REQUIRED)?;
    report.opportunity_rows += table.len();

    let mut opportunities = Vec::with_capacity(table.len());
    let mut non_empty_amounts = 0usize;
    let mut invalid_amount_sample: Option<String> = None;
    let mut non_empty_ages = 0usize;
    let mut invalid_age_sample: Option<String> = None;

    for (idx, raw) in table.rows.iter().enumerate() {
        let created = parse_flexible_datetime(cell(raw, columns::CREATED_DATE));
        let close = parse_flexible_datetime(cell(raw, columns::CLOSE_DATE));
        let (created_date, close_date) = match (created, close) {
            (Some(created), Some(close)) => (created, close),
            _ => {
                report.opportunities_dropped_for_dates += 1;
                continue;
            }
        };

        let raw_amount = cell(raw, columns::NET_NEW_DOLLARS);
        let net_new_dollars = if raw_amount.trim().is_empty() {
            0.0
        } else {
            non_empty_amounts += 1;
            match parse_currency(raw_amount) {
                Some(value) => value,
                None => {
                    report.opportunities_dropped_for_amounts += 1;
                    invalid_amount_sample.get_or_insert_with(|| raw_amount.to_string());
                    continue;
                }
            }
        };

        let raw_age = cell(raw, columns::AGE);
        let age = if raw_age.trim().is_empty() {
            0.0
        } else {
            non_empty_ages += 1;
            parse_number(raw_age).unwrap_or_else(|| {
                report.coerced_ages += 1;
                invalid_age_sample.get_or_insert_with(|| raw_age.to_string());
                0.0
            })
        };

        opportunities.push(Opportunity {
            name: cell(raw, columns::OPPORTUNITY_NAME).to_string(),
            account_name: cell(raw, columns::ACCOUNT_NAME).to_string(),
            owner: cell(raw, columns::OPPORTUNITY_OWNER).to_string(),
            stage: cell(raw, columns::STAGE).to_string(),
            opportunity_type: cell(raw, columns::TYPE).to_string(),
            created_date,
            close_date,
            age,
            net_new_dollars,
            source_row: idx,
            extra: passthrough(raw, &columns::OPPORTUNITY_REQUIRED),
        });
    }

    if let Some(sample) = invalid_amount_sample {
        if report.opportunities_dropped_for_amounts == non_empty_amounts {
            return Err(BridgeError::NonNumericColumn {
                table: OPPORTUNITIES_TABLE.to_string(),
                column: columns::NET_NEW_DOLLARS.to_string(),
                sample,
            });
        }
    }
    if let Some(sample) = invalid_age_sample {
        if report.coerced_ages == non_empty_ages {
            return Err(BridgeError::NonNumericColumn {
                table: OPPORTUNITIES_TABLE.to_string(),
                column: columns::AGE.to_string(),
                sample,
            });
        }
    }
    if report.coerced_ages > 0 {
        warn!("Coerced {} non-numeric Age values to 0", report.coerced_ages);
    }

    report.opportunities_kept += opportunities.len();
    Ok(opportunities)
}

pub fn normalize_transitions(
    table: &RawTable,
    report: &mut NormalizationReport,
) -> Result<Vec<Transition>> {
    table.require_columns(TRANSITIONS_TABLE, &columns::TRANSITION_REQUIRED)?;
    report.transition_rows += table.len();

    let mut transitions = Vec::with_capacity(table.len());
    for (idx, raw) in table.rows.iter().enumerate() {
        let last_modified = parse_flexible_datetime(cell(raw, columns::LAST_MODIFIED));
        let close = parse_flexible_datetime(cell(raw, columns::CLOSE_DATE));
        let (last_modified, close_date) = match (last_modified, close) {
            (Some(last_modified), Some(close)) => (last_modified, close),
            _ => {
                report.transitions_dropped_for_dates += 1;
                continue;
            }
        };

        let mut monetary = |column: &str| {
            let raw_value = cell(raw, column);
            if raw_value.trim().is_empty() {
                return 0.0;
            }
            parse_currency(raw_value).unwrap_or_else(|| {
                report.coerced_transition_amounts += 1;
                0.0
            })
        };
        let amount = monetary(columns::AMOUNT);
        let expected_revenue = monetary(columns::EXPECTED_REVENUE);

        transitions.push(Transition {
            opportunity_name: cell(raw, columns::OPPORTUNITY_NAME).to_string(),
            from_stage: cell(raw, columns::FROM_STAGE).to_string(),
            to_stage: cell(raw, columns::TO_STAGE).to_string(),
            last_modified,
            close_date,
            amount,
            expected_revenue,
            source_row: idx,
            extra: passthrough(
                raw,
                &[
                    columns::OPPORTUNITY_NAME,
                    columns::FROM_STAGE,
                    columns::TO_STAGE,
                    columns::LAST_MODIFIED,
                    columns::CLOSE_DATE,
                    columns::AMOUNT,
                    columns::EXPECTED_REVENUE,
                ],
            ),
        });
    }

    report.transitions_kept += transitions.len();
    Ok(transitions)
}

/// Tolerant date parser. Date-only values land at midnight.
pub fn parse_flexible_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(crate::utils::start_of_day(date));
        }
    }
    None
}

/// Strips currency symbols, thousands separators and whitespace, then parses.
/// Accounting negatives such as `(1,250.00)` are accepted. Returns `None` for
/// empty or non-numeric input.
pub fn parse_currency(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    match cleaned
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => parse_number(inner).map(|v| -v),
        None => parse_number(&cleaned),
    }
}

fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn cell<'a>(row: &'a BTreeMap<String, String>, column: &str) -> &'a str {
    row.get(column).map(String::as_str).unwrap_or("")
}

fn passthrough(row: &BTreeMap<String, String>, typed: &[&str]) -> BTreeMap<String, String> {
    row.iter()
        .filter(|(column, _)| !typed.contains(&column.as_str()))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}
