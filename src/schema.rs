use crate::error::{BridgeError, Result};
use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A display row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Column names of the two input tables. These are part of the input contract
/// and are matched exactly (case and punctuation included).
pub mod columns {
    pub const OPPORTUNITY_NAME: &str = "Opportunity Name";
    pub const ACCOUNT_NAME: &str = "Account Name";
    pub const OPPORTUNITY_OWNER: &str = "Opportunity Owner";
    pub const STAGE: &str = "Stage";
    pub const TYPE: &str = "Type";
    pub const CREATED_DATE: &str = "Created Date";
    pub const CLOSE_DATE: &str = "Close Date";
    pub const AGE: &str = "Age";
    pub const NET_NEW_DOLLARS: &str = "Net-New Dollars";

    pub const FROM_STAGE: &str = "From Stage";
    pub const TO_STAGE: &str = "To Stage";
    pub const LAST_MODIFIED: &str = "Last Modified";
    pub const AMOUNT: &str = "Amount";
    pub const EXPECTED_REVENUE: &str = "Expected Revenue";

    pub const OPPORTUNITY_REQUIRED: [&str; 9] = [
        OPPORTUNITY_NAME,
        ACCOUNT_NAME,
        OPPORTUNITY_OWNER,
        STAGE,
        TYPE,
        CREATED_DATE,
        CLOSE_DATE,
        AGE,
        NET_NEW_DOLLARS,
    ];

    pub const TRANSITION_REQUIRED: [&str; 5] = [
        OPPORTUNITY_NAME,
        FROM_STAGE,
        TO_STAGE,
        LAST_MODIFIED,
        CLOSE_DATE,
    ];
}

pub const OPPORTUNITIES_TABLE: &str = "opportunities";
pub const TRANSITIONS_TABLE: &str = "transitions";

pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct StageVocabulary {
    #[schemars(description = "Stage name marking a won deal.")]
    pub won: String,

    #[schemars(description = "Stage names marking a lost deal (lost or sent back to nurture).")]
    pub lost: Vec<String>,

    #[schemars(
        description = "Stage marking an SQL accepted by an AE. Treated as a boundary stage: deals sitting in it are not open pipeline."
    )]
    pub accepted: String,
}

impl Default for StageVocabulary {
    fn default() -> Self {
        Self {
            won: "Closed Won".to_string(),
            lost: vec!["Closed Lost".to_string(), "Closed Nurture".to_string()],
            accepted: "SQL - AE Accepted".to_string(),
        }
    }
}

impl StageVocabulary {
    pub fn is_won(&self, stage: &str) -> bool {
        self.won == stage
    }

    pub fn is_lost(&self, stage: &str) -> bool {
        self.lost.iter().any(|s| s == stage)
    }

    /// Won, lost, and the accepted boundary stage.
    pub fn is_terminal(&self, stage: &str) -> bool {
        self.is_won(stage) || self.is_lost(stage) || self.accepted == stage
    }

    /// Stages a deal lands in when it closes, either way.
    pub fn is_closing(&self, stage: &str) -> bool {
        self.is_won(stage) || self.is_lost(stage)
    }

    pub fn is_open(&self, stage: &str) -> bool {
        !self.is_terminal(stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct BridgeConfig {
    #[schemars(
        description = "Only opportunities whose Type equals this value take part in the bridge."
    )]
    pub opportunity_type: String,

    pub stages: StageVocabulary,

    #[schemars(description = "Divisor applied to chart values (1000000 reports in millions).")]
    pub value_scale: f64,

    #[schemars(description = "Decimal places chart values are rounded to.")]
    pub decimal_places: u32,

    #[schemars(
        description = "When an opportunity has no transition on or before the start date, treat it as open at the start if its current stage is open, using its current close date."
    )]
    pub assume_open_without_history: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            opportunity_type: "New Customer".to_string(),
            stages: StageVocabulary::default(),
            value_scale: 1_000_000.0,
            decimal_places: 2,
            assume_open_without_history: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.value_scale.is_finite() && self.value_scale > 0.0) {
            return Err(BridgeError::InvalidConfig(format!(
                "value_scale must be a positive number, got {}",
                self.value_scale
            )));
        }
        if self.decimal_places > 10 {
            return Err(BridgeError::InvalidConfig(format!(
                "decimal_places must be at most 10, got {}",
                self.decimal_places
            )));
        }
        if self.opportunity_type.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "opportunity_type must not be empty".to_string(),
            ));
        }
        let stages = &self.stages;
        if stages.won.is_empty()
            || stages.accepted.is_empty()
            || stages.lost.is_empty()
            || stages.lost.iter().any(|s| s.is_empty())
        {
            return Err(BridgeError::InvalidConfig(
                "stage names must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(BridgeConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// Parameters of a store-backed bridge run. Field names follow the query
/// parameters of the pipeline endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    #[schemars(description = "Start of the analysis window, YYYY-MM-DD.")]
    pub start_date: String,

    #[schemars(description = "End of the analysis window, YYYY-MM-DD. Must not precede startDate.")]
    pub end_date: String,

    #[schemars(description = "Store identifier of the opportunity snapshot table.")]
    pub data_file: String,

    #[schemars(description = "Store identifier of the stage transition history table.")]
    pub history_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    BeginningPipeline,
    AdjustedNewPipeline,
    Won,
    Lost,
    PulledToCurrentPeriod,
    PushedToNextPeriod,
    EndingPipeline,
}

impl Category {
    /// Waterfall order.
    pub const ALL: [Category; 7] = [
        Category::BeginningPipeline,
        Category::AdjustedNewPipeline,
        Category::Won,
        Category::Lost,
        Category::PulledToCurrentPeriod,
        Category::PushedToNextPeriod,
        Category::EndingPipeline,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::BeginningPipeline => "Beginning Pipeline",
            Category::AdjustedNewPipeline => "Adjusted New Pipeline",
            Category::Won => "Won",
            Category::Lost => "Lost",
            Category::PulledToCurrentPeriod => "Pulled to Current Period",
            Category::PushedToNextPeriod => "Pushed to Next Period",
            Category::EndingPipeline => "Ending Pipeline",
        }
    }

    /// Sign of the category in the waterfall. Beginning and Ending are levels.
    pub fn sign(&self) -> f64 {
        match self {
            Category::Won | Category::Lost | Category::PushedToNextPeriod => -1.0,
            _ => 1.0,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized row of the opportunity snapshot table.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub name: String,
    pub account_name: String,
    pub owner: String,
    pub stage: String,
    pub opportunity_type: String,
    pub created_date: NaiveDateTime,
    pub close_date: NaiveDateTime,
    pub age: f64,
    pub net_new_dollars: f64,
    /// Position of the row in the uploaded table.
    pub source_row: usize,
    /// Passthrough display columns; missing cells are empty strings.
    pub extra: BTreeMap<String, String>,
}

impl Opportunity {
    /// Display row with `Amount` and `Expected Revenue` null-filled.
    pub fn to_row(&self) -> Row {
        let mut row = self.fields_row();
        fill_monetary_passthrough(&mut row, true);
        row
    }

    /// The snapshot columns only, as used when joining against history rows.
    pub fn fields_row(&self) -> Row {
        let mut row = Row::new();
        for (column, value) in &self.extra {
            row.insert(column.clone(), Value::String(value.clone()));
        }
        row.insert(columns::OPPORTUNITY_NAME.into(), self.name.clone().into());
        row.insert(columns::ACCOUNT_NAME.into(), self.account_name.clone().into());
        row.insert(columns::OPPORTUNITY_OWNER.into(), self.owner.clone().into());
        row.insert(columns::STAGE.into(), self.stage.clone().into());
        row.insert(columns::TYPE.into(), self.opportunity_type.clone().into());
        row.insert(columns::CREATED_DATE.into(), format_datetime(self.created_date));
        row.insert(columns::CLOSE_DATE.into(), format_datetime(self.close_date));
        row.insert(columns::AGE.into(), number(self.age));
        row.insert(columns::NET_NEW_DOLLARS.into(), number(self.net_new_dollars));
        row
    }
}

/// A normalized row of the stage transition history table.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub opportunity_name: String,
    pub from_stage: String,
    pub to_stage: String,
    pub last_modified: NaiveDateTime,
    /// Close date as recorded when this transition happened.
    pub close_date: NaiveDateTime,
    pub amount: f64,
    pub expected_revenue: f64,
    pub source_row: usize,
    pub extra: BTreeMap<String, String>,
}

impl Transition {
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        for (column, value) in &self.extra {
            row.insert(column.clone(), Value::String(value.clone()));
        }
        row.insert(
            columns::OPPORTUNITY_NAME.into(),
            self.opportunity_name.clone().into(),
        );
        row.insert(columns::FROM_STAGE.into(), self.from_stage.clone().into());
        row.insert(columns::TO_STAGE.into(), self.to_stage.clone().into());
        row.insert(columns::LAST_MODIFIED.into(), format_datetime(self.last_modified));
        row.insert(columns::CLOSE_DATE.into(), format_datetime(self.close_date));
        row.insert(columns::AMOUNT.into(), number(self.amount));
        row.insert(columns::EXPECTED_REVENUE.into(), number(self.expected_revenue));
        row
    }
}

/// Joins two rows on `on`. Columns present on both sides get the matching
/// suffix; the join column is kept once.
pub fn merge_rows(left: &Row, right: &Row, on: &str, suffixes: (&str, &str)) -> Row {
    let mut merged = Row::new();
    for (column, value) in left {
        if column != on && right.contains_key(column) {
            merged.insert(format!("{}{}", column, suffixes.0), value.clone());
        } else {
            merged.insert(column.clone(), value.clone());
        }
    }
    for (column, value) in right {
        if column == on {
            continue;
        }
        if left.contains_key(column) {
            merged.insert(format!("{}{}", column, suffixes.1), value.clone());
        } else {
            merged.insert(column.clone(), value.clone());
        }
    }
    merged
}

/// Null-fills `Amount` and `Expected Revenue`. With `insert_missing` the
/// columns are added when absent.
pub fn fill_monetary_passthrough(row: &mut Row, insert_missing: bool) {
    for column in [columns::AMOUNT, columns::EXPECTED_REVENUE] {
        let replacement = match row.get(column) {
            None => insert_missing.then(|| number(0.0)),
            Some(Value::Null) => Some(number(0.0)),
            Some(Value::String(s)) if s.trim().is_empty() => Some(number(0.0)),
            Some(Value::String(s)) => crate::normalizer::parse_currency(s).map(number),
            Some(_) => None,
        };
        if let Some(value) = replacement {
            row.insert(column.to_string(), value);
        }
    }
}

pub(crate) fn format_datetime(value: NaiveDateTime) -> Value {
    Value::String(value.format(DATETIME_FORMAT).to_string())
}

pub(crate) fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_round_trips_through_json() {
        let json = serde_json::to_string(&BridgeConfig::default()).unwrap();
        let parsed = BridgeConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, BridgeConfig::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = BridgeConfig::from_json_str(r#"{"value_scale": 1000.0}"#).unwrap();
        assert_eq!(config.value_scale, 1000.0);
        assert_eq!(config.opportunity_type, "New Customer");
        assert_eq!(config.decimal_places, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = BridgeConfig::from_json_str(r#"{"value_scale": 0.0}"#).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));

        let err = BridgeConfig::from_json_str(r#"{"decimal_places": 42}"#).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = BridgeConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("opportunity_type"));
        assert!(schema_json.contains("value_scale"));
        assert!(schema_json.contains("assume_open_without_history"));
    }

    #[test]
    fn test_terminal_stages() {
        let stages = StageVocabulary::default();
        for stage in ["Closed Lost", "Closed Nurture", "Closed Won", "SQL - AE Accepted"] {
            assert!(stages.is_terminal(stage), "{} should be terminal", stage);
        }
        assert!(stages.is_open("Proposal"));
        assert!(stages.is_open(""));
        assert!(!stages.is_closing("SQL - AE Accepted"));
    }

    #[test]
    fn test_request_uses_camel_case() {
        let request: BridgeRequest = serde_json::from_value(json!({
            "startDate": "2024-01-01",
            "endDate": "2024-06-30",
            "dataFile": "opps.csv",
            "historyFile": "history.csv"
        }))
        .unwrap();
        assert_eq!(request.history_file, "history.csv");
    }

    #[test]
    fn test_merge_rows_suffixes_overlapping_columns() {
        let left = json!({"Opportunity Name": "A", "Close Date": "x", "To Stage": "Closed Lost"});
        let right = json!({"Opportunity Name": "A", "Close Date": "y", "Stage": "Closed Lost"});
        let merged = merge_rows(
            left.as_object().unwrap(),
            right.as_object().unwrap(),
            columns::OPPORTUNITY_NAME,
            ("_history", "_pipeline"),
        );
        assert_eq!(merged["Opportunity Name"], "A");
        assert_eq!(merged["Close Date_history"], "x");
        assert_eq!(merged["Close Date_pipeline"], "y");
        assert_eq!(merged["To Stage"], "Closed Lost");
        assert_eq!(merged["Stage"], "Closed Lost");
        assert!(!merged.contains_key("Close Date"));
    }

    #[test]
    fn test_fill_monetary_passthrough() {
        let mut row = json!({"Amount": "", "Expected Revenue": "$1,500"})
            .as_object()
            .unwrap()
            .clone();
        fill_monetary_passthrough(&mut row, false);
        assert_eq!(row["Amount"], json!(0.0));
        assert_eq!(row["Expected Revenue"], json!(1500.0));

        let mut bare = Row::new();
        fill_monetary_passthrough(&mut bare, true);
        assert_eq!(bare["Amount"], json!(0.0));
        assert_eq!(bare["Expected Revenue"], json!(0.0));
    }
}
