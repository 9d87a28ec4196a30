use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid {field} '{value}': expected YYYY-MM-DD")]
    InvalidDate { field: String, value: String },

    #[error("End date {end} is before start date {start}")]
    InvalidDateRange { start: String, end: String },

    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Column '{column}' in table '{table}' has no numeric values (e.g. '{sample}')")]
    NonNumericColumn {
        table: String,
        column: String,
        sample: String,
    },

    #[error("Table not found in store: {0}")]
    TableNotFound(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
