//! # Pipeline Bridge
//!
//! A library for reconstructing how a sales pipeline's value changed between two
//! dates from an opportunity snapshot table and a stage-transition history log.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: One row per opportunity with its current stage, close date and value
//! - **History**: Append-only stage transitions, each carrying the close date recorded at that moment
//! - **Point-in-Time Status**: The stage of an opportunity as reconstructed from its history as of an instant
//! - **Bridge**: Beginning + New - Won - Lost + Pulled - Pushed = Ending, with any gap
//!   between the calculated and actual ending folded into the New bar of the chart
//!
//! ## Example
//!
//! ```rust,ignore
//! use pipeline_bridge::*;
//!
//! let opportunities = RawTable::from_csv_str(OPPORTUNITIES_CSV)?;
//! let history = RawTable::from_csv_str(HISTORY_CSV)?;
//!
//! let bridge = build_pipeline_bridge(&opportunities, &history, "2024-01-01", "2024-06-30")?;
//! for (category, value) in bridge.categories.iter().zip(&bridge.values) {
//!     println!("{category}: {value:.2}M");
//! }
//! ```

pub mod assembler;
pub mod categories;
pub mod error;
pub mod ingestion;
pub mod normalizer;
pub mod reconciler;
pub mod resolver;
pub mod schema;
pub mod utils;

pub use assembler::{assemble, BridgeResult};
pub use categories::{BridgeContext, CategoryResult};
pub use error::{BridgeError, Result};
pub use ingestion::*;
pub use normalizer::{normalize, NormalizationReport, NormalizedTables};
pub use reconciler::{CategoryTotals, Reconciliation};
pub use resolver::{latest_by_key, latest_status_overall, resolve_as_of, StatusView};
pub use schema::*;
pub use utils::*;

use log::{debug, info};

/// Entry point for building bridges from raw tables or a blob store.
pub struct PipelineBridgeProcessor;

impl PipelineBridgeProcessor {
    /// Validates `config`, normalizes both tables, computes the seven
    /// categories over `window` and assembles the reconciled result.
    ///
    /// Fails on missing required columns, an all non-numeric required
    /// numeric column, or an invalid configuration. Rows with bad dates or
    /// amounts are dropped and counted in the result's report.
    pub fn process(
        opportunities: &RawTable,
        history: &RawTable,
        window: Window,
        config: &BridgeConfig,
    ) -> Result<BridgeResult> {
        config.validate()?;

        info!(
            "Building pipeline bridge for {} to {} from {} opportunities and {} transitions",
            window.start.date(),
            window.end.date(),
            opportunities.len(),
            history.len()
        );

        let tables = normalize(opportunities, history)?;
        debug!(
            "Normalized {} opportunities and {} transitions",
            tables.opportunities.len(),
            tables.transitions.len()
        );

        let context = BridgeContext::new(&tables.opportunities, &tables.transitions, config, window);
        let results = context.compute_all();

        Ok(assemble(results, tables.report, config))
    }

    /// Validates the request dates, then fetches both tables from `store`.
    pub fn process_request<S: BlobStore + ?Sized>(
        store: &S,
        request: &BridgeRequest,
        config: &BridgeConfig,
    ) -> Result<BridgeResult> {
        let window = Window::from_iso(&request.start_date, &request.end_date)?;
        let opportunities = store.fetch_table(&request.data_file)?;
        let history = store.fetch_table(&request.history_file)?;
        Self::process(&opportunities, &history, window, config)
    }
}

/// Builds a bridge with the default configuration from ISO `YYYY-MM-DD`
/// start and end dates.
pub fn build_pipeline_bridge(
    opportunities: &RawTable,
    history: &RawTable,
    start_date: &str,
    end_date: &str,
) -> Result<BridgeResult> {
    let window = Window::from_iso(start_date, end_date)?;
    PipelineBridgeProcessor::process(opportunities, history, window, &BridgeConfig::default())
}

/// Store-backed variant of [`build_pipeline_bridge`], driven by a
/// [`BridgeRequest`].
pub fn build_bridge_from_store<S: BlobStore + ?Sized>(
    store: &S,
    request: &BridgeRequest,
) -> Result<BridgeResult> {
    PipelineBridgeProcessor::process_request(store, request, &BridgeConfig::default())
}
