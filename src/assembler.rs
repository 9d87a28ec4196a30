use crate::categories::CategoryResult;
use crate::error::Result;
use crate::normalizer::NormalizationReport;
use crate::reconciler::{CategoryTotals, Reconciliation};
use crate::schema::{BridgeConfig, Category, Row};
use crate::utils::round_to;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full bridge: chart series for the waterfall plus the record tables
/// behind each bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResult {
    /// Category labels in waterfall order.
    pub categories: Vec<String>,
    /// Signed, scaled and rounded chart values, aligned with `categories`.
    pub values: Vec<f64>,
    /// Base offset of each bar: `cumulative[0] = 0`,
    /// `cumulative[i] = cumulative[i - 1] + values[i - 1]`.
    pub cumulative: Vec<f64>,
    /// Category label to its row-indexed records, unrounded.
    pub table_data: BTreeMap<String, BTreeMap<usize, Row>>,
    /// Raw table value of each category in dollars.
    pub category_totals: BTreeMap<String, f64>,
    pub reconciliation: Reconciliation,
    pub report: NormalizationReport,
}

impl BridgeResult {
    pub fn value_of(&self, category: Category) -> Option<f64> {
        self.categories
            .iter()
            .position(|c| c == category.label())
            .and_then(|idx| self.values.get(idx).copied())
    }

    pub fn records_of(&self, category: Category) -> Option<&BTreeMap<usize, Row>> {
        self.table_data.get(category.label())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn assemble(
    results: Vec<CategoryResult>,
    report: NormalizationReport,
    config: &BridgeConfig,
) -> BridgeResult {
    let totals = CategoryTotals::from_results(&results);
    let reconciliation = Reconciliation::reconcile(&totals);

    let categories: Vec<String> = Category::ALL.iter().map(|c| c.label().to_string()).collect();

    let values: Vec<f64> = Category::ALL
        .iter()
        .map(|c| {
            let scaled = c.sign() * reconciliation.chart_value(&totals, *c) / config.value_scale;
            round_to(scaled, config.decimal_places)
        })
        .collect();

    let mut cumulative = Vec::with_capacity(values.len());
    let mut running = 0.0;
    cumulative.push(running);
    for value in values.iter().take(values.len().saturating_sub(1)) {
        running = round_to(running + value, config.decimal_places);
        cumulative.push(running);
    }

    let category_totals = Category::ALL
        .iter()
        .map(|c| (c.label().to_string(), totals.get(*c)))
        .collect();

    let table_data = results
        .into_iter()
        .map(|r| (r.category.label().to_string(), r.records))
        .collect();

    BridgeResult {
        categories,
        values,
        cumulative,
        table_data,
        category_totals,
        reconciliation,
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(category: Category, value: f64) -> CategoryResult {
        CategoryResult {
            category,
            value,
            records: BTreeMap::new(),
        }
    }

    fn sample() -> Vec<CategoryResult> {
        vec![
            result(Category::BeginningPipeline, 2_000_000.0),
            result(Category::AdjustedNewPipeline, 500_000.0),
            result(Category::Won, 750_000.0),
            result(Category::Lost, 250_000.0),
            result(Category::PulledToCurrentPeriod, 125_000.0),
            result(Category::PushedToNextPeriod, 300_000.0),
            result(Category::EndingPipeline, 1_412_000.0),
        ]
    }

    #[test]
    fn test_values_are_signed_scaled_and_rounded() {
        let bridge = assemble(sample(), NormalizationReport::default(), &BridgeConfig::default());

        assert_eq!(
            bridge.categories,
            vec![
                "Beginning Pipeline",
                "Adjusted New Pipeline",
                "Won",
                "Lost",
                "Pulled to Current Period",
                "Pushed to Next Period",
                "Ending Pipeline"
            ]
        );
        // Calculated ending is 1.325M, so 0.087M is folded into new pipeline.
        assert_eq!(bridge.values, vec![2.0, 0.59, -0.75, -0.25, 0.13, -0.3, 1.41]);
        assert_eq!(bridge.value_of(Category::Won), Some(-0.75));
    }

    #[test]
    fn test_table_value_keeps_raw_new_pipeline() {
        let bridge = assemble(sample(), NormalizationReport::default(), &BridgeConfig::default());
        assert_eq!(bridge.category_totals["Adjusted New Pipeline"], 500_000.0);
        assert!((bridge.reconciliation.adjusted_new_chart_value - 587_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_cumulative_offsets() {
        let bridge = assemble(sample(), NormalizationReport::default(), &BridgeConfig::default());
        assert_eq!(bridge.cumulative.len(), 7);
        assert_eq!(bridge.cumulative[0], 0.0);
        for i in 1..7 {
            let expected = round_to(bridge.cumulative[i - 1] + bridge.values[i - 1], 2);
            assert_eq!(bridge.cumulative[i], expected);
        }
    }

    #[test]
    fn test_custom_scale() {
        let config = BridgeConfig {
            value_scale: 1_000.0,
            decimal_places: 1,
            ..BridgeConfig::default()
        };
        let bridge = assemble(sample(), NormalizationReport::default(), &config);
        assert_eq!(bridge.values[0], 2000.0);
        assert_eq!(bridge.values[4], 125.0);
    }

    #[test]
    fn test_serializes_table_data_and_values() {
        let bridge = assemble(sample(), NormalizationReport::default(), &BridgeConfig::default());
        let json = bridge.to_json().unwrap();
        assert!(json.contains("\"table_data\""));
        assert!(json.contains("\"values\""));
        assert!(json.contains("Ending Pipeline"));
    }
}
