use crate::categories::CategoryResult;
use crate::schema::Category;
use log::debug;
use serde::{Deserialize, Serialize};

/// Unrounded, unsigned category sums in dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub beginning: f64,
    pub new_pipeline: f64,
    pub won: f64,
    pub lost: f64,
    pub pulled: f64,
    pub pushed: f64,
    pub ending: f64,
}

impl CategoryTotals {
    pub fn from_results(results: &[CategoryResult]) -> Self {
        let mut totals = Self::default();
        for result in results {
            *totals.slot_mut(result.category) += result.value;
        }
        totals
    }

    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::BeginningPipeline => self.beginning,
            Category::AdjustedNewPipeline => self.new_pipeline,
            Category::Won => self.won,
            Category::Lost => self.lost,
            Category::PulledToCurrentPeriod => self.pulled,
            Category::PushedToNextPeriod => self.pushed,
            Category::EndingPipeline => self.ending,
        }
    }

    fn slot_mut(&mut self, category: Category) -> &mut f64 {
        match category {
            Category::BeginningPipeline => &mut self.beginning,
            Category::AdjustedNewPipeline => &mut self.new_pipeline,
            Category::Won => &mut self.won,
            Category::Lost => &mut self.lost,
            Category::PulledToCurrentPeriod => &mut self.pulled,
            Category::PushedToNextPeriod => &mut self.pushed,
            Category::EndingPipeline => &mut self.ending,
        }
    }
}

/// Ending pipeline derived from the bridge terms versus the one filtered
/// directly from the snapshot.
///
/// The discrepancy is folded into the chart value of Adjusted New Pipeline
/// only. That category's record table keeps the raw new-pipeline sum, so
/// chart and table values differ for exactly this one category while the
/// chart always lands on the actual ending value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub calculated_ending: f64,
    pub ending_actual: f64,
    pub discrepancy: f64,
    pub adjusted_new_chart_value: f64,
}

impl Reconciliation {
    pub fn reconcile(totals: &CategoryTotals) -> Self {
        let calculated_ending = totals.beginning + totals.new_pipeline - totals.won
            - totals.lost
            + totals.pulled
            - totals.pushed;
        let ending_actual = totals.ending;
        let discrepancy = ending_actual - calculated_ending;

        debug!(
            "Calculated ending {:.2}, actual ending {:.2}, discrepancy {:.2}",
            calculated_ending, ending_actual, discrepancy
        );

        Self {
            calculated_ending,
            ending_actual,
            discrepancy,
            adjusted_new_chart_value: totals.new_pipeline + discrepancy,
        }
    }

    /// Dollar value shown on the chart for `category`, before sign and scale.
    pub fn chart_value(&self, totals: &CategoryTotals, category: Category) -> f64 {
        match category {
            Category::AdjustedNewPipeline => self.adjusted_new_chart_value,
            other => totals.get(other),
        }
    }
}
