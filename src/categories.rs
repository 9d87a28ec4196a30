use crate::resolver::{latest_by_key, latest_status_overall, resolve_as_of, StatusView};
use crate::schema::{
    columns, fill_monetary_passthrough, format_datetime, merge_rows, number, BridgeConfig, Category, Opportunity,
    Row, Transition,
};
use crate::utils::Window;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Records and summed `Net-New Dollars` of one bridge category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: Category,
    pub value: f64,
    /// Display rows keyed by row index. Snapshot-only categories use the row's
    /// position in the opportunity table; joined categories number their rows
    /// from zero.
    pub records: BTreeMap<usize, Row>,
}

impl CategoryResult {
    pub fn opportunity_names(&self) -> BTreeSet<String> {
        self.records
            .values()
            .filter_map(|row| row.get(columns::OPPORTUNITY_NAME))
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    fn from_opportunities<'o>(
        category: Category,
        opportunities: impl Iterator<Item = &'o Opportunity>,
    ) -> Self {
        let mut value = 0.0;
        let mut records = BTreeMap::new();
        for opp in opportunities {
            value += opp.net_new_dollars;
            records.insert(opp.source_row, opp.to_row());
        }
        Self {
            category,
            value,
            records,
        }
    }

    fn from_joined(category: Category, joined: Vec<(Row, f64)>) -> Self {
        let value: f64 = joined.iter().map(|(_, v)| v).sum();
        let records = joined
            .into_iter()
            .enumerate()
            .map(|(idx, (row, _))| (idx, row))
            .collect();
        Self {
            category,
            value,
            records,
        }
    }
}

/// Shared inputs of the seven category filters. The point-in-time views are
/// resolved once and borrowed by every filter.
pub struct BridgeContext<'a> {
    opportunities: &'a [Opportunity],
    transitions: &'a [Transition],
    config: &'a BridgeConfig,
    window: Window,
    as_of_start: StatusView<'a>,
    overall: StatusView<'a>,
    /// Opportunities whose latest transition lands in the won stage.
    won_by_history: BTreeSet<&'a str>,
}

impl<'a> BridgeContext<'a> {
    pub fn new(
        opportunities: &'a [Opportunity],
        transitions: &'a [Transition],
        config: &'a BridgeConfig,
        window: Window,
    ) -> Self {
        let as_of_start = resolve_as_of(transitions, window.start, &config.stages);
        let overall = latest_status_overall(transitions, &config.stages);
        let won_by_history = overall
            .latest
            .iter()
            .filter(|(_, t)| config.stages.is_won(&t.to_stage))
            .map(|(name, _)| *name)
            .collect();

        debug!(
            "Resolved {} opportunities as of {} ({} open), {} overall",
            as_of_start.len(),
            window.start,
            as_of_start.open.len(),
            overall.len()
        );

        Self {
            opportunities,
            transitions,
            config,
            window,
            as_of_start,
            overall,
            won_by_history,
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn compute(&self, category: Category) -> CategoryResult {
        let result = match category {
            Category::BeginningPipeline => self.beginning_pipeline(),
            Category::AdjustedNewPipeline => self.adjusted_new_pipeline(),
            Category::Won => self.won(),
            Category::Lost => self.lost(),
            Category::PulledToCurrentPeriod => self.pulled_to_current_period(),
            Category::PushedToNextPeriod => self.pushed_to_next_period(),
            Category::EndingPipeline => self.ending_pipeline(),
        };
        debug!(
            "{}: {} records, value {:.2}",
            category,
            result.records.len(),
            result.value
        );
        result
    }

    /// All categories in waterfall order.
    pub fn compute_all(&self) -> Vec<CategoryResult> {
        Category::ALL.iter().map(|c| self.compute(*c)).collect()
    }

    /// Created before the start, open at the start, and expected to close in
    /// the window both as of the start and now.
    pub fn beginning_pipeline(&self) -> CategoryResult {
        let stages = &self.config.stages;
        let selected = self
            .in_scope()
            .filter(|o| o.created_date < self.window.start)
            .filter(|o| !self.won_by_history.contains(o.name.as_str()))
            .filter(|o| self.window.contains(o.close_date))
            .filter(|o| match self.as_of_start.status_of(&o.name) {
                Some(status) => {
                    self.as_of_start.is_open(&o.name) && self.window.contains(status.close_date)
                }
                None => self.config.assume_open_without_history && stages.is_open(&o.stage),
            });
        CategoryResult::from_opportunities(Category::BeginningPipeline, selected)
    }

    /// Created in the window and expected to close by its end. Deals that went
    /// from the accepted stage straight to a close are left to Won/Lost.
    pub fn adjusted_new_pipeline(&self) -> CategoryResult {
        let stages = &self.config.stages;
        let accepted_then_closed: BTreeSet<&str> = self
            .transitions
            .iter()
            .filter(|t| t.from_stage == stages.accepted && stages.is_closing(&t.to_stage))
            .map(|t| t.opportunity_name.as_str())
            .collect();

        let selected = self
            .in_scope()
            .filter(|o| self.window.contains(o.created_date))
            .filter(|o| o.close_date <= self.window.end)
            .filter(|o| o.stage != stages.accepted)
            .filter(|o| !accepted_then_closed.contains(o.name.as_str()));
        CategoryResult::from_opportunities(Category::AdjustedNewPipeline, selected)
    }

    pub fn won(&self) -> CategoryResult {
        let selected = self
            .in_scope()
            .filter(|o| self.config.stages.is_won(&o.stage))
            .filter(|o| self.window.contains(o.close_date));
        CategoryResult::from_opportunities(Category::Won, selected)
    }

    /// Latest lost/nurture transition per opportunity inside the window,
    /// joined to the snapshot for its value.
    pub fn lost(&self) -> CategoryResult {
        let stages = &self.config.stages;
        let accepted_then_lost: BTreeSet<&str> = self
            .transitions
            .iter()
            .filter(|t| t.from_stage == stages.accepted && stages.is_lost(&t.to_stage))
            .map(|t| t.opportunity_name.as_str())
            .collect();

        let candidates = self.transitions.iter().filter(|t| {
            stages.is_lost(&t.to_stage)
                && self.window.contains(t.last_modified)
                && !accepted_then_lost.contains(t.opportunity_name.as_str())
        });
        let latest = latest_by_key(
            candidates,
            |t| t.opportunity_name.as_str(),
            |t| t.last_modified,
        );

        let by_name = self.in_scope_by_name();
        let mut joined = Vec::new();
        for (name, transition) in latest {
            for opp in by_name.get(name).into_iter().flatten() {
                let mut row = merge_rows(
                    &transition.to_row(),
                    &opp.fields_row(),
                    columns::OPPORTUNITY_NAME,
                    ("_history", "_pipeline"),
                );
                fill_monetary_passthrough(&mut row, true);
                joined.push((row, opp.net_new_dollars));
            }
        }
        CategoryResult::from_joined(Category::Lost, joined)
    }

    /// Deals with an open record expecting a close after the window and
    /// another open record, earlier or later, expecting a close inside it.
    /// Counted once each, so a deal can show up here and in Pushed.
    pub fn pulled_to_current_period(&self) -> CategoryResult {
        let stages = &self.config.stages;
        let in_window = self.open_transitions_closing_in_window();
        let in_window = &in_window;

        let pairs = self
            .transitions
            .iter()
            .filter(|t| self.window.is_after(t.close_date) && stages.is_open(&t.to_stage))
            .flat_map(move |future| {
                in_window
                    .get(future.opportunity_name.as_str())
                    .into_iter()
                    .flatten()
                    .map(move |current| (future, *current))
            });
        let latest = latest_by_key(
            pairs,
            |(future, _)| future.opportunity_name.as_str(),
            |(_, current)| current.last_modified,
        );

        let by_name = self.in_scope_by_name();
        let mut joined = Vec::new();
        for (name, (future, current)) in latest {
            if self.won_by_history.contains(name) {
                continue;
            }
            if let Some(opp) = by_name.get(name).and_then(|opps| opps.first()) {
                let mut row = merge_rows(
                    &future.to_row(),
                    &current.to_row(),
                    columns::OPPORTUNITY_NAME,
                    ("_future", "_current"),
                );
                row.insert(
                    columns::NET_NEW_DOLLARS.to_string(),
                    number(opp.net_new_dollars),
                );
                joined.push((row, opp.net_new_dollars));
            }
        }
        CategoryResult::from_joined(Category::PulledToCurrentPeriod, joined)
    }

    /// Deals with an open record expecting a close inside the window whose
    /// latest record overall is open and expects a close after it.
    pub fn pushed_to_next_period(&self) -> CategoryResult {
        let stages = &self.config.stages;
        let beyond: BTreeMap<&str, &Transition> = self
            .overall
            .latest
            .iter()
            .filter(|(_, t)| self.window.is_after(t.close_date) && stages.is_open(&t.to_stage))
            .map(|(name, t)| (*name, *t))
            .collect();

        let pairs = self
            .transitions
            .iter()
            .filter(|t| self.window.contains(t.close_date) && stages.is_open(&t.to_stage))
            .filter_map(|within| {
                beyond
                    .get(within.opportunity_name.as_str())
                    .map(|latest| (within, *latest))
            });
        let latest = latest_by_key(
            pairs,
            |(within, _)| within.opportunity_name.as_str(),
            |(within, _)| within.last_modified,
        );

        let by_name = self.in_scope_by_name();
        let mut joined = Vec::new();
        for (name, (within, pushed)) in latest {
            if let Some(opp) = by_name.get(name).and_then(|opps| opps.first()) {
                let mut slim = Row::new();
                slim.insert(
                    columns::OPPORTUNITY_NAME.to_string(),
                    pushed.opportunity_name.clone().into(),
                );
                slim.insert(
                    columns::CLOSE_DATE.to_string(),
                    format_datetime(pushed.close_date),
                );
                slim.insert(
                    columns::LAST_MODIFIED.to_string(),
                    format_datetime(pushed.last_modified),
                );
                let mut row = merge_rows(
                    &within.to_row(),
                    &slim,
                    columns::OPPORTUNITY_NAME,
                    ("_within", "_beyond"),
                );
                row.insert(
                    columns::NET_NEW_DOLLARS.to_string(),
                    number(opp.net_new_dollars),
                );
                joined.push((row, opp.net_new_dollars));
            }
        }
        CategoryResult::from_joined(Category::PushedToNextPeriod, joined)
    }

    /// Open in the snapshot and expected to close by the end of the window.
    pub fn ending_pipeline(&self) -> CategoryResult {
        let selected = self
            .in_scope()
            .filter(|o| o.close_date <= self.window.end)
            .filter(|o| self.config.stages.is_open(&o.stage))
            .filter(|o| !self.won_by_history.contains(o.name.as_str()));
        CategoryResult::from_opportunities(Category::EndingPipeline, selected)
    }

    fn in_scope(&self) -> impl Iterator<Item = &'a Opportunity> + '_ {
        self.opportunities
            .iter()
            .filter(|o| o.opportunity_type == self.config.opportunity_type)
    }

    fn in_scope_by_name(&self) -> BTreeMap<&'a str, Vec<&'a Opportunity>> {
        let mut by_name: BTreeMap<&'a str, Vec<&'a Opportunity>> = BTreeMap::new();
        for opp in self.in_scope() {
            by_name.entry(opp.name.as_str()).or_default().push(opp);
        }
        by_name
    }

    fn open_transitions_closing_in_window(&self) -> BTreeMap<&'a str, Vec<&'a Transition>> {
        let stages = &self.config.stages;
        let mut by_name: BTreeMap<&'a str, Vec<&'a Transition>> = BTreeMap::new();
        for t in self.transitions {
            if self.window.contains(t.close_date) && stages.is_open(&t.to_stage) {
                by_name.entry(t.opportunity_name.as_str()).or_default().push(t);
            }
        }
        by_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn window() -> Window {
        Window::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
        .unwrap()
    }

    fn opp(
        row: usize,
        name: &str,
        stage: &str,
        created: NaiveDateTime,
        close: NaiveDateTime,
        value: f64,
    ) -> Opportunity {
        Opportunity {
            name: name.to_string(),
            account_name: "Acct".to_string(),
            owner: "Owner".to_string(),
            stage: stage.to_string(),
            opportunity_type: "New Customer".to_string(),
            created_date: created,
            close_date: close,
            age: 0.0,
            net_new_dollars: value,
            source_row: row,
            extra: BTreeMap::new(),
        }
    }

    fn transition(
        row: usize,
        name: &str,
        from: &str,
        to: &str,
        modified: NaiveDateTime,
        close: NaiveDateTime,
    ) -> Transition {
        Transition {
            opportunity_name: name.to_string(),
            from_stage: from.to_string(),
            to_stage: to.to_string(),
            last_modified: modified,
            close_date: close,
            amount: 0.0,
            expected_revenue: 0.0,
            source_row: row,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_beginning_uses_status_at_start() {
        let opps = vec![
            opp(0, "A", "Proposal", day(2023, 6, 1), day(2024, 3, 1), 10.0),
            opp(1, "B", "Proposal", day(2023, 6, 1), day(2024, 3, 1), 20.0),
            opp(2, "C", "Proposal", day(2023, 6, 1), day(2024, 3, 1), 40.0),
        ];
        let history = vec![
            transition(0, "A", "Discovery", "Proposal", day(2023, 12, 1), day(2024, 3, 1)),
            transition(1, "B", "Proposal", "Closed Lost", day(2023, 12, 1), day(2024, 3, 1)),
            // Recorded after the start, so C has no status as of the start.
            transition(2, "C", "Proposal", "Proposal", day(2024, 2, 1), day(2024, 3, 1)),
        ];
        let config = BridgeConfig::default();
        let context = BridgeContext::new(&opps, &history, &config, window());

        let result = context.beginning_pipeline();
        assert_eq!(result.value, 50.0);
        assert_eq!(result.records.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_ending_excludes_accepted_and_terminal_stages() {
        let opps = vec![
            opp(0, "A", "Negotiation", day(2023, 6, 1), day(2024, 6, 30), 10.0),
            opp(1, "B", "SQL - AE Accepted", day(2023, 6, 1), day(2024, 3, 1), 20.0),
            opp(2, "C", "Closed Nurture", day(2023, 6, 1), day(2024, 3, 1), 40.0),
            opp(3, "D", "Proposal", day(2023, 6, 1), day(2024, 7, 1), 80.0),
        ];
        let config = BridgeConfig::default();
        let context = BridgeContext::new(&opps, &[], &config, window());

        let result = context.ending_pipeline();
        assert_eq!(result.value, 10.0);
        assert_eq!(result.opportunity_names(), BTreeSet::from(["A".to_string()]));
    }

    #[test]
    fn test_lost_joins_every_matching_snapshot_row() {
        let opps = vec![
            opp(0, "A", "Closed Lost", day(2023, 6, 1), day(2024, 3, 1), 10.0),
            opp(1, "A", "Closed Lost", day(2023, 6, 1), day(2024, 3, 1), 15.0),
        ];
        let history = vec![
            transition(0, "A", "Proposal", "Closed Lost", day(2024, 2, 1), day(2024, 3, 1)),
            transition(1, "A", "Closed Lost", "Closed Nurture", day(2024, 2, 10), day(2024, 3, 1)),
        ];
        let config = BridgeConfig::default();
        let context = BridgeContext::new(&opps, &history, &config, window());

        let result = context.lost();
        assert_eq!(result.value, 25.0);
        assert_eq!(result.records.len(), 2);
        assert!(result.records.values().all(|row| row["To Stage"] == "Closed Nurture"));
        assert!(result.records[&0].contains_key("Close Date_history"));
        assert!(result.records[&0].contains_key("Close Date_pipeline"));
    }

    #[test]
    fn test_pulled_pairs_records_in_either_order() {
        let opps = vec![
            opp(0, "A", "Negotiation", day(2023, 6, 1), day(2024, 5, 1), 10.0),
            opp(1, "B", "Negotiation", day(2023, 6, 1), day(2024, 9, 1), 20.0),
        ];
        let history = vec![
            transition(0, "A", "Discovery", "Proposal", day(2024, 1, 10), day(2024, 12, 1)),
            transition(1, "A", "Proposal", "Negotiation", day(2024, 2, 10), day(2024, 5, 1)),
            transition(2, "B", "Discovery", "Proposal", day(2024, 1, 10), day(2024, 5, 1)),
            transition(3, "B", "Proposal", "Negotiation", day(2024, 2, 10), day(2024, 9, 1)),
        ];
        let config = BridgeConfig::default();
        let context = BridgeContext::new(&opps, &history, &config, window());

        let pulled = context.pulled_to_current_period();
        assert_eq!(
            pulled.opportunity_names(),
            BTreeSet::from(["A".to_string(), "B".to_string()])
        );
        assert_eq!(pulled.value, 30.0);
        assert_eq!(pulled.records.len(), 2);

        let pushed = context.pushed_to_next_period();
        assert_eq!(pushed.opportunity_names(), BTreeSet::from(["B".to_string()]));
        assert_eq!(pushed.value, 20.0);
    }

    #[test]
    fn test_other_opportunity_types_are_ignored() {
        let mut renewal = opp(0, "R", "Closed Won", day(2023, 6, 1), day(2024, 3, 1), 99.0);
        renewal.opportunity_type = "Existing Customer".to_string();
        let opps = vec![renewal];
        let config = BridgeConfig::default();
        let context = BridgeContext::new(&opps, &[], &config, window());

        for result in context.compute_all() {
            assert_eq!(result.value, 0.0, "{}", result.category);
            assert!(result.records.is_empty());
        }
    }
}
