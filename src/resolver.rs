//! Point-in-time reconstruction over the transition log.
//!
//! Every "latest row per opportunity" reduction in the crate goes through
//! [`latest_by_key`] so that ties are broken the same way everywhere: among
//! rows sharing the maximum timestamp, the one appearing later in the input
//! wins.

use crate::schema::{StageVocabulary, Transition};
use chrono::NaiveDateTime;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Reduces `rows` to one row per key: the row with the maximum timestamp.
/// Ties go to the row seen last. Output is ordered by key.
pub fn latest_by_key<T, K, F, G>(rows: impl IntoIterator<Item = T>, key: F, timestamp: G) -> BTreeMap<K, T>
where
    K: Ord,
    F: Fn(&T) -> K,
    G: Fn(&T) -> NaiveDateTime,
{
    let mut latest: BTreeMap<K, T> = BTreeMap::new();
    for row in rows {
        match latest.entry(key(&row)) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                if timestamp(&row) >= timestamp(slot.get()) {
                    slot.insert(row);
                }
            }
        }
    }
    latest
}

/// Latest known transition per opportunity, plus the names still open.
#[derive(Debug, Clone, Default)]
pub struct StatusView<'a> {
    pub latest: BTreeMap<&'a str, &'a Transition>,
    pub open: BTreeSet<&'a str>,
}

impl<'a> StatusView<'a> {
    fn from_transitions(
        transitions: impl IntoIterator<Item = &'a Transition>,
        stages: &StageVocabulary,
    ) -> Self {
        let latest = latest_by_key(
            transitions,
            |t| t.opportunity_name.as_str(),
            |t| t.last_modified,
        );
        let open = latest
            .iter()
            .filter(|(_, t)| stages.is_open(&t.to_stage))
            .map(|(name, _)| *name)
            .collect();
        Self { latest, open }
    }

    pub fn status_of(&self, name: &str) -> Option<&'a Transition> {
        self.latest.get(name).copied()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.open.contains(name)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// Status of every opportunity as of `cutoff`, from transitions with
/// `Last Modified <= cutoff`. Opportunities with no such transition have no
/// status.
pub fn resolve_as_of<'a>(
    transitions: &'a [Transition],
    cutoff: NaiveDateTime,
    stages: &StageVocabulary,
) -> StatusView<'a> {
    StatusView::from_transitions(
        transitions.iter().filter(|t| t.last_modified <= cutoff),
        stages,
    )
}

/// Latest status with no cutoff.
pub fn latest_status_overall<'a>(
    transitions: &'a [Transition],
    stages: &StageVocabulary,
) -> StatusView<'a> {
    StatusView::from_transitions(transitions.iter(), stages)
}
