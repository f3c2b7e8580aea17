//! Scan-vs-store classification and chunk arithmetic. No I/O.

use std::collections::{HashMap, HashSet};

use biq_core::{RemotePlanSummary, StoredPlanState};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChange {
    New,
    Updated,
    /// Upserted earlier in the same resumed session. Holds its slot, is not fetched again.
    AlreadySynced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    pub plan_id: String,
    pub change: PlanChange,
    /// The list endpoint's timestamp, stored so the next reconcile compares like with like.
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// In scan order.
    pub to_fetch: Vec<FetchItem>,
    /// Sorted.
    pub to_deactivate: Vec<String>,
    /// Sorted.
    pub to_reactivate: Vec<String>,
    pub new_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    pub skipped_gas_count: usize,
}

impl Reconciliation {
    pub fn fetch_ids(&self) -> Vec<&str> {
        self.to_fetch.iter().map(|i| i.plan_id.as_str()).collect()
    }
}

/// Strictly newer only. A missing remote timestamp never counts as newer.
pub fn is_remote_newer(remote: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
    match (remote, stored) {
        (Some(remote), Some(stored)) => remote > stored,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

pub fn reconcile(
    remote: &[RemotePlanSummary],
    stored: &HashMap<String, StoredPlanState>,
    session_started_at: Option<DateTime<Utc>>,
) -> Reconciliation {
    let mut out = Reconciliation::default();
    let mut present = HashSet::new();

    for summary in remote {
        if !present.insert(summary.plan_id.as_str()) {
            continue;
        }
        if !summary.fuel_type.is_synced() {
            out.skipped_gas_count += 1;
            continue;
        }

        let change = match stored.get(&summary.plan_id) {
            None => Some(PlanChange::New),
            Some(state) if is_remote_newer(summary.last_updated, state.last_updated) => {
                Some(PlanChange::Updated)
            }
            Some(state) => {
                out.unchanged_count += 1;
                if !state.is_active {
                    out.to_reactivate.push(summary.plan_id.clone());
                }
                synced_in_session(state, session_started_at).then_some(PlanChange::AlreadySynced)
            }
        };

        match change {
            Some(PlanChange::New) => out.new_count += 1,
            Some(PlanChange::Updated) => out.updated_count += 1,
            _ => {}
        }
        if let Some(change) = change {
            out.to_fetch.push(FetchItem {
                plan_id: summary.plan_id.clone(),
                change,
                last_updated: summary.last_updated,
            });
        }
    }

    out.to_deactivate = stored
        .iter()
        .filter(|(id, state)| state.is_active && !present.contains(id.as_str()))
        .map(|(id, _)| id.clone())
        .collect();
    out.to_deactivate.sort();
    out.to_reactivate.sort();
    out
}

fn synced_in_session(state: &StoredPlanState, session_started_at: Option<DateTime<Utc>>) -> bool {
    match (state.synced_at, session_started_at) {
        (Some(synced_at), Some(started)) => synced_at >= started,
        _ => false,
    }
}

/// The `[start, end)` slice of a fetch list one invocation handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub start: usize,
    pub end: usize,
    pub has_more: bool,
}

impl ChunkWindow {
    pub fn plan(total: usize, cursor: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let upper = cursor.saturating_add(chunk_size);
        Self {
            start: cursor.min(total),
            end: upper.min(total),
            has_more: upper < total,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// `cursor + chunk_size` while any retailer still has work, `None` once everything is done.
pub fn next_cursor(windows: &[ChunkWindow], cursor: usize, chunk_size: usize) -> Option<usize> {
    windows
        .iter()
        .any(|w| w.has_more)
        .then(|| cursor.saturating_add(chunk_size.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use biq_core::{CustomerType, FuelType};
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).single().unwrap()
    }

    fn remote(id: &str, last_updated: Option<DateTime<Utc>>, fuel: FuelType) -> RemotePlanSummary {
        RemotePlanSummary {
            plan_id: id.to_string(),
            last_updated,
            fuel_type: fuel,
            customer_type: CustomerType::Residential,
        }
    }

    fn stored(last_updated: Option<DateTime<Utc>>, is_active: bool) -> StoredPlanState {
        StoredPlanState {
            last_updated,
            is_active,
            synced_at: Some(ts(1)),
        }
    }

    #[test]
    fn scenario_a_everything_is_new() {
        let scan = vec![
            remote("p1", Some(ts(0)), FuelType::Electricity),
            remote("p2", Some(ts(0)), FuelType::Electricity),
            remote("p3", Some(ts(0)), FuelType::Electricity),
        ];
        let rec = reconcile(&scan, &HashMap::new(), None);
        assert_eq!(rec.fetch_ids(), vec!["p1", "p2", "p3"]);
        assert!(rec.to_deactivate.is_empty());
        assert_eq!(rec.new_count, 3);
        assert!(rec.to_fetch.iter().all(|i| i.change == PlanChange::New));
    }

    #[test]
    fn scenario_b_new_unchanged_and_deleted() {
        let store = HashMap::from([
            ("p1".to_string(), stored(Some(ts(0)), true)),
            ("p2".to_string(), stored(Some(ts(0)), true)),
        ]);
        let scan = vec![
            remote("p1", Some(ts(0)), FuelType::Electricity),
            remote("p3", Some(ts(5)), FuelType::Electricity),
        ];
        let rec = reconcile(&scan, &store, None);
        assert_eq!(rec.fetch_ids(), vec!["p3"]);
        assert_eq!(rec.to_deactivate, vec!["p2".to_string()]);
        assert_eq!(rec.unchanged_count, 1);
        assert_eq!(rec.new_count, 1);
    }

    #[test]
    fn equal_timestamps_are_unchanged_and_newer_ones_updated() {
        let store = HashMap::from([
            ("same".to_string(), stored(Some(ts(3)), true)),
            ("newer".to_string(), stored(Some(ts(3)), true)),
            ("older".to_string(), stored(Some(ts(3)), true)),
            ("missing".to_string(), stored(Some(ts(3)), true)),
        ]);
        let scan = vec![
            remote("same", Some(ts(3)), FuelType::Electricity),
            remote("newer", Some(ts(4)), FuelType::Dual),
            remote("older", Some(ts(2)), FuelType::Electricity),
            remote("missing", None, FuelType::Electricity),
        ];
        let rec = reconcile(&scan, &store, None);
        assert_eq!(rec.fetch_ids(), vec!["newer"]);
        assert_eq!(rec.to_fetch[0].change, PlanChange::Updated);
        assert_eq!(rec.updated_count, 1);
        assert_eq!(rec.unchanged_count, 3);
    }

    #[test]
    fn gas_plans_are_only_counted_as_skipped() {
        let store = HashMap::from([("g1".to_string(), stored(Some(ts(0)), true))]);
        let scan = vec![
            remote("g1", Some(ts(9)), FuelType::Gas),
            remote("g2", Some(ts(9)), FuelType::Gas),
            remote("e1", Some(ts(9)), FuelType::Electricity),
        ];
        let rec = reconcile(&scan, &store, None);
        assert_eq!(rec.skipped_gas_count, 2);
        assert_eq!(rec.fetch_ids(), vec!["e1"]);
        assert!(rec.to_deactivate.is_empty());
        assert_eq!(rec.unchanged_count, 0);
    }

    #[test]
    fn only_active_plans_are_deactivated() {
        let store = HashMap::from([
            ("gone-active".to_string(), stored(Some(ts(0)), true)),
            ("gone-inactive".to_string(), stored(Some(ts(0)), false)),
        ]);
        let rec = reconcile(&[], &store, None);
        assert_eq!(rec.to_deactivate, vec!["gone-active".to_string()]);
    }

    #[test]
    fn reappearing_inactive_plans_are_reactivated_without_fetch() {
        let store = HashMap::from([
            ("back".to_string(), stored(Some(ts(0)), false)),
            ("back-newer".to_string(), stored(Some(ts(0)), false)),
        ]);
        let scan = vec![
            remote("back", Some(ts(0)), FuelType::Electricity),
            remote("back-newer", Some(ts(6)), FuelType::Electricity),
        ];
        let rec = reconcile(&scan, &store, None);
        assert_eq!(rec.to_reactivate, vec!["back".to_string()]);
        assert_eq!(rec.fetch_ids(), vec!["back-newer"]);
    }

    #[test]
    fn session_placeholders_keep_their_slot() {
        let session = ts(1);
        let store = HashMap::from([
            // Written by an earlier chunk of this session.
            (
                "done".to_string(),
                StoredPlanState {
                    last_updated: Some(ts(0)),
                    is_active: true,
                    synced_at: Some(ts(2)),
                },
            ),
            // Synced before the session began.
            (
                "old".to_string(),
                StoredPlanState {
                    last_updated: Some(ts(0)),
                    is_active: true,
                    synced_at: Some(ts(0)),
                },
            ),
        ]);
        let scan = vec![
            remote("done", Some(ts(0)), FuelType::Electricity),
            remote("old", Some(ts(0)), FuelType::Electricity),
            remote("fresh", Some(ts(0)), FuelType::Electricity),
        ];

        let resumed = reconcile(&scan, &store, Some(session));
        assert_eq!(resumed.fetch_ids(), vec!["done", "fresh"]);
        assert_eq!(resumed.to_fetch[0].change, PlanChange::AlreadySynced);
        assert_eq!(resumed.unchanged_count, 2);
        assert_eq!(resumed.new_count, 1);

        let fresh_run = reconcile(&scan, &store, None);
        assert_eq!(fresh_run.fetch_ids(), vec!["fresh"]);
    }

    #[test]
    fn scenario_d_chunks_of_two_over_five() {
        let w = ChunkWindow::plan(5, 0, 2);
        assert_eq!((w.start, w.end), (0, 2));
        assert_eq!(next_cursor(&[w], 0, 2), Some(2));

        let w = ChunkWindow::plan(5, 2, 2);
        assert_eq!((w.start, w.end), (2, 4));
        assert_eq!(next_cursor(&[w], 2, 2), Some(4));

        let w = ChunkWindow::plan(5, 4, 2);
        assert_eq!((w.start, w.end), (4, 5));
        assert_eq!(next_cursor(&[w], 4, 2), None);
    }

    #[test]
    fn chunking_visits_every_id_exactly_once_in_order() {
        for total in 0..12usize {
            for chunk_size in 1..7usize {
                let ids: Vec<usize> = (0..total).collect();
                let mut seen = Vec::new();
                let mut cursor = Some(0);
                while let Some(c) = cursor {
                    let w = ChunkWindow::plan(ids.len(), c, chunk_size);
                    seen.extend_from_slice(&ids[w.start..w.end]);
                    cursor = next_cursor(&[w], c, chunk_size);
                }
                assert_eq!(seen, ids, "total={total} chunk_size={chunk_size}");
            }
        }
    }

    #[test]
    fn cursor_past_the_end_is_an_empty_window() {
        let w = ChunkWindow::plan(3, 10, 2);
        assert!(w.is_empty());
        assert!(!w.has_more);
        assert_eq!(w.len(), 0);
    }

    #[test]
    fn next_cursor_considers_every_retailer() {
        let short = ChunkWindow::plan(1, 0, 2);
        let long = ChunkWindow::plan(9, 0, 2);
        assert_eq!(next_cursor(&[short, long], 0, 2), Some(2));
        assert_eq!(next_cursor(&[short], 0, 2), None);
    }
}
