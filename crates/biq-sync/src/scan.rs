//! Plan-list walk for one retailer.

use std::collections::HashSet;

use biq_cdr::PlanSource;
use biq_core::{RemotePlanSummary, RetailerDescriptor};
use tracing::warn;

use crate::events::ProgressSink;

/// Hard stop for publishers that never report an end.
pub const MAX_LIST_PAGES: u32 = 500;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    /// First occurrence of each plan id, in list order. Empty when the scan aborted.
    pub plans: Vec<RemotePlanSummary>,
    pub pages: u32,
    pub aborted: Option<String>,
}

/// Walks pages until one is empty, the reported page count is reached, or a page adds no new
/// ids. Any failed page discards everything gathered so far.
pub async fn scan_retailer(
    source: &dyn PlanSource,
    retailer: &RetailerDescriptor,
    progress: &ProgressSink,
) -> ScanOutcome {
    let mut plans = Vec::new();
    let mut seen = HashSet::new();
    let mut pages = 0u32;

    for page_no in 1..=MAX_LIST_PAGES {
        let page = match source.fetch_plan_page(retailer, page_no).await {
            Ok(page) => page,
            Err(err) => {
                warn!(retailer = %retailer.slug, page = page_no, error = %err, "plan list scan aborted");
                return ScanOutcome {
                    plans: Vec::new(),
                    pages,
                    aborted: Some(format!(
                        "plan list scan aborted on page {page_no} after {pages} page(s): {err}"
                    )),
                };
            }
        };
        pages += 1;
        if page.entries == 0 {
            break;
        }

        let before = plans.len();
        for summary in page.plans {
            if seen.insert(summary.plan_id.clone()) {
                plans.push(summary);
            }
        }
        let added = plans.len() - before;

        let of_total = page
            .total_pages
            .map(|total| format!("/{total}"))
            .unwrap_or_default();
        progress
            .message(format!(
                "{}: scanned page {page_no}{of_total} ({} plans so far)",
                retailer.name,
                plans.len()
            ))
            .await;

        if page.total_pages.is_some_and(|total| page_no >= total) || added == 0 {
            break;
        }
    }

    ScanOutcome {
        plans,
        pages,
        aborted: None,
    }
}
