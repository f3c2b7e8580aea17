use std::path::PathBuf;

use biq_cdr::{extract_plan_record, PlanDetailResponse, PlanListPage, PlanListResponse};
use biq_core::{AusState, CustomerType, FuelType, RateKind, RetailerDescriptor, TariffType};
use chrono::{TimeZone, Utc};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn load<T: serde::de::DeserializeOwned>(name: &str) -> T {
    let path = workspace_root().join("fixtures/cdr").join(name);
    let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    serde_json::from_str(&raw).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

fn sunrise() -> RetailerDescriptor {
    RetailerDescriptor {
        name: "Sunrise Energy".into(),
        slug: "sunrise".into(),
        base_uri: "https://cdr.test/sunrise".into(),
        priority: 1,
    }
}

#[test]
fn time_of_use_fixture_extracts_rates_names_and_incentives() {
    let detail: PlanDetailResponse = load("plan_detail_tou.json");
    let synced_at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).single().unwrap();
    let plan = extract_plan_record(&sunrise(), &detail.data, synced_at).unwrap();

    assert_eq!(plan.id, "SUN-TOU-VIC-01");
    assert_eq!(plan.retailer_id, "sunrise");
    assert_eq!(plan.brand.as_deref(), Some("Sunrise Energy"));
    assert_eq!(plan.state, Some(AusState::Vic));
    assert_eq!(plan.tariff_type, TariffType::TimeOfUse);
    assert_eq!(plan.plan_type.as_deref(), Some("MARKET"));
    assert_eq!(plan.daily_supply_charge, Some(1.05));
    assert_eq!(plan.peak_rate, Some(0.42));
    assert_eq!(plan.peak_times.as_deref(), Some("16:00-21:00"));
    assert_eq!(plan.off_peak_rate, Some(0.0));
    assert_eq!(plan.off_peak_times.as_deref(), Some("11:00-14:00"));
    assert_eq!(plan.shoulder_rate, Some(0.25));
    assert_eq!(plan.shoulder_times.as_deref(), Some("06:00-11:00, 21:00-23:59"));
    assert_eq!(plan.single_rate, None);
    assert_eq!(plan.feed_in_tariff, Some(0.12));

    assert!(plan.battery_incentive);
    assert_eq!(plan.battery_incentive_value, Some(500.0));
    assert!(plan.vpp_available);
    assert_eq!(plan.vpp_credit, Some(150.0));
    assert!(plan.green_power_available);
    assert_eq!(plan.green_power_percent, Some(0.25));
    assert_eq!(plan.payment_options, vec!["DIRECT_DEBIT", "CREDIT_CARD"]);
    assert!(plan.fees.is_some());
    assert!(plan.eligibility.is_some());
    assert_eq!(
        plan.effective_from,
        Utc.with_ymd_and_hms(2024, 12, 31, 13, 0, 0).single()
    );
    assert!(plan.is_active);
    assert_eq!(plan.synced_at, synced_at);

    let names: Vec<_> = plan
        .tariff_periods
        .iter()
        .map(|p| (p.kind, p.display_name.as_str(), p.sequence_order))
        .collect();
    assert_eq!(
        names,
        vec![
            (RateKind::Peak, "Peak", 0),
            (RateKind::OffPeak, "Solar Sponge", 1),
            (RateKind::OffPeak, "EV Charging", 2),
            (RateKind::Shoulder, "Shoulder", 3),
        ]
    );
    assert_eq!(plan.tariff_periods[3].time_windows.len(), 2);
    assert!(plan.tariff_periods.iter().all(|p| p.plan_id == plan.id));
}

#[test]
fn flat_fixture_uses_first_single_rate() {
    let detail: PlanDetailResponse = load("plan_detail_flat.json");
    let plan = extract_plan_record(&sunrise(), &detail.data, Utc::now()).unwrap();

    assert_eq!(plan.tariff_type, TariffType::Flat);
    assert_eq!(plan.single_rate, Some(0.29));
    assert_eq!(plan.state, Some(AusState::Act));
    assert_eq!(
        plan.last_updated,
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).single()
    );
    assert!(!plan.battery_incentive);
    assert!(!plan.vpp_available);
    assert!(!plan.green_power_available);
    assert_eq!(plan.tariff_periods.len(), 1);
    assert_eq!(plan.tariff_periods[0].display_name, "Anytime usage");
    assert_eq!(plan.feed_in_tariff, None);
}

#[test]
fn demand_fixture_is_classified_as_demand() {
    let detail: PlanDetailResponse = load("plan_detail_demand.json");
    let plan = extract_plan_record(&sunrise(), &detail.data, Utc::now()).unwrap();

    assert_eq!(plan.tariff_type, TariffType::Demand);
    assert_eq!(plan.fuel_type, FuelType::Dual);
    assert_eq!(plan.customer_type, CustomerType::Business);
    assert_eq!(plan.state, Some(AusState::Qld));
    assert_eq!(plan.demand_charge, Some(0.35));
    assert_eq!(plan.single_rate, Some(0.22));
    let names: Vec<_> = plan
        .tariff_periods
        .iter()
        .map(|p| p.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["General Usage", "Peak demand"]);
}

#[test]
fn list_fixtures_decode_into_summaries() {
    let page: PlanListResponse = load("plan_list_page1.json");
    let page = PlanListPage::from_wire(page);
    assert_eq!(page.total_pages, Some(2));
    assert_eq!(page.plans.len(), 3);
    assert_eq!(page.plans[2].fuel_type, FuelType::Gas);
    assert_eq!(
        page.plans[1].last_updated,
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).single()
    );
}
