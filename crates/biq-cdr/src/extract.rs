//! Plan detail -> `PlanRecord` extraction.

use std::collections::HashMap;

use biq_core::{
    AusState, CustomerType, FuelType, PlanRecord, RateKind, RetailerDescriptor, TariffPeriod,
    TariffType, TimeWindow,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::schema::{
    decimal_from_json, DescribedItemWire, ElectricityContract, PlanDetail, RateWire,
    TimeOfUseRateWire,
};

/// Below this a usage rate is treated as free.
pub const NEAR_ZERO_RATE: f64 = 0.01;
/// Early-morning blocks under this rate are presented as EV charging windows.
pub const EV_RATE_CEILING: f64 = 0.15;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("plan detail has an empty planId")]
    MissingPlanId,
}

pub fn extract_plan_record(
    retailer: &RetailerDescriptor,
    detail: &PlanDetail,
    synced_at: DateTime<Utc>,
) -> Result<PlanRecord, ExtractError> {
    let id = detail.plan_id.trim();
    if id.is_empty() {
        return Err(ExtractError::MissingPlanId);
    }

    let empty_contract = ElectricityContract::default();
    let contract = detail
        .electricity_contract
        .as_ref()
        .unwrap_or(&empty_contract);

    let (peak_rate, peak_times) = time_of_use_rate(contract, RateKind::Peak);
    let (shoulder_rate, shoulder_times) = time_of_use_rate(contract, RateKind::Shoulder);
    let (off_peak_rate, off_peak_times) = time_of_use_rate(contract, RateKind::OffPeak);

    let incentives = described_items(contract.incentives.as_ref());
    let discounts = described_items(contract.discounts.as_ref());
    let battery = incentives.iter().find(|item| mentions(item, &["battery"]));
    let vpp = incentives
        .iter()
        .chain(discounts.iter())
        .find(|item| mentions(item, &["vpp", "virtual power plant"]));

    Ok(PlanRecord {
        id: id.to_string(),
        retailer_id: retailer.slug.clone(),
        retailer_name: retailer.name.clone(),
        brand: non_empty(detail.brand_name.as_deref()).or_else(|| non_empty(detail.brand.as_deref())),
        name: non_empty(detail.display_name.as_deref()).unwrap_or_else(|| id.to_string()),
        description: non_empty(detail.description.as_deref()),
        state: plan_state(detail),
        fuel_type: detail
            .fuel_type
            .as_deref()
            .map(FuelType::parse)
            .unwrap_or(FuelType::Electricity),
        customer_type: detail
            .customer_type
            .as_deref()
            .map(CustomerType::parse)
            .unwrap_or(CustomerType::Residential),
        tariff_type: classify_tariff(contract),
        plan_type: non_empty(detail.plan_type.as_deref()),
        daily_supply_charge: contract
            .tariff_period
            .iter()
            .find_map(|p| p.daily_supply_charge),
        single_rate: contract
            .tariff_period
            .iter()
            .filter_map(|p| p.single_rate.as_ref())
            .find_map(|s| first_rate(&s.rates)),
        peak_rate,
        shoulder_rate,
        off_peak_rate,
        peak_times,
        shoulder_times,
        off_peak_times,
        demand_charge: contract
            .tariff_period
            .iter()
            .flat_map(|p| p.demand_charges.iter())
            .find_map(|d| d.amount),
        feed_in_tariff: feed_in_tariff(contract),
        battery_incentive: battery.is_some(),
        battery_incentive_value: battery.and_then(|item| dollar_amount_in(item)),
        vpp_available: vpp.is_some(),
        vpp_credit: vpp.and_then(|item| dollar_amount_in(item)),
        discounts: blob(contract.discounts.as_ref()),
        incentives: blob(contract.incentives.as_ref()),
        fees: blob(contract.fees.as_ref()),
        eligibility: blob(contract.eligibility.as_ref()),
        green_power_charges: blob(contract.green_power_charges.as_ref()),
        controlled_load: blob(contract.controlled_load.as_ref()),
        contract_term: non_empty(contract.term_type.as_deref()),
        payment_options: contract.payment_option.clone(),
        green_power_available: contract
            .green_power_charges
            .as_ref()
            .and_then(JsonValue::as_array)
            .is_some_and(|charges| !charges.is_empty()),
        green_power_percent: contract
            .intrinsic_green_power
            .as_ref()
            .and_then(|g| g.green_percentage),
        effective_from: detail.effective_from.as_deref().and_then(parse_cdr_timestamp),
        application_uri: non_empty(detail.application_uri.as_deref()),
        is_active: true,
        last_updated: detail.last_updated.as_deref().and_then(parse_cdr_timestamp),
        synced_at,
        tariff_periods: build_tariff_periods(id, contract),
    })
}

/// RFC 3339 timestamps, with a bare `YYYY-MM-DD` accepted as midnight UTC.
pub fn parse_cdr_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn classify_tariff(contract: &ElectricityContract) -> TariffType {
    let has_demand = contract.tariff_period.iter().any(|p| {
        !p.demand_charges.is_empty() || p.rate_block_u_type.as_deref() == Some("demandCharges")
    });
    if has_demand {
        return TariffType::Demand;
    }
    let has_tou = contract.tariff_period.iter().any(|p| {
        !p.time_of_use_rates.is_empty() || p.rate_block_u_type.as_deref() == Some("timeOfUseRates")
    }) || contract
        .pricing_model
        .as_deref()
        .is_some_and(|m| m.to_ascii_uppercase().contains("TIME_OF_USE"));
    if has_tou {
        TariffType::TimeOfUse
    } else {
        TariffType::Flat
    }
}

/// Jurisdiction of the first included postcode.
pub fn plan_state(detail: &PlanDetail) -> Option<AusState> {
    let postcode = detail.geography.as_ref()?.included_postcodes.first()?;
    postcode
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(AusState::from_postcode)
}

struct RateBlock {
    kind: RateKind,
    upstream_name: Option<String>,
    rate: f64,
    windows: Vec<TimeWindow>,
}

pub fn build_tariff_periods(plan_id: &str, contract: &ElectricityContract) -> Vec<TariffPeriod> {
    let mut blocks = Vec::new();
    for period in &contract.tariff_period {
        if let Some(single) = &period.single_rate {
            if let Some(rate) = first_rate(&single.rates) {
                blocks.push(RateBlock {
                    kind: RateKind::Single,
                    upstream_name: single.display_name.clone(),
                    rate,
                    windows: Vec::new(),
                });
            }
        }
        for tou in &period.time_of_use_rates {
            let Some(rate) = first_rate(&tou.rates) else {
                continue;
            };
            blocks.push(RateBlock {
                kind: tou
                    .rate_type
                    .as_deref()
                    .map(RateKind::parse)
                    .unwrap_or(RateKind::Other),
                upstream_name: tou.display_name.clone(),
                rate,
                windows: tou_windows(tou),
            });
        }
        for demand in &period.demand_charges {
            let Some(rate) = demand.amount else {
                continue;
            };
            blocks.push(RateBlock {
                kind: RateKind::Demand,
                upstream_name: demand.display_name.clone(),
                rate,
                windows: parse_window(
                    &demand.days,
                    demand.start_time.as_deref(),
                    demand.end_time.as_deref(),
                )
                .into_iter()
                .collect(),
            });
        }
    }

    let mut kind_counts: HashMap<RateKind, usize> = HashMap::new();
    for block in &blocks {
        *kind_counts.entry(block.kind).or_default() += 1;
    }

    blocks
        .into_iter()
        .enumerate()
        .map(|(idx, block)| {
            let sequence_order = idx as i32;
            let repeated = kind_counts.get(&block.kind).copied().unwrap_or(0) > 1;
            TariffPeriod {
                id: TariffPeriod::deterministic_id(plan_id, sequence_order),
                plan_id: plan_id.to_string(),
                kind: block.kind,
                display_name: display_name_for(
                    block.kind,
                    block.upstream_name.as_deref(),
                    block.rate,
                    &block.windows,
                    repeated,
                ),
                rate: block.rate,
                time_windows: block.windows,
                sequence_order,
            }
        })
        .collect()
}

/// Human-readable name for one rate block.
pub fn display_name_for(
    kind: RateKind,
    upstream_name: Option<&str>,
    rate: f64,
    windows: &[TimeWindow],
    repeated: bool,
) -> String {
    let upstream = non_empty(upstream_name);
    match kind {
        RateKind::Single => return upstream.unwrap_or_else(|| "General Usage".to_string()),
        RateKind::Demand => return upstream.unwrap_or_else(|| "Demand Charge".to_string()),
        _ => {}
    }

    let first = windows.first();
    if rate < NEAR_ZERO_RATE {
        let midday = first.is_some_and(|w| (9..16).contains(&w.start_hour()));
        return if midday { "Solar Sponge" } else { "Super Off-Peak" }.to_string();
    }
    let early_morning = first.is_some_and(|w| {
        w.start_hour() < 6
            && w.end > w.start
            && w.end <= NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN)
    });
    if rate < EV_RATE_CEILING && early_morning {
        return "EV Charging".to_string();
    }

    let label = match kind.label() {
        Some(label) => label.to_string(),
        None => return upstream.unwrap_or_else(|| "Usage".to_string()),
    };
    match first.and_then(|w| repeated.then(|| window_qualifier(w))) {
        Some(qualifier) => format!("{label} ({qualifier})"),
        None => label,
    }
}

fn window_qualifier(window: &TimeWindow) -> &'static str {
    if window.is_weekend_only() {
        return "Weekend";
    }
    match window.start_hour() {
        6..=8 => "Morning",
        9..=15 => "Daytime",
        16..=21 => "Evening",
        _ => "Overnight",
    }
}

fn time_of_use_rate(
    contract: &ElectricityContract,
    kind: RateKind,
) -> (Option<f64>, Option<String>) {
    let Some(tou) = contract
        .tariff_period
        .iter()
        .flat_map(|p| p.time_of_use_rates.iter())
        .find(|t| t.rate_type.as_deref().map(RateKind::parse) == Some(kind))
    else {
        return (None, None);
    };
    let windows = tou_windows(tou);
    let times = if windows.is_empty() {
        None
    } else {
        Some(
            windows
                .iter()
                .map(TimeWindow::label)
                .collect::<Vec<_>>()
                .join(", "),
        )
    };
    (first_rate(&tou.rates), times)
}

fn tou_windows(tou: &TimeOfUseRateWire) -> Vec<TimeWindow> {
    tou.time_of_use
        .iter()
        .filter_map(|w| parse_window(&w.days, w.start_time.as_deref(), w.end_time.as_deref()))
        .collect()
}

fn parse_window(days: &[String], start: Option<&str>, end: Option<&str>) -> Option<TimeWindow> {
    Some(TimeWindow {
        days: days.to_vec(),
        start: parse_time(start?)?,
        end: parse_time(end?)?,
    })
}

/// Accepts `HH:MM`, `HH:MM:SS`, `HHMM` and `H:MM`. `24:00` is clamped to `23:59`.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let digits = value
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    let (hours, minutes) = match digits.len() {
        3 => (&digits[..1], &digits[1..3]),
        4 | 6 => (&digits[..2], &digits[2..4]),
        _ => return None,
    };
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours == 24 && minutes == 0 {
        return NaiveTime::from_hms_opt(23, 59, 0);
    }
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

fn first_rate(rates: &[RateWire]) -> Option<f64> {
    rates.iter().find_map(|r| r.unit_price)
}

fn feed_in_tariff(contract: &ElectricityContract) -> Option<f64> {
    let mut prices = Vec::new();
    for tariff in &contract.solar_feed_in_tariff {
        if let Some(single) = &tariff.single_tariff {
            prices.extend(single.rates.iter().filter_map(|r| r.unit_price));
        }
        if let Some(varying) = &tariff.time_varying_tariffs {
            collect_unit_prices(varying, &mut prices);
        }
    }
    prices.into_iter().reduce(f64::max)
}

fn collect_unit_prices(value: &JsonValue, out: &mut Vec<f64>) {
    match value {
        JsonValue::Object(map) => {
            if let Some(price) = map.get("unitPrice").and_then(decimal_from_json) {
                out.push(price);
            }
            for nested in map.values() {
                collect_unit_prices(nested, out);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_unit_prices(item, out);
            }
        }
        _ => {}
    }
}

fn described_items(value: Option<&JsonValue>) -> Vec<DescribedItemWire> {
    value
        .and_then(|v| serde_json::from_value::<Vec<DescribedItemWire>>(v.clone()).ok())
        .unwrap_or_default()
}

fn item_text(item: &DescribedItemWire) -> String {
    [
        item.display_name.as_deref(),
        item.description.as_deref(),
        item.category.as_deref(),
        item.eligibility.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
}

fn mentions(item: &DescribedItemWire, needles: &[&str]) -> bool {
    let text = item_text(item).to_ascii_lowercase();
    needles.iter().any(|needle| text.contains(needle))
}

fn dollar_amount_in(item: &DescribedItemWire) -> Option<f64> {
    extract_dollar_amount(&item_text(item))
}

/// First `$<amount>` in free text, e.g. `"Get $1,200 off"` -> `1200.0`.
pub fn extract_dollar_amount(text: &str) -> Option<f64> {
    text.split('$').skip(1).find_map(|rest| {
        let amount = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .filter(|c| *c != ',')
            .collect::<String>();
        amount.trim_end_matches('.').parse::<f64>().ok()
    })
}

fn blob(value: Option<&JsonValue>) -> Option<JsonValue> {
    value.filter(|v| !v.is_null()).cloned()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow {
            days: vec![],
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    #[test]
    fn parses_time_formats() {
        assert_eq!(parse_time("14:00"), NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(parse_time("0700"), NaiveTime::from_hms_opt(7, 0, 0));
        assert_eq!(parse_time("9:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_time("22:00:00"), NaiveTime::from_hms_opt(22, 0, 0));
        assert_eq!(parse_time("24:00"), NaiveTime::from_hms_opt(23, 59, 0));
        assert_eq!(parse_time("noon"), None);
    }

    #[test]
    fn near_zero_rates_are_solar_sponge_or_super_off_peak() {
        let midday = [window((10, 0), (14, 0))];
        let night = [window((1, 0), (5, 0))];
        assert_eq!(
            display_name_for(RateKind::OffPeak, None, 0.0, &midday, false),
            "Solar Sponge"
        );
        assert_eq!(
            display_name_for(RateKind::OffPeak, None, 0.005, &night, false),
            "Super Off-Peak"
        );
    }

    #[test]
    fn cheap_early_morning_block_is_ev_charging() {
        let early = [window((0, 0), (6, 0))];
        assert_eq!(
            display_name_for(RateKind::OffPeak, None, 0.08, &early, false),
            "EV Charging"
        );
        // Not cheap enough.
        assert_eq!(
            display_name_for(RateKind::OffPeak, None, 0.22, &early, false),
            "Off-Peak"
        );
    }

    #[test]
    fn repeated_types_get_window_qualifiers() {
        let evening = [window((16, 0), (21, 0))];
        let overnight = [window((22, 0), (7, 0))];
        assert_eq!(
            display_name_for(RateKind::Peak, None, 0.45, &evening, true),
            "Peak (Evening)"
        );
        assert_eq!(
            display_name_for(RateKind::OffPeak, None, 0.2, &overnight, true),
            "Off-Peak (Overnight)"
        );
        assert_eq!(
            display_name_for(RateKind::Peak, None, 0.45, &evening, false),
            "Peak"
        );
        assert_eq!(
            display_name_for(RateKind::Other, Some("Controlled Load 1"), 0.2, &evening, false),
            "Controlled Load 1"
        );
    }

    #[test]
    fn dollar_amounts_are_found_in_text() {
        assert_eq!(extract_dollar_amount("Get $1,200 off a battery"), Some(1200.0));
        assert_eq!(extract_dollar_amount("Earn $ 50.50 per event."), Some(50.5));
        assert_eq!(extract_dollar_amount("$ credits apply, up to $300"), Some(300.0));
        assert_eq!(extract_dollar_amount("no money here"), None);
    }

    #[test]
    fn timestamps_accept_rfc3339_and_dates() {
        assert!(parse_cdr_timestamp("2025-02-01T10:00:00+11:00").is_some());
        assert_eq!(
            parse_cdr_timestamp("2025-02-01").map(|t| t.to_rfc3339()),
            Some("2025-02-01T00:00:00+00:00".to_string())
        );
        assert!(parse_cdr_timestamp("yesterday").is_none());
    }
}
