//! Wire schema for the CDR energy plan endpoints.
//!
//! Every field the sync reads is optional or defaulted here, so a sparse or partially
//! malformed payload still decodes; extraction decides what a missing field means.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

/// `GET /cds-au/v1/energy/plans` (x-v 1).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanListResponse {
    #[serde(default)]
    pub data: PlanListData,
    #[serde(default)]
    pub meta: ListMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanListData {
    #[serde(default)]
    pub plans: Vec<PlanSummaryWire>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummaryWire {
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub customer_type: Option<String>,
}

/// `GET /cds-au/v1/energy/plans/{planId}` (x-v 3).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDetailResponse {
    pub data: PlanDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDetail {
    pub plan_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub customer_type: Option<String>,
    #[serde(default)]
    pub effective_from: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub application_uri: Option<String>,
    #[serde(default)]
    pub geography: Option<Geography>,
    #[serde(default)]
    pub electricity_contract: Option<ElectricityContract>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geography {
    #[serde(default)]
    pub included_postcodes: Vec<String>,
    #[serde(default)]
    pub excluded_postcodes: Vec<String>,
    #[serde(default)]
    pub distributors: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectricityContract {
    #[serde(default)]
    pub pricing_model: Option<String>,
    #[serde(default)]
    pub term_type: Option<String>,
    #[serde(default)]
    pub payment_option: Vec<String>,
    #[serde(default)]
    pub tariff_period: Vec<TariffPeriodWire>,
    #[serde(default)]
    pub solar_feed_in_tariff: Vec<FeedInTariffWire>,
    #[serde(default)]
    pub intrinsic_green_power: Option<IntrinsicGreenPower>,
    #[serde(default)]
    pub discounts: Option<JsonValue>,
    #[serde(default)]
    pub incentives: Option<JsonValue>,
    #[serde(default)]
    pub fees: Option<JsonValue>,
    #[serde(default)]
    pub eligibility: Option<JsonValue>,
    #[serde(default)]
    pub green_power_charges: Option<JsonValue>,
    #[serde(default)]
    pub controlled_load: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrinsicGreenPower {
    #[serde(default, deserialize_with = "opt_decimal")]
    pub green_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffPeriodWire {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub daily_supply_charge: Option<f64>,
    #[serde(default, rename = "rateBlockUType")]
    pub rate_block_u_type: Option<String>,
    #[serde(default)]
    pub single_rate: Option<SingleRateWire>,
    #[serde(default)]
    pub time_of_use_rates: Vec<TimeOfUseRateWire>,
    #[serde(default)]
    pub demand_charges: Vec<DemandChargeWire>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleRateWire {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub rates: Vec<RateWire>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWire {
    #[serde(default, deserialize_with = "opt_decimal")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOfUseRateWire {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub rate_type: Option<String>,
    #[serde(default)]
    pub rates: Vec<RateWire>,
    #[serde(default)]
    pub time_of_use: Vec<TimeOfUseWire>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOfUseWire {
    #[serde(default)]
    pub days: Vec<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandChargeWire {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub days: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedInTariffWire {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub single_tariff: Option<SingleTariffWire>,
    /// Object in older payload versions, array in newer ones.
    #[serde(default)]
    pub time_varying_tariffs: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleTariffWire {
    #[serde(default)]
    pub rates: Vec<RateWire>,
}

/// Shape shared by incentive and discount entries; only the text is inspected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedItemWire {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub eligibility: Option<String>,
}

/// CDR prices are decimal strings; some publishers send bare numbers. Anything else is `None`.
pub fn opt_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_json))
}

pub fn decimal_from_json(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_accept_strings_and_numbers() {
        let rate: RateWire = serde_json::from_str(r#"{"unitPrice":"0.2750","volume":4000}"#).unwrap();
        assert_eq!(rate.unit_price, Some(0.275));
        assert_eq!(rate.volume, Some(4000.0));

        let rate: RateWire = serde_json::from_str(r#"{"unitPrice":"n/a"}"#).unwrap();
        assert_eq!(rate.unit_price, None);

        let rate: RateWire = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(rate.unit_price, None);
    }

    #[test]
    fn sparse_list_page_decodes() {
        let page: PlanListResponse =
            serde_json::from_str(r#"{"data":{"plans":[{"planId":"X1"},{"lastUpdated":"2025-01-01T00:00:00Z"}]}}"#)
                .unwrap();
        assert_eq!(page.data.plans.len(), 2);
        assert_eq!(page.data.plans[0].plan_id.as_deref(), Some("X1"));
        assert!(page.data.plans[1].plan_id.is_none());
        assert!(page.meta.total_pages.is_none());
    }
}
