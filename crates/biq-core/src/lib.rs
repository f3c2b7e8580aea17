//! Core domain model for the BatteryIQ CDR plan sync.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "biq-core";

/// One energy retailer publishing CDR plan reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetailerDescriptor {
    pub name: String,
    pub slug: String,
    pub base_uri: String,
    pub priority: u8,
}

impl RetailerDescriptor {
    pub fn is_priority(&self) -> bool {
        self.priority == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuelType {
    Electricity,
    Gas,
    Dual,
    #[serde(other)]
    Other,
}

impl FuelType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ELECTRICITY" => Self::Electricity,
            "GAS" => Self::Gas,
            "DUAL" => Self::Dual,
            _ => Self::Other,
        }
    }

    /// Only electricity-bearing plans are kept by the sync.
    pub fn is_synced(self) -> bool {
        matches!(self, Self::Electricity | Self::Dual)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Electricity => "ELECTRICITY",
            Self::Gas => "GAS",
            Self::Dual => "DUAL",
            Self::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerType {
    Residential,
    Business,
    #[serde(other)]
    Other,
}

impl CustomerType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESIDENTIAL" => Self::Residential,
            "BUSINESS" => Self::Business,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Residential => "RESIDENTIAL",
            Self::Business => "BUSINESS",
            Self::Other => "OTHER",
        }
    }
}

/// Plan-list entry produced by a scan; discarded after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlanSummary {
    pub plan_id: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub fuel_type: FuelType,
    pub customer_type: CustomerType,
}

/// The slice of a persisted plan that reconciliation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPlanState {
    pub last_updated: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TariffType {
    Flat,
    TimeOfUse,
    Demand,
}

impl TariffType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "FLAT",
            Self::TimeOfUse => "TIME_OF_USE",
            Self::Demand => "DEMAND",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FLAT" => Some(Self::Flat),
            "TIME_OF_USE" => Some(Self::TimeOfUse),
            "DEMAND" => Some(Self::Demand),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateKind {
    Peak,
    Shoulder,
    OffPeak,
    SolarSponge,
    Single,
    Demand,
    Other,
}

impl RateKind {
    /// Maps a CDR time-of-use `type` value.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PEAK" => Self::Peak,
            "SHOULDER" => Self::Shoulder,
            "OFF_PEAK" | "OFFPEAK" => Self::OffPeak,
            "SOLAR_SPONGE" => Self::SolarSponge,
            "SINGLE" | "SINGLE_RATE" => Self::Single,
            "DEMAND" => Self::Demand,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Peak => "PEAK",
            Self::Shoulder => "SHOULDER",
            Self::OffPeak => "OFF_PEAK",
            Self::SolarSponge => "SOLAR_SPONGE",
            Self::Single => "SINGLE",
            Self::Demand => "DEMAND",
            Self::Other => "OTHER",
        }
    }

    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Peak => Some("Peak"),
            Self::Shoulder => Some("Shoulder"),
            Self::OffPeak => Some("Off-Peak"),
            Self::SolarSponge => Some("Solar Sponge"),
            Self::Single => Some("General Usage"),
            Self::Demand => Some("Demand"),
            Self::Other => None,
        }
    }
}

/// Australian jurisdiction of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AusState {
    Nsw,
    Vic,
    Qld,
    Sa,
    Wa,
    Tas,
    Nt,
    Act,
}

impl AusState {
    /// Fixed postcode ranges. ACT is carved out of the NSW block, so it is checked first.
    pub fn from_postcode(postcode: u32) -> Option<Self> {
        match postcode {
            200..=299 | 2600..=2618 | 2900..=2920 => Some(Self::Act),
            800..=999 => Some(Self::Nt),
            1000..=2999 => Some(Self::Nsw),
            3000..=3999 | 8000..=8999 => Some(Self::Vic),
            4000..=4999 | 9000..=9999 => Some(Self::Qld),
            5000..=5999 => Some(Self::Sa),
            6000..=6999 => Some(Self::Wa),
            7000..=7999 => Some(Self::Tas),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nsw => "NSW",
            Self::Vic => "VIC",
            Self::Qld => "QLD",
            Self::Sa => "SA",
            Self::Wa => "WA",
            Self::Tas => "TAS",
            Self::Nt => "NT",
            Self::Act => "ACT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NSW" => Some(Self::Nsw),
            "VIC" => Some(Self::Vic),
            "QLD" => Some(Self::Qld),
            "SA" => Some(Self::Sa),
            "WA" => Some(Self::Wa),
            "TAS" => Some(Self::Tas),
            "NT" => Some(Self::Nt),
            "ACT" => Some(Self::Act),
            _ => None,
        }
    }
}

/// A daily window during which a rate applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub days: Vec<String>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn label(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }

    pub fn start_hour(&self) -> u32 {
        self.start.hour()
    }

    pub fn is_weekend_only(&self) -> bool {
        !self.days.is_empty()
            && self
                .days
                .iter()
                .all(|d| matches!(d.to_ascii_uppercase().as_str(), "SAT" | "SUN" | "WEEKEND"))
    }
}

/// One rate block of a plan. Rows are replaced wholesale whenever the parent plan is updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffPeriod {
    pub id: Uuid,
    pub plan_id: String,
    pub kind: RateKind,
    pub display_name: String,
    pub rate: f64,
    pub time_windows: Vec<TimeWindow>,
    pub sequence_order: i32,
}

impl TariffPeriod {
    pub fn deterministic_id(plan_id: &str, sequence_order: i32) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            format!("{plan_id}:{sequence_order}").as_bytes(),
        )
    }
}

/// Durable plan record, owned by the sync pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecord {
    pub id: String,
    pub retailer_id: String,
    pub retailer_name: String,
    pub brand: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub state: Option<AusState>,
    pub fuel_type: FuelType,
    pub customer_type: CustomerType,
    pub tariff_type: TariffType,
    pub plan_type: Option<String>,
    pub daily_supply_charge: Option<f64>,
    pub single_rate: Option<f64>,
    pub peak_rate: Option<f64>,
    pub shoulder_rate: Option<f64>,
    pub off_peak_rate: Option<f64>,
    pub peak_times: Option<String>,
    pub shoulder_times: Option<String>,
    pub off_peak_times: Option<String>,
    pub demand_charge: Option<f64>,
    pub feed_in_tariff: Option<f64>,
    pub battery_incentive: bool,
    pub battery_incentive_value: Option<f64>,
    pub vpp_available: bool,
    pub vpp_credit: Option<f64>,
    pub discounts: Option<JsonValue>,
    pub incentives: Option<JsonValue>,
    pub fees: Option<JsonValue>,
    pub eligibility: Option<JsonValue>,
    pub green_power_charges: Option<JsonValue>,
    pub controlled_load: Option<JsonValue>,
    pub contract_term: Option<String>,
    pub payment_options: Vec<String>,
    pub green_power_available: bool,
    pub green_power_percent: Option<f64>,
    pub effective_from: Option<DateTime<Utc>>,
    pub application_uri: Option<String>,
    pub is_active: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
    pub tariff_periods: Vec<TariffPeriod>,
}

impl PlanRecord {
    pub fn stored_state(&self) -> StoredPlanState {
        StoredPlanState {
            last_updated: self.last_updated,
            is_active: self.is_active,
            synced_at: Some(self.synced_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postcode_ranges_map_to_states() {
        assert_eq!(AusState::from_postcode(2000), Some(AusState::Nsw));
        assert_eq!(AusState::from_postcode(2600), Some(AusState::Act));
        assert_eq!(AusState::from_postcode(2619), Some(AusState::Nsw));
        assert_eq!(AusState::from_postcode(2913), Some(AusState::Act));
        assert_eq!(AusState::from_postcode(3121), Some(AusState::Vic));
        assert_eq!(AusState::from_postcode(4000), Some(AusState::Qld));
        assert_eq!(AusState::from_postcode(5000), Some(AusState::Sa));
        assert_eq!(AusState::from_postcode(6000), Some(AusState::Wa));
        assert_eq!(AusState::from_postcode(7000), Some(AusState::Tas));
        assert_eq!(AusState::from_postcode(810), Some(AusState::Nt));
        assert_eq!(AusState::from_postcode(100), None);
    }

    #[test]
    fn only_electricity_and_dual_are_synced() {
        assert!(FuelType::parse("electricity").is_synced());
        assert!(FuelType::parse("DUAL").is_synced());
        assert!(!FuelType::parse("GAS").is_synced());
        assert!(!FuelType::parse("LPG").is_synced());
    }

    #[test]
    fn time_window_label_and_weekend() {
        let window = TimeWindow {
            days: vec!["SAT".into(), "SUN".into()],
            start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        };
        assert_eq!(window.label(), "14:00-20:00");
        assert!(window.is_weekend_only());
    }

    #[test]
    fn tariff_period_ids_are_stable() {
        let a = TariffPeriod::deterministic_id("AGL123MR", 0);
        let b = TariffPeriod::deterministic_id("AGL123MR", 0);
        let c = TariffPeriod::deterministic_id("AGL123MR", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
