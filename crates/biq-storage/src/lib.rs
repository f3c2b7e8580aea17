//! Plan persistence for the CDR sync: a Postgres store plus an in-memory store with the same contract.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use biq_core::{
    AusState, CustomerType, FuelType, PlanRecord, RateKind, StoredPlanState, TariffPeriod,
    TariffType, TimeWindow,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "biq-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Filter for the user-facing plan search. Inactive plans are never returned.
#[derive(Debug, Clone, Default)]
pub struct PlanQuery {
    pub state: Option<AusState>,
    pub retailer_id: Option<String>,
    pub limit: usize,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Every persisted plan of one retailer, active or not.
    async fn plan_index(
        &self,
        retailer_id: &str,
    ) -> Result<HashMap<String, StoredPlanState>, StoreError>;

    /// Insert or fully replace a plan, re-creating all of its tariff periods.
    async fn upsert_plan(&self, plan: &PlanRecord) -> Result<UpsertOutcome, StoreError>;

    /// Marks the given active plans inactive and bumps their row timestamp.
    async fn deactivate_plans(
        &self,
        retailer_id: &str,
        plan_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Marks the given inactive plans active again without touching their content.
    async fn reactivate_plans(
        &self,
        retailer_id: &str,
        plan_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn search_active(&self, query: &PlanQuery) -> Result<Vec<PlanRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const PLAN_COLUMNS: &str = r#"
    id, retailer_id, retailer_name, brand, name, description, state, fuel_type, customer_type,
    tariff_type, plan_type, daily_supply_charge, single_rate, peak_rate, shoulder_rate,
    off_peak_rate, peak_times, shoulder_times, off_peak_times, demand_charge, feed_in_tariff,
    battery_incentive, battery_incentive_value, vpp_available, vpp_credit, discounts, incentives,
    fees, eligibility, green_power_charges, controlled_load, contract_term, payment_options,
    green_power_available, green_power_percent, effective_from, application_uri, is_active,
    last_updated, synced_at
"#;

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn plan_index(
        &self,
        retailer_id: &str,
    ) -> Result<HashMap<String, StoredPlanState>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, last_updated, is_active, synced_at
              FROM plans
             WHERE retailer_id = $1
            "#,
        )
        .bind(retailer_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            out.insert(
                id,
                StoredPlanState {
                    last_updated: row.try_get("last_updated")?,
                    is_active: row.try_get("is_active")?,
                    synced_at: Some(row.try_get("synced_at")?),
                },
            );
        }
        Ok(out)
    }

    async fn upsert_plan(&self, plan: &PlanRecord) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted: bool = sqlx::query(
            r#"
            INSERT INTO plans (
                id, retailer_id, retailer_name, brand, name, description, state, fuel_type,
                customer_type, tariff_type, plan_type, daily_supply_charge, single_rate, peak_rate,
                shoulder_rate, off_peak_rate, peak_times, shoulder_times, off_peak_times,
                demand_charge, feed_in_tariff, battery_incentive, battery_incentive_value,
                vpp_available, vpp_credit, discounts, incentives, fees, eligibility,
                green_power_charges, controlled_load, contract_term, payment_options,
                green_power_available, green_power_percent, effective_from, application_uri,
                is_active, last_updated, synced_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34,
                $35, $36, $37, $38, $39, $40, $40
            )
            ON CONFLICT (id) DO UPDATE SET
                retailer_id = EXCLUDED.retailer_id,
                retailer_name = EXCLUDED.retailer_name,
                brand = EXCLUDED.brand,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                state = EXCLUDED.state,
                fuel_type = EXCLUDED.fuel_type,
                customer_type = EXCLUDED.customer_type,
                tariff_type = EXCLUDED.tariff_type,
                plan_type = EXCLUDED.plan_type,
                daily_supply_charge = EXCLUDED.daily_supply_charge,
                single_rate = EXCLUDED.single_rate,
                peak_rate = EXCLUDED.peak_rate,
                shoulder_rate = EXCLUDED.shoulder_rate,
                off_peak_rate = EXCLUDED.off_peak_rate,
                peak_times = EXCLUDED.peak_times,
                shoulder_times = EXCLUDED.shoulder_times,
                off_peak_times = EXCLUDED.off_peak_times,
                demand_charge = EXCLUDED.demand_charge,
                feed_in_tariff = EXCLUDED.feed_in_tariff,
                battery_incentive = EXCLUDED.battery_incentive,
                battery_incentive_value = EXCLUDED.battery_incentive_value,
                vpp_available = EXCLUDED.vpp_available,
                vpp_credit = EXCLUDED.vpp_credit,
                discounts = EXCLUDED.discounts,
                incentives = EXCLUDED.incentives,
                fees = EXCLUDED.fees,
                eligibility = EXCLUDED.eligibility,
                green_power_charges = EXCLUDED.green_power_charges,
                controlled_load = EXCLUDED.controlled_load,
                contract_term = EXCLUDED.contract_term,
                payment_options = EXCLUDED.payment_options,
                green_power_available = EXCLUDED.green_power_available,
                green_power_percent = EXCLUDED.green_power_percent,
                effective_from = EXCLUDED.effective_from,
                application_uri = EXCLUDED.application_uri,
                is_active = EXCLUDED.is_active,
                last_updated = EXCLUDED.last_updated,
                synced_at = EXCLUDED.synced_at,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.retailer_id)
        .bind(&plan.retailer_name)
        .bind(&plan.brand)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.state.map(AusState::as_str))
        .bind(plan.fuel_type.as_str())
        .bind(plan.customer_type.as_str())
        .bind(plan.tariff_type.as_str())
        .bind(&plan.plan_type)
        .bind(plan.daily_supply_charge)
        .bind(plan.single_rate)
        .bind(plan.peak_rate)
        .bind(plan.shoulder_rate)
        .bind(plan.off_peak_rate)
        .bind(&plan.peak_times)
        .bind(&plan.shoulder_times)
        .bind(&plan.off_peak_times)
        .bind(plan.demand_charge)
        .bind(plan.feed_in_tariff)
        .bind(plan.battery_incentive)
        .bind(plan.battery_incentive_value)
        .bind(plan.vpp_available)
        .bind(plan.vpp_credit)
        .bind(&plan.discounts)
        .bind(&plan.incentives)
        .bind(&plan.fees)
        .bind(&plan.eligibility)
        .bind(&plan.green_power_charges)
        .bind(&plan.controlled_load)
        .bind(&plan.contract_term)
        .bind(&plan.payment_options)
        .bind(plan.green_power_available)
        .bind(plan.green_power_percent)
        .bind(plan.effective_from)
        .bind(&plan.application_uri)
        .bind(plan.is_active)
        .bind(plan.last_updated)
        .bind(plan.synced_at)
        .fetch_one(&mut *tx)
        .await?
        .try_get("inserted")?;

        sqlx::query("DELETE FROM tariff_periods WHERE plan_id = $1")
            .bind(&plan.id)
            .execute(&mut *tx)
            .await?;

        for period in &plan.tariff_periods {
            sqlx::query(
                r#"
                INSERT INTO tariff_periods
                    (id, plan_id, kind, display_name, rate, time_windows, sequence_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(period.id)
            .bind(&plan.id)
            .bind(period.kind.as_str())
            .bind(&period.display_name)
            .bind(period.rate)
            .bind(Json(&period.time_windows))
            .bind(period.sequence_order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(plan_id = %plan.id, inserted, periods = plan.tariff_periods.len(), "plan upserted");

        Ok(if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn deactivate_plans(
        &self,
        retailer_id: &str,
        plan_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if plan_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE plans
               SET is_active = FALSE,
                   updated_at = $3
             WHERE retailer_id = $1
               AND id = ANY($2)
               AND is_active
            "#,
        )
        .bind(retailer_id)
        .bind(plan_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reactivate_plans(
        &self,
        retailer_id: &str,
        plan_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if plan_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE plans
               SET is_active = TRUE,
                   updated_at = $3
             WHERE retailer_id = $1
               AND id = ANY($2)
               AND NOT is_active
            "#,
        )
        .bind(retailer_id)
        .bind(plan_ids)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn search_active(&self, query: &PlanQuery) -> Result<Vec<PlanRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PLAN_COLUMNS}
              FROM plans
             WHERE is_active
               AND ($1::text IS NULL OR state = $1)
               AND ($2::text IS NULL OR retailer_id = $2)
             ORDER BY retailer_id, name, id
             LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(query.state.map(AusState::as_str))
            .bind(&query.retailer_id)
            .bind(query.limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut plans = rows
            .iter()
            .map(plan_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if plans.is_empty() {
            return Ok(plans);
        }

        let ids = plans.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        let period_rows = sqlx::query(
            r#"
            SELECT id, plan_id, kind, display_name, rate, time_windows, sequence_order
              FROM tariff_periods
             WHERE plan_id = ANY($1)
             ORDER BY plan_id, sequence_order
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut periods_by_plan: HashMap<String, Vec<TariffPeriod>> = HashMap::new();
        for row in &period_rows {
            let period = tariff_period_from_row(row)?;
            periods_by_plan
                .entry(period.plan_id.clone())
                .or_default()
                .push(period);
        }
        for plan in &mut plans {
            plan.tariff_periods = periods_by_plan.remove(&plan.id).unwrap_or_default();
        }
        Ok(plans)
    }
}

fn plan_from_row(row: &PgRow) -> Result<PlanRecord, StoreError> {
    let tariff_type: String = row.try_get("tariff_type")?;
    let state: Option<String> = row.try_get("state")?;
    Ok(PlanRecord {
        id: row.try_get("id")?,
        retailer_id: row.try_get("retailer_id")?,
        retailer_name: row.try_get("retailer_name")?,
        brand: row.try_get("brand")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        state: state.as_deref().and_then(AusState::parse),
        fuel_type: FuelType::parse(&row.try_get::<String, _>("fuel_type")?),
        customer_type: CustomerType::parse(&row.try_get::<String, _>("customer_type")?),
        tariff_type: TariffType::parse(&tariff_type).ok_or(StoreError::InvalidColumn {
            column: "tariff_type",
            value: tariff_type.clone(),
        })?,
        plan_type: row.try_get("plan_type")?,
        daily_supply_charge: row.try_get("daily_supply_charge")?,
        single_rate: row.try_get("single_rate")?,
        peak_rate: row.try_get("peak_rate")?,
        shoulder_rate: row.try_get("shoulder_rate")?,
        off_peak_rate: row.try_get("off_peak_rate")?,
        peak_times: row.try_get("peak_times")?,
        shoulder_times: row.try_get("shoulder_times")?,
        off_peak_times: row.try_get("off_peak_times")?,
        demand_charge: row.try_get("demand_charge")?,
        feed_in_tariff: row.try_get("feed_in_tariff")?,
        battery_incentive: row.try_get("battery_incentive")?,
        battery_incentive_value: row.try_get("battery_incentive_value")?,
        vpp_available: row.try_get("vpp_available")?,
        vpp_credit: row.try_get("vpp_credit")?,
        discounts: row.try_get("discounts")?,
        incentives: row.try_get("incentives")?,
        fees: row.try_get("fees")?,
        eligibility: row.try_get("eligibility")?,
        green_power_charges: row.try_get("green_power_charges")?,
        controlled_load: row.try_get("controlled_load")?,
        contract_term: row.try_get("contract_term")?,
        payment_options: row.try_get("payment_options")?,
        green_power_available: row.try_get("green_power_available")?,
        green_power_percent: row.try_get("green_power_percent")?,
        effective_from: row.try_get("effective_from")?,
        application_uri: row.try_get("application_uri")?,
        is_active: row.try_get("is_active")?,
        last_updated: row.try_get("last_updated")?,
        synced_at: row.try_get("synced_at")?,
        tariff_periods: Vec::new(),
    })
}

fn tariff_period_from_row(row: &PgRow) -> Result<TariffPeriod, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let windows: Json<Vec<TimeWindow>> = row.try_get("time_windows")?;
    Ok(TariffPeriod {
        id,
        plan_id: row.try_get("plan_id")?,
        kind: RateKind::parse(&kind),
        display_name: row.try_get("display_name")?,
        rate: row.try_get("rate")?,
        time_windows: windows.0,
        sequence_order: row.try_get("sequence_order")?,
    })
}

/// In-process store used by tests and dry runs. Keeps whole records, so tariff periods are
/// replaced together with their plan.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    plans: Mutex<BTreeMap<String, MemoryRow>>,
}

#[derive(Debug, Clone)]
struct MemoryRow {
    plan: PlanRecord,
    updated_at: DateTime<Utc>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, plan_id: &str) -> Option<PlanRecord> {
        self.plans.lock().await.get(plan_id).map(|r| r.plan.clone())
    }

    pub async fn updated_at(&self, plan_id: &str) -> Option<DateTime<Utc>> {
        self.plans.lock().await.get(plan_id).map(|r| r.updated_at)
    }

    pub async fn len(&self) -> usize {
        self.plans.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plans.lock().await.is_empty()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn plan_index(
        &self,
        retailer_id: &str,
    ) -> Result<HashMap<String, StoredPlanState>, StoreError> {
        Ok(self
            .plans
            .lock()
            .await
            .values()
            .filter(|r| r.plan.retailer_id == retailer_id)
            .map(|r| (r.plan.id.clone(), r.plan.stored_state()))
            .collect())
    }

    async fn upsert_plan(&self, plan: &PlanRecord) -> Result<UpsertOutcome, StoreError> {
        let row = MemoryRow {
            plan: plan.clone(),
            updated_at: plan.synced_at,
        };
        let previous = self.plans.lock().await.insert(plan.id.clone(), row);
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }

    async fn deactivate_plans(
        &self,
        retailer_id: &str,
        plan_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(set_active(&self.plans, retailer_id, plan_ids, false, at).await)
    }

    async fn reactivate_plans(
        &self,
        retailer_id: &str,
        plan_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(set_active(&self.plans, retailer_id, plan_ids, true, at).await)
    }

    async fn search_active(&self, query: &PlanQuery) -> Result<Vec<PlanRecord>, StoreError> {
        let plans = self.plans.lock().await;
        let mut out = plans
            .values()
            .map(|r| &r.plan)
            .filter(|p| p.is_active)
            .filter(|p| query.state.is_none() || p.state == query.state)
            .filter(|p| {
                query
                    .retailer_id
                    .as_deref()
                    .map_or(true, |id| p.retailer_id == id)
            })
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            (&a.retailer_id, &a.name, &a.id).cmp(&(&b.retailer_id, &b.name, &b.id))
        });
        out.truncate(query.limit.max(1));
        Ok(out)
    }
}

async fn set_active(
    plans: &Mutex<BTreeMap<String, MemoryRow>>,
    retailer_id: &str,
    plan_ids: &[String],
    active: bool,
    at: DateTime<Utc>,
) -> u64 {
    let mut plans = plans.lock().await;
    let mut changed = 0;
    for id in plan_ids {
        if let Some(row) = plans.get_mut(id) {
            if row.plan.retailer_id == retailer_id && row.plan.is_active != active {
                row.plan.is_active = active;
                row.updated_at = at;
                changed += 1;
            }
        }
    }
    changed
}
