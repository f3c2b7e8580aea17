//! CDR energy plan client, retailer registry and detail extraction.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use biq_core::{CustomerType, FuelType, RemotePlanSummary, RetailerDescriptor};
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

mod extract;
mod schema;

pub use extract::{
    build_tariff_periods, classify_tariff, display_name_for, extract_dollar_amount,
    extract_plan_record, parse_cdr_timestamp, parse_time, plan_state, ExtractError,
};
pub use schema::*;

pub const CRATE_NAME: &str = "biq-cdr";

pub const LIST_API_VERSION: &str = "1";
pub const DETAIL_API_VERSION: &str = "3";
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

const PLANS_PATH: &str = "cds-au/v1/energy/plans";
const EMBEDDED_RETAILERS: &str = include_str!("../retailers.yaml");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reading retailer registry {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing retailer registry")]
    Parse(#[from] serde_yaml::Error),
    #[error("retailer registry is empty")]
    Empty,
    #[error("retailer entry {index} has an empty {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("duplicate retailer slug `{0}`")]
    DuplicateSlug(String),
    #[error("unknown retailer `{0}`")]
    UnknownRetailer(String),
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    retailers: Vec<RetailerDescriptor>,
}

/// Which retailers one sync invocation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetailerSelection {
    Single(String),
    PriorityOnly,
    All,
}

impl RetailerSelection {
    /// A slug wins over `priority_only`.
    pub fn from_params(retailer: Option<&str>, priority_only: bool) -> Self {
        match retailer.map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => Self::Single(slug.to_string()),
            None if priority_only => Self::PriorityOnly,
            None => Self::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetailerRegistry {
    retailers: Vec<RetailerDescriptor>,
}

impl RetailerRegistry {
    pub fn embedded() -> Result<Self, RegistryError> {
        Self::from_yaml_str(EMBEDDED_RETAILERS)
    }

    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Loads the operator-supplied file when given, the embedded table otherwise.
    pub fn load(override_path: Option<&Path>) -> Result<Self, RegistryError> {
        match override_path {
            Some(path) => Self::from_path(path),
            None => Self::embedded(),
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_yaml::from_str(raw)?;
        Self::new(file.retailers)
    }

    pub fn new(retailers: Vec<RetailerDescriptor>) -> Result<Self, RegistryError> {
        if retailers.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for (index, retailer) in retailers.iter().enumerate() {
            if retailer.slug.trim().is_empty() {
                return Err(RegistryError::MissingField { index, field: "slug" });
            }
            if retailer.base_uri.trim().is_empty() {
                return Err(RegistryError::MissingField {
                    index,
                    field: "baseUri",
                });
            }
            if !seen.insert(retailer.slug.as_str()) {
                return Err(RegistryError::DuplicateSlug(retailer.slug.clone()));
            }
        }
        Ok(Self { retailers })
    }

    pub fn all(&self) -> &[RetailerDescriptor] {
        &self.retailers
    }

    pub fn len(&self) -> usize {
        self.retailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retailers.is_empty()
    }

    pub fn by_slug(&self, slug: &str) -> Option<&RetailerDescriptor> {
        self.retailers.iter().find(|r| r.slug.eq_ignore_ascii_case(slug))
    }

    pub fn select(
        &self,
        selection: &RetailerSelection,
    ) -> Result<Vec<RetailerDescriptor>, RegistryError> {
        match selection {
            RetailerSelection::Single(slug) => self
                .by_slug(slug)
                .cloned()
                .map(|r| vec![r])
                .ok_or_else(|| RegistryError::UnknownRetailer(slug.clone())),
            RetailerSelection::PriorityOnly => Ok(self
                .retailers
                .iter()
                .filter(|r| r.is_priority())
                .cloned()
                .collect()),
            RetailerSelection::All => Ok(self.retailers.clone()),
        }
    }
}

/// Enforces a minimum gap between consecutive upstream calls.
///
/// Built once per process and shared; callers that arrive early sleep out the remainder.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid CDR url for {base_uri}")]
    InvalidUrl { base_uri: String },
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404, .. })
    }
}

/// One page of the plan list, already filtered to entries with a plan id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanListPage {
    pub plans: Vec<RemotePlanSummary>,
    /// Raw entry count on the page, including entries without a plan id.
    pub entries: usize,
    pub total_pages: Option<u32>,
    pub total_records: Option<u64>,
}

impl PlanListPage {
    pub fn from_wire(response: PlanListResponse) -> Self {
        let entries = response.data.plans.len();
        let plans = response
            .data
            .plans
            .into_iter()
            .filter_map(|wire| {
                let plan_id = wire.plan_id?.trim().to_string();
                if plan_id.is_empty() {
                    return None;
                }
                Some(RemotePlanSummary {
                    plan_id,
                    last_updated: wire.last_updated.as_deref().and_then(parse_cdr_timestamp),
                    fuel_type: wire
                        .fuel_type
                        .as_deref()
                        .map(FuelType::parse)
                        .unwrap_or(FuelType::Other),
                    customer_type: wire
                        .customer_type
                        .as_deref()
                        .map(CustomerType::parse)
                        .unwrap_or(CustomerType::Other),
                })
            })
            .collect();
        Self {
            plans,
            entries,
            total_pages: response.meta.total_pages,
            total_records: response.meta.total_records,
        }
    }
}

/// Upstream source of plan reference data.
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// `page` is 1-based.
    async fn fetch_plan_page(
        &self,
        retailer: &RetailerDescriptor,
        page: u32,
    ) -> Result<PlanListPage, FetchError>;

    async fn fetch_plan_detail(
        &self,
        retailer: &RetailerDescriptor,
        plan_id: &str,
    ) -> Result<PlanDetail, FetchError>;
}

#[derive(Debug, Clone)]
pub struct CdrClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub page_size: u32,
}

impl Default for CdrClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Public, unauthenticated CDR product reference data client.
#[derive(Debug, Clone)]
pub struct CdrClient {
    client: reqwest::Client,
    page_size: u32,
}

impl CdrClient {
    pub fn new(config: CdrClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            page_size: config.page_size.max(1),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        api_version: &str,
    ) -> Result<T, FetchError> {
        let url_text = url.to_string();
        debug!(url = %url_text, x_v = api_version, "cdr request");
        let response = self
            .client
            .get(url)
            .header("x-v", api_version)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url_text.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url_text,
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Request {
            url: url_text.clone(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url_text,
            source,
        })
    }
}

#[async_trait]
impl PlanSource for CdrClient {
    async fn fetch_plan_page(
        &self,
        retailer: &RetailerDescriptor,
        page: u32,
    ) -> Result<PlanListPage, FetchError> {
        let url = list_url(&retailer.base_uri, self.page_size, page)?;
        let response: PlanListResponse = self.get_json(url, LIST_API_VERSION).await?;
        Ok(PlanListPage::from_wire(response))
    }

    async fn fetch_plan_detail(
        &self,
        retailer: &RetailerDescriptor,
        plan_id: &str,
    ) -> Result<PlanDetail, FetchError> {
        let url = detail_url(&retailer.base_uri, plan_id)?;
        let response: PlanDetailResponse = self.get_json(url, DETAIL_API_VERSION).await?;
        Ok(response.data)
    }
}

fn plans_url(base_uri: &str) -> Result<Url, FetchError> {
    Url::parse(&format!("{}/{PLANS_PATH}", base_uri.trim().trim_end_matches('/'))).map_err(|_| {
        FetchError::InvalidUrl {
            base_uri: base_uri.to_string(),
        }
    })
}

/// `{base}/cds-au/v1/energy/plans?type=ALL&page-size={n}&page={p}`
pub fn list_url(base_uri: &str, page_size: u32, page: u32) -> Result<Url, FetchError> {
    let mut url = plans_url(base_uri)?;
    url.query_pairs_mut()
        .append_pair("type", "ALL")
        .append_pair("page-size", &page_size.to_string())
        .append_pair("page", &page.to_string());
    Ok(url)
}

/// `{base}/cds-au/v1/energy/plans/{planId}`, with the id percent-encoded as one segment.
pub fn detail_url(base_uri: &str, plan_id: &str) -> Result<Url, FetchError> {
    let mut url = plans_url(base_uri)?;
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidUrl {
            base_uri: base_uri.to_string(),
        })?
        .pop_if_empty()
        .push(plan_id);
    Ok(url)
}
