use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::{
    config::ClaimsQueueConfig,
    error::{ClaimsError, Result},
    models::{ClaimStatusUpdate, RawClaim, RawProgress, StatusTimestamps},
};

/// Collaborator serving claim records; every network call of the view-model goes through it.
#[async_trait]
pub trait ClaimsApi: Send + Sync {
    /// Fetch one page of claims, in the order the service returns them.
    async fn list_claims(&self, limit: u32, page: u32) -> Result<Vec<RawClaim>>;

    /// Fetch the live status of a single claim.
    async fn claim_status(&self, claim_id: &str) -> Result<ClaimStatusUpdate>;

    /// Ask the service to resubmit a failed or rejected claim.
    async fn retry_claim(&self, claim_id: &str) -> Result<()>;

    /// Location of the claim receipt document. Opened outside this crate.
    fn receipt_url(&self, claim_id: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct ClaimsListResponse {
    claims: Vec<RawClaim>,
}

/// reqwest-backed client for the SBS claims API.
#[derive(Clone)]
pub struct HttpClaimsApi {
    client: Client,
    base_url: String,
}

impl HttpClaimsApi {
    pub fn new(config: &ClaimsQueueConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::with_client(client, &config.api_base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: crate::config::normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClaimsError::Status {
                status: status.as_u16(),
                message: error_message_from_body(status, &body),
            });
        }

        let value: Value = if body.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&body)?
        };

        if value.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ClaimsError::Api(
                error_field(&value).unwrap_or_else(|| "Request failed".to_string()),
            ));
        }

        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl ClaimsApi for HttpClaimsApi {
    async fn list_claims(&self, limit: u32, page: u32) -> Result<Vec<RawClaim>> {
        let url = self.url("/api/claims");
        debug!(url = %url, limit, page, "Fetching claims page");

        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit), ("page", page)])
            .send()
            .await?;
        let list: ClaimsListResponse = Self::read_json(response).await?;
        Ok(list.claims)
    }

    async fn claim_status(&self, claim_id: &str) -> Result<ClaimStatusUpdate> {
        let url = self.url(&format!("/api/claim-status/{}", urlencoding::encode(claim_id)));
        debug!(url = %url, "Fetching claim status");

        let response = self.client.get(&url).send().await?;
        Self::read_json(response).await
    }

    async fn retry_claim(&self, claim_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/claims/{}/retry", urlencoding::encode(claim_id)));
        debug!(url = %url, "Requesting claim retry");

        let response = self.client.post(&url).json(&json!({})).send().await?;
        let _: Value = Self::read_json(response).await?;
        Ok(())
    }

    fn receipt_url(&self, claim_id: &str) -> String {
        self.url(&format!("/api/claim-receipt/{}", urlencoding::encode(claim_id)))
    }
}

fn error_field(value: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
}

fn error_message_from_body(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = error_field(&value) {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Endpoint of the claims API, used to inject failures into [`InMemoryClaimsApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    List,
    Status,
    Retry,
}

/// In-memory implementation of ClaimsApi
pub struct InMemoryClaimsApi {
    claims: Mutex<Vec<RawClaim>>,
    statuses: DashMap<String, ClaimStatusUpdate>,
    retries: DashMap<String, u32>,
    failures: DashMap<Endpoint, String>,
    list_calls: AtomicUsize,
    base_url: String,
}

impl InMemoryClaimsApi {
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(Vec::new()),
            statuses: DashMap::new(),
            retries: DashMap::new(),
            failures: DashMap::new(),
            list_calls: AtomicUsize::new(0),
            base_url: "memory://claims".to_string(),
        }
    }

    pub fn with_claims(claims: Vec<RawClaim>) -> Self {
        let api = Self::new();
        api.set_claims(claims);
        api
    }

    pub fn set_claims(&self, claims: Vec<RawClaim>) {
        *self.claims.lock().unwrap_or_else(PoisonError::into_inner) = claims;
    }

    /// Override what the status endpoint reports for a claim.
    pub fn set_status(&self, claim_id: impl Into<String>, update: ClaimStatusUpdate) {
        self.statuses.insert(claim_id.into(), update);
    }

    /// Make every call to `endpoint` fail with `message` until cleared.
    pub fn fail(&self, endpoint: Endpoint, message: impl Into<String>) {
        self.failures.insert(endpoint, message.into());
    }

    pub fn clear_failure(&self, endpoint: Endpoint) {
        self.failures.remove(&endpoint);
    }

    /// Number of list requests served so far, failed ones included.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn retry_count(&self, claim_id: &str) -> u32 {
        self.retries.get(claim_id).map(|entry| *entry).unwrap_or(0)
    }

    fn check(&self, endpoint: Endpoint) -> Result<()> {
        match self.failures.get(&endpoint) {
            Some(message) => Err(ClaimsError::Api(message.clone())),
            None => Ok(()),
        }
    }

    fn find_raw(&self, claim_id: &str) -> Option<RawClaim> {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|raw| raw.claim_id.as_deref() == Some(claim_id))
            .cloned()
    }
}

impl Default for InMemoryClaimsApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaimsApi for InMemoryClaimsApi {
    async fn list_claims(&self, limit: u32, page: u32) -> Result<Vec<RawClaim>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Endpoint::List)?;
        let skip = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        Ok(self
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn claim_status(&self, claim_id: &str) -> Result<ClaimStatusUpdate> {
        self.check(Endpoint::Status)?;
        if let Some(update) = self.statuses.get(claim_id) {
            return Ok(update.clone());
        }
        let raw = self.find_raw(claim_id).ok_or_else(|| ClaimsError::Status {
            status: 404,
            message: "Claim not found".to_string(),
        })?;
        Ok(ClaimStatusUpdate {
            status: raw.status,
            progress: raw.progress,
            timestamps: Some(StatusTimestamps {
                last_update: raw.last_update,
            }),
            tracking_url: raw.tracking_url,
        })
    }

    async fn retry_claim(&self, claim_id: &str) -> Result<()> {
        self.check(Endpoint::Retry)?;
        if self.find_raw(claim_id).is_none() && !self.statuses.contains_key(claim_id) {
            return Err(ClaimsError::Status {
                status: 404,
                message: "Claim not found".to_string(),
            });
        }
        *self.retries.entry(claim_id.to_string()).or_insert(0) += 1;
        // a resubmitted claim starts over
        self.statuses.insert(
            claim_id.to_string(),
            ClaimStatusUpdate {
                status: Some("processing".to_string()),
                progress: Some(RawProgress {
                    percentage: Some(0.0),
                    current_stage: Some("resubmitted".to_string()),
                }),
                timestamps: Some(StatusTimestamps {
                    last_update: Some(chrono::Utc::now().to_rfc3339()),
                }),
                tracking_url: None,
            },
        );
        Ok(())
    }

    fn receipt_url(&self, claim_id: &str) -> String {
        format!("{}/api/claim-receipt/{}", self.base_url, urlencoding::encode(claim_id))
    }
}
