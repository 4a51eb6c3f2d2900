//! Remote CRM client
//!
//! The CRM exposes two RPC services: `common` (authentication) and `object`
//! (generic model operations). Calls go over JSON-RPC, one request per call.

pub mod fields;
pub mod scan;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::ser::{SerializeSeq, SerializeTuple};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::CrmConfig;

pub use scan::{read_chunked, PagedScan};

/// Identifier of a remote record
pub type RecordId = i64;

/// A record as returned by `read`: field name to raw value
pub type Record = Map<String, Value>;

pub type CrmResult<T> = Result<T, CrmError>;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("CRM returned an error: {message}")]
    Rpc { message: String },
    #[error("CRM authentication failed for user '{0}'")]
    AuthenticationFailed(String),
    #[error("Unexpected CRM response: {0}")]
    Decode(String),
}

/// Comparison operators understood by the remote search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gte,
    Lt,
    ILike,
    NotILike,
    In,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut triple = serializer.serialize_tuple(3)?;
        triple.serialize_element(&self.field)?;
        triple.serialize_element(self.op.as_str())?;
        triple.serialize_element(&self.value)?;
        triple.end()
    }
}

/// Search filter: all conditions must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain(Vec<Condition>);

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, op: Operator, value: impl Into<Value>) -> Self {
        self.0.push(Condition {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    #[cfg(test)]
    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for condition in &self.0 {
            seq.serialize_element(condition)?;
        }
        seq.end()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Sort clause, e.g. "date desc"
    pub order: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Generic operations against named remote collections
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn search(
        &self,
        model: &str,
        domain: &Domain,
        options: &SearchOptions,
    ) -> CrmResult<Vec<RecordId>>;

    async fn read(&self, model: &str, ids: &[RecordId], fields: &[&str]) -> CrmResult<Vec<Record>>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    message: String,
    #[serde(default)]
    data: Option<RpcFaultData>,
}

#[derive(Debug, Deserialize)]
struct RpcFaultData {
    #[serde(default)]
    message: Option<String>,
}

/// Authenticated session against the CRM
pub struct CrmClient {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    uid: i64,
    password: String,
    next_id: AtomicU64,
}

impl CrmClient {
    /// Authenticate once; the returned client reuses the session for every call
    pub async fn connect(config: &CrmConfig) -> CrmResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let endpoint = format!("{}/jsonrpc", config.url.trim_end_matches('/'));

        let uid = call(
            &http,
            &endpoint,
            0,
            "common",
            "authenticate",
            json!([config.database, config.username, config.password, {}]),
        )
        .await?;

        let uid = match uid.as_i64() {
            Some(uid) if uid > 0 => uid,
            _ => return Err(CrmError::AuthenticationFailed(config.username.clone())),
        };

        Ok(Self {
            http,
            endpoint,
            database: config.database.clone(),
            uid,
            password: config.password.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    async fn execute_kw(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> CrmResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        call(
            &self.http,
            &self.endpoint,
            id,
            "object",
            "execute_kw",
            json!([self.database, self.uid, self.password, model, method, args, kwargs]),
        )
        .await
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn search(
        &self,
        model: &str,
        domain: &Domain,
        options: &SearchOptions,
    ) -> CrmResult<Vec<RecordId>> {
        let mut kwargs = Map::new();
        if let Some(order) = &options.order {
            kwargs.insert("order".to_string(), json!(order));
        }
        if let Some(limit) = options.limit {
            kwargs.insert("limit".to_string(), json!(limit));
        }
        if options.offset > 0 {
            kwargs.insert("offset".to_string(), json!(options.offset));
        }

        let result = self
            .execute_kw(model, "search", json!([domain]), Value::Object(kwargs))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| CrmError::Decode(format!("{} search ids: {}", model, e)))
    }

    async fn read(&self, model: &str, ids: &[RecordId], fields: &[&str]) -> CrmResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .execute_kw(model, "read", json!([ids]), json!({ "fields": fields }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| CrmError::Decode(format!("{} read records: {}", model, e)))
    }
}

/// Single JSON-RPC round trip
async fn call(
    http: &reqwest::Client,
    endpoint: &str,
    id: u64,
    service: &str,
    method: &str,
    args: Value,
) -> CrmResult<Value> {
    debug!(service, method, id, "CRM call");

    let body = json!({
        "jsonrpc": "2.0",
        "method": "call",
        "params": { "service": service, "method": method, "args": args },
        "id": id,
    });

    let response: RpcResponse = http
        .post(endpoint)
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if let Some(fault) = response.error {
        let message = fault
            .data
            .and_then(|d| d.message)
            .unwrap_or(fault.message);
        return Err(CrmError::Rpc { message });
    }

    response
        .result
        .ok_or_else(|| CrmError::Decode(format!("{}.{} returned no result", service, method)))
}
