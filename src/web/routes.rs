//! API routes: the statistics snapshot and the property feeds

use axum::{
    extract::{Query, State},
    Json,
};
use cached::proc_macro::cached;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::db::{Database, Feed, PropertyCard};

async fn read_json(path: &Path) -> Result<Value, ApiError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text).map_err(|source| ApiError::InvalidJson {
        path: path.display().to_string(),
        source,
    })
}

/// API: the latest inquiry statistics, with the buyers export merged in when configured
pub async fn api_inquiries(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mut snapshot = read_json(&state.snapshot_path).await?;

    if let Some(buyers_path) = &state.buyers_path {
        let buyers = read_json(buyers_path).await?;
        if let Value::Object(map) = &mut snapshot {
            map.insert("buyers".to_string(), buyers);
        }
    }

    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct PropertiesQuery {
    pub feed: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct PropertiesResponse {
    pub properties: Vec<PropertyCard>,
}

/// Cached feed page - 60 second TTL
#[cached(
    size = 128,
    time = 60,
    result = true,
    key = "(Feed, i64)",
    convert = r#"{ (feed, page) }"#
)]
async fn get_cached_properties(feed: Feed, page: i64, db: Database) -> Result<Vec<PropertyCard>, sqlx::Error> {
    db.list_properties(feed, page).await
}

/// API: one page of listings from a feed (cached for 60 seconds)
pub async fn api_properties(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PropertiesQuery>,
) -> Result<Json<PropertiesResponse>, ApiError> {
    let db = state.db.clone().ok_or(ApiError::Unavailable)?;
    let feed = Feed::from_param(query.feed.as_deref());

    let properties = get_cached_properties(feed, query.page.max(1), db).await?;
    Ok(Json(PropertiesResponse { properties }))
}
