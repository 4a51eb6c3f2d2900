//! Location import sheet: one row per place with a Wikimedia Commons thumbnail

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LocationsConfig;

/// Columns expected by the site's location importer; only the first two are filled
pub const HEADERS: &[&str] = &[
    "Title",
    "Thumbnail",
    "maps location name",
    "General overview",
    "Population and lifestyle",
    "Airport name",
    "Airport distance km",
    "Airport drive time min",
    "Beach name",
    "Beach distance km",
    "Beach drive time min",
    "Golf course name",
    "Golf distance km",
    "Golf drive time min",
    "History and character",
    "Property styles",
    "Property prices",
    "Things to do",
    "Education",
    "Points of interest",
    "Nearby restaurants",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Preference for Andalusian towns over people and media sharing the name
pub fn score(description: Option<&str>) -> i32 {
    let desc = description.unwrap_or_default().to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| desc.contains(w));

    let mut s = 0;
    if any(&["spain", "spanish"]) {
        s += 5;
    }
    if any(&["municipality", "town", "village", "city"]) {
        s += 3;
    }
    if any(&["málaga", "malaga", "granada", "andalusia", "andalucía"]) {
        s += 2;
    }
    if any(&["born", "actor", "album", "film"]) {
        s -= 5;
    }
    s
}

/// Highest scoring hit; the earlier hit wins a tie
pub fn best_match(hits: &[SearchHit]) -> Option<&SearchHit> {
    let mut best: Option<(&SearchHit, i32)> = None;
    for hit in hits {
        let s = score(hit.description.as_deref());
        if best.map_or(true, |(_, top)| s > top) {
            best = Some((hit, s));
        }
    }
    best.map(|(hit, _)| hit)
}

pub struct Wikimedia {
    http: reqwest::Client,
    search_url: String,
    entity_url: String,
    commons_url: String,
    fallback_file: String,
}

impl Wikimedia {
    pub fn new(config: &LocationsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            search_url: config.search_url.clone(),
            entity_url: config.entity_url.clone(),
            commons_url: config.commons_url.clone(),
            fallback_file: config.fallback_file.clone(),
        })
    }

    async fn search_entity(&self, place: &str) -> Result<Option<String>> {
        let response: SearchResponse = self
            .http
            .get(&self.search_url)
            .query(&[
                ("action", "wbsearchentities"),
                ("search", place),
                ("language", "en"),
                ("format", "json"),
                ("limit", "8"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(best_match(&response.search).map(|hit| hit.id.clone()))
    }

    /// File name of the entity's main image (P18)
    async fn image_file(&self, entity: &str) -> Result<Option<String>> {
        let data: Value = self
            .http
            .get(self.entity_url.replace("{id}", entity))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let pointer = format!("/entities/{}/claims/P18/0/mainsnak/datavalue/value", entity);
        Ok(data.pointer(&pointer).and_then(Value::as_str).map(str::to_string))
    }

    /// Direct Commons URL for a file name
    pub fn file_url(&self, file: &str) -> Result<String> {
        let mut url = Url::parse(&self.commons_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("{} cannot take a file name", self.commons_url))?
            .pop_if_empty()
            .push(file);
        Ok(url.to_string())
    }

    /// Image for the place, then for "<place> Spain", then the fallback
    pub async fn thumbnail(&self, place: &str) -> Result<String> {
        for query in [place.to_string(), format!("{} Spain", place)] {
            let Some(entity) = self.search_entity(&query).await? else {
                continue;
            };
            if let Some(file) = self.image_file(&entity).await? {
                debug!(place, entity = %entity, file = %file, "Found image");
                return self.file_url(&file);
            }
        }
        self.file_url(&self.fallback_file)
    }
}

/// Place names from the first column, header row skipped
pub fn read_titles(path: &Path) -> Result<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut titles = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(title) = record.get(0).filter(|t| !t.is_empty()) {
            titles.push(title.to_string());
        }
    }
    Ok(titles)
}

/// Build the import sheet; returns the number of rows written
pub async fn build_sheet(config: &LocationsConfig, wikimedia: &Wikimedia) -> Result<usize> {
    let titles = read_titles(Path::new(&config.input))?;
    let mut writer = WriterBuilder::new()
        .from_path(&config.output)
        .with_context(|| format!("Failed to create {}", config.output))?;
    writer.write_record(HEADERS)?;

    for (i, title) in titles.iter().enumerate() {
        if i > 0 && config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
        }

        let thumbnail = wikimedia
            .thumbnail(title)
            .await
            .with_context(|| format!("Image lookup failed for {}", title))?;

        let mut row = vec![""; HEADERS.len()];
        row[0] = title.as_str();
        row[1] = thumbnail.as_str();
        writer.write_record(&row)?;
        writer.flush()?;

        info!(n = i + 1, total = titles.len(), place = %title, thumbnail = %thumbnail, "Location row written");
    }

    Ok(titles.len())
}
