//! Configuration management

use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Remote CRM, needed by `stats` and `export-contacts`
    #[serde(default)]
    pub crm: Option<CrmConfig>,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Property feed database, only needed by the HTTP API
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Deserialize)]
pub struct CrmConfig {
    /// Base URL of the CRM (e.g., "https://crm.example.com")
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Maximum ids per search page and per read call
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for CrmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl CrmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("CRM url cannot be empty");
        }
        if self.database.is_empty() || self.username.is_empty() {
            anyhow::bail!("CRM database and username must be set");
        }
        if self.password.is_empty() {
            anyhow::bail!("CRM password must be provided (INMOSUITE_CRM__PASSWORD)");
        }
        if self.page_size == 0 {
            anyhow::bail!("Invalid crm.page_size: 0 is not allowed");
        }
        Ok(())
    }
}

fn default_page_size() -> usize {
    5000
}

fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default = "default_geoip_database")]
    pub database: String,
    /// Refuse to start when the database cannot be loaded
    #[serde(default = "default_true")]
    pub required: bool,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            database: default_geoip_database(),
            required: true,
        }
    }
}

fn default_geoip_database() -> String {
    "GeoLite2-Country.mmdb".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub output: String,
    /// First month of the snapshot, as "YYYY-MM"
    pub epoch: String,
    /// Only count views on or after this date ("YYYY-MM-DD")
    pub views_since: Option<String>,
    pub top_links: usize,
    pub top_locations: usize,
    pub top_countries: usize,
    /// Public property URL, `{ref}` is replaced by the property reference
    pub link_template: String,
    pub price_bucket_width: u64,
    pub price_ceiling: u64,
    pub geo_cache_size: usize,
    pub lead_sources: Vec<String>,
    pub bot_agents: Vec<String>,
    pub features: StatsFeatures,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            output: "inquiry_stats.json".to_string(),
            epoch: "2025-01".to_string(),
            views_since: None,
            top_links: 20,
            top_locations: 25,
            top_countries: 20,
            link_template: "https://abracasabra-realestate.com/property/?ref_no={ref}".to_string(),
            price_bucket_width: 100_000,
            price_ceiling: 5_000_000,
            geo_cache_size: 10_000,
            lead_sources: default_lead_sources(),
            bot_agents: default_bot_agents(),
            features: StatsFeatures::default(),
        }
    }
}

impl StatsConfig {
    /// First day of the epoch month
    pub fn epoch_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&format!("{}-01", self.epoch), "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Invalid stats epoch '{}': {}", self.epoch, e))
    }

    pub fn views_since_date(&self) -> Result<Option<NaiveDate>> {
        self.views_since
            .as_deref()
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| anyhow::anyhow!("Invalid views_since '{}': {}", s, e))
            })
            .transpose()
    }
}

fn default_lead_sources() -> Vec<String> {
    [
        "Subject: Kyero.com",
        "Subject: Idealista",
        "Subject: Indomio",
        "Subject: AbraCasaBra Form",
        "Subject: thinkSPAIN",
        "Subject: Aplaceinthesun",
        "Subject: Pisos.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_bot_agents() -> Vec<String> {
    [
        "gptbot",
        "chatgpt-user",
        "oai-searchbot",
        "claudebot",
        "anthropic-ai",
        "perplexitybot",
        "ccbot",
        "bytespider",
        "amazonbot",
        "googlebot",
        "bingbot",
        "ahrefsbot",
        "semrushbot",
        "petalbot",
        "yandexbot",
        "mj12bot",
        "dotbot",
        "facebookexternalhit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Toggles for the optional snapshot sections
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsFeatures {
    pub top_links: bool,
    pub top_locations: bool,
    pub top_countries: bool,
    pub price_ranges: bool,
    pub price_by_nationality: bool,
}

impl Default for StatsFeatures {
    fn default() -> Self {
        Self {
            top_links: true,
            top_locations: true,
            top_countries: true,
            price_ranges: true,
            price_by_nationality: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Dashboard assets served for any non-API path
    pub static_dir: String,
    /// Supplemental buyers export merged into `/api/inquiries`
    pub buyers_export: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            static_dir: ".".to_string(),
            buyers_export: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
        }
    }
}

/// Loading a contact export into the agency database
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Agency whose contacts are replaced
    pub client_id: Option<i64>,
    /// CRM author display name to back-office user id
    pub authors: HashMap<String, i64>,
}

/// Location thumbnail builder
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    pub input: String,
    pub output: String,
    /// Pause between places, in milliseconds
    pub delay_ms: u64,
    pub user_agent: String,
    /// Commons file used when no image is found
    pub fallback_file: String,
    pub search_url: String,
    /// Entity data URL, `{id}` is replaced by the entity id
    pub entity_url: String,
    pub commons_url: String,
    pub timeout_secs: u64,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            input: "location-terms.csv".to_string(),
            output: "location-import-wikimedia.csv".to_string(),
            delay_ms: 600,
            user_agent: "InmoSuite-LocationBuilder/1.0".to_string(),
            fallback_file: "Andalusia_montage.jpg".to_string(),
            search_url: "https://www.wikidata.org/w/api.php".to_string(),
            entity_url: "https://www.wikidata.org/wiki/Special:EntityData/{id}.json".to_string(),
            commons_url: "https://commons.wikimedia.org/wiki/Special:FilePath/".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("INMOSUITE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("stats.lead_sources")
                    .with_list_parse_key("stats.bot_agents")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// CRM settings for the commands that talk to it
    pub fn crm(&self) -> Result<&CrmConfig> {
        self.crm
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Missing [crm] section (or INMOSUITE_CRM__* variables)"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(crm) = &self.crm {
            crm.validate()?;
        }

        self.stats.epoch_date()?;
        self.stats.views_since_date()?;
        if self.stats.price_bucket_width == 0 {
            anyhow::bail!("Invalid stats.price_bucket_width: 0 is not allowed");
        }
        if self.stats.price_ceiling < self.stats.price_bucket_width {
            anyhow::bail!(
                "stats.price_ceiling ({}) must be at least one bucket wide ({})",
                self.stats.price_ceiling,
                self.stats.price_bucket_width
            );
        }
        if !self.locations.entity_url.contains("{id}") {
            anyhow::bail!("locations.entity_url must contain an {{id}} placeholder");
        }
        if !self.stats.link_template.contains("{ref}") {
            anyhow::bail!("stats.link_template must contain a {{ref}} placeholder");
        }
        if self.stats.geo_cache_size == 0 {
            anyhow::bail!("Invalid stats.geo_cache_size: 0 is not allowed");
        }

        if let Some(db) = &self.database {
            if db.url.is_empty() {
                anyhow::bail!("Database URL cannot be empty");
            }
        }

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }
}
