//! Inquiry statistics pipeline
//!
//! Pulls lead and property-view data out of the CRM, aggregates it per month
//! and along several dimensions, and writes the result as a JSON snapshot
//! that the dashboard and `/api/inquiries` read.

pub mod bots;
pub mod leads;
pub mod months;
pub mod price;
pub mod top;
pub mod views;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::config::{Config, StatsFeatures};
use crate::crm::{CrmApi, CrmResult};
use crate::geoip::{CountryLookup, CountryResolver};
use bots::BotFilter;
use months::month_windows;
use price::{PriceBuckets, PriceRangeCounts};
use top::{CountryViews, TopLink, TopLocation};
use views::ViewScan;

/// Per-month section of the snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonthStats {
    pub autoimport_total: usize,
    pub wishlist_total: usize,
    pub property_views: u64,
    pub sources: BTreeMap<String, u64>,
    pub referrals: BTreeMap<String, u64>,
}

/// The snapshot document: month keys at the top level next to the aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InquiryStats {
    #[serde(flatten)]
    pub months: BTreeMap<String, MonthStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_viewed_links: Option<Vec<TopLink>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_viewed_locations: Option<Vec<TopLocation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_countries: Option<Vec<CountryViews>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_by_price_range: Option<PriceRangeCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_by_price_and_nationality: Option<BTreeMap<String, PriceRangeCounts>>,
}

/// Everything a run needs, resolved from configuration
#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub epoch: NaiveDate,
    pub page_size: usize,
    pub views: ViewScan,
    pub buckets: PriceBuckets,
    pub lead_sources: Vec<String>,
    pub top_links: usize,
    pub top_locations: usize,
    pub top_countries: usize,
    pub link_template: String,
    pub geo_cache_size: usize,
    pub features: StatsFeatures,
}

impl StatsSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let stats = &config.stats;
        let page_size = config.crm()?.page_size;
        Ok(Self {
            epoch: stats.epoch_date()?,
            page_size,
            views: ViewScan {
                page_size,
                since: stats.views_since_date()?,
                bots: BotFilter::new(&stats.bot_agents),
            },
            buckets: PriceBuckets::new(stats.price_bucket_width, stats.price_ceiling),
            lead_sources: stats.lead_sources.clone(),
            top_links: stats.top_links,
            top_locations: stats.top_locations,
            top_countries: stats.top_countries,
            link_template: stats.link_template.clone(),
            geo_cache_size: stats.geo_cache_size,
            features: stats.features.clone(),
        })
    }
}

/// A failed aggregate becomes an empty one; the rest of the run goes on
fn or_empty<T: Default>(section: &str, result: CrmResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(section, error = %e, "Aggregate failed, writing it empty");
            T::default()
        }
    }
}

/// Compute the full snapshot for every month from the epoch through `today`
pub async fn generate<C: CrmApi + ?Sized>(
    crm: &C,
    geo: &dyn CountryLookup,
    settings: &StatsSettings,
    today: NaiveDate,
) -> Result<InquiryStats> {
    let windows = month_windows(settings.epoch, today);
    info!(
        months = windows.len(),
        first = windows.first().map(|w| w.key.as_str()).unwrap_or("-"),
        "Generating inquiry stats"
    );

    let views_per_month = or_empty(
        "property_views",
        views::views_by_month(crm, &settings.views).await,
    );

    let mut stats = InquiryStats::default();
    for window in &windows {
        let leads = leads::month_leads(crm, window, &settings.lead_sources, settings.page_size)
            .await
            .with_context(|| format!("Failed to count leads for {}", window.key))?;

        stats.months.insert(
            window.key.clone(),
            MonthStats {
                autoimport_total: leads.autoimport_total,
                wishlist_total: leads.wishlist_total,
                property_views: views_per_month.get(&window.key).copied().unwrap_or(0),
                sources: leads.sources,
                referrals: leads.referrals,
            },
        );
        info!(month = %window.key, autoimport = leads.autoimport_total, wishlist = leads.wishlist_total, "Month counted");
    }

    let features = &settings.features;
    let mut resolver = CountryResolver::new(geo, settings.geo_cache_size);

    if features.top_links {
        stats.top_viewed_links = Some(or_empty(
            "top_viewed_links",
            top::top_viewed_links(crm, &settings.views, settings.top_links, &settings.link_template).await,
        ));
    }
    if features.top_locations {
        stats.top_viewed_locations = Some(or_empty(
            "top_viewed_locations",
            top::top_viewed_locations(crm, &settings.views, settings.top_locations).await,
        ));
    }
    if features.top_countries {
        stats.top_countries = Some(or_empty(
            "top_countries",
            top::top_countries(crm, &settings.views, &mut resolver, settings.top_countries).await,
        ));
    }
    if features.price_ranges {
        stats.views_by_price_range = Some(or_empty(
            "views_by_price_range",
            price::views_by_price_range(crm, &settings.views, &settings.buckets).await,
        ));
    }
    if features.price_by_nationality {
        stats.views_by_price_and_nationality = Some(or_empty(
            "views_by_price_and_nationality",
            price::views_by_price_and_nationality(crm, &settings.views, &settings.buckets, &mut resolver)
                .await,
        ));
    }

    resolver.log_usage();
    Ok(stats)
}

/// Replace the snapshot file; the old file survives any failure before the rename
pub async fn write_snapshot(path: &Path, stats: &InquiryStats) -> Result<()> {
    let json = serde_json::to_string_pretty(stats).context("Failed to serialize inquiry stats")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    tokio::fs::write(tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// One full pipeline run
pub async fn run<C: CrmApi + ?Sized>(config: &Config, crm: &C, geo: &dyn CountryLookup) -> Result<()> {
    let settings = StatsSettings::from_config(config)?;
    let today = chrono::Local::now().date_naive();

    let stats = generate(crm, geo, &settings, today).await?;

    let output = Path::new(&config.stats.output);
    write_snapshot(output, &stats).await?;
    info!(path = %output.display(), months = stats.months.len(), "Inquiry stats updated");
    Ok(())
}
