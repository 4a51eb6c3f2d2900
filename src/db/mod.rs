//! Agency database in Postgres: property feed tables and contacts

pub mod contacts;

use anyhow::Result;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

/// Listings per page of `/api/properties`
pub const PER_PAGE: i64 = 18;

/// Third-party listing feed, each imported into its own pair of tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Resales,
    Kyero,
    Propmls,
}

impl Feed {
    /// Unknown or missing feed names fall back to `propmls`
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("resales") => Self::Resales,
            Some(v) if v.eq_ignore_ascii_case("kyero") => Self::Kyero,
            _ => Self::Propmls,
        }
    }

    fn tables(&self) -> FeedTables {
        match self {
            // resales images are keyed by the listing reference, stored as an integer
            Self::Resales => FeedTables {
                properties: "resales_properties",
                images: "resales_property_images",
                image_column: "image_url",
                image_key: "CAST(i.property_id AS TEXT) = p.ref",
            },
            Self::Kyero => FeedTables {
                properties: "kyero_properties",
                images: "kyero_property_images",
                image_column: "url",
                image_key: "i.property_id = p.id",
            },
            Self::Propmls => FeedTables {
                properties: "propmls_properties",
                images: "propmls_property_images",
                image_column: "url",
                image_key: "i.property_id = p.id",
            },
        }
    }

    /// Page query, newest reference first, with the first cover image
    pub fn listing_sql(&self) -> String {
        let t = self.tables();
        format!(
            r#"
            SELECT p.ref::text AS ref, p.price::float8 AS price, p.beds::int4 AS beds,
                   p.baths::int4 AS baths, p.town::text AS town,
                   (SELECT i.{image}::text FROM {images} i
                    WHERE {key} AND i.image_order = 1
                    LIMIT 1) AS cover_image
            FROM {properties} p
            ORDER BY p.ref DESC
            LIMIT $1 OFFSET $2
            "#,
            image = t.image_column,
            images = t.images,
            key = t.image_key,
            properties = t.properties,
        )
    }
}

struct FeedTables {
    properties: &'static str,
    images: &'static str,
    image_column: &'static str,
    image_key: &'static str,
}

/// Offset of a 1-based page; pages below 1 read the first page
pub fn page_offset(page: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(PER_PAGE)
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PropertyCard {
    #[serde(rename = "ref")]
    #[sqlx(rename = "ref")]
    pub reference: Option<String>,
    pub price: Option<f64>,
    pub beds: Option<i32>,
    pub baths: Option<i32>,
    pub town: Option<String>,
    pub cover_image: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn list_properties(&self, feed: Feed, page: i64) -> Result<Vec<PropertyCard>, sqlx::Error> {
        sqlx::query_as::<_, PropertyCard>(&feed.listing_sql())
            .bind(PER_PAGE)
            .bind(page_offset(page))
            .fetch_all(&self.pool)
            .await
    }
}
