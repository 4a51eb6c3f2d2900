//! GeoIP country lookup using a MaxMind GeoLite2 database

use cached::{Cached, SizedCache};
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Maps an IP address to a country display name
pub trait CountryLookup: Send + Sync {
    fn country_name(&self, ip: &str) -> Option<String>;
}

/// GeoIP reader wrapper
pub struct GeoIp {
    reader: Option<Reader<Vec<u8>>>,
}

impl GeoIp {
    /// Load the database if available; lookups return `None` otherwise
    pub fn new(database_path: &str) -> Self {
        let path = Path::new(database_path);

        if !path.exists() {
            warn!("GeoIP database not found at: {}", database_path);
            warn!("Download GeoLite2-Country.mmdb from MaxMind and place it at: {}", database_path);
            return Self { reader: None };
        }

        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!("GeoIP database loaded: {}", database_path);
                Self { reader: Some(reader) }
            }
            Err(e) => {
                warn!("Failed to load GeoIP database: {}", e);
                Self { reader: None }
            }
        }
    }

    /// Load the database, failing when it is missing or unreadable
    pub fn open(database_path: &str) -> Result<Self, maxminddb::MaxMindDbError> {
        let reader = Reader::open_readfile(database_path)?;
        info!("GeoIP database loaded: {}", database_path);
        Ok(Self { reader: Some(reader) })
    }

    /// Check if the GeoIP database is loaded
    pub fn is_available(&self) -> bool {
        self.reader.is_some()
    }
}

impl CountryLookup for GeoIp {
    fn country_name(&self, ip: &str) -> Option<String> {
        let reader = self.reader.as_ref()?;

        let ip_addr: IpAddr = ip.trim().parse().ok()?;

        // Skip private/local IPs
        if is_private_ip(&ip_addr) {
            return None;
        }

        let result = reader.lookup(ip_addr).ok()?;
        let country: geoip2::Country = result.decode().ok()??;

        country.country.names.english.map(String::from)
    }
}

/// Check if an IP address is private/local
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private()
                || ipv4.is_loopback()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_documentation()
                || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => ipv6.is_loopback() || ipv6.is_unspecified(),
    }
}

/// Per-run memoization of IP → country, misses included
pub struct CountryResolver<'a> {
    lookup: &'a dyn CountryLookup,
    cache: SizedCache<String, Option<String>>,
}

impl<'a> CountryResolver<'a> {
    pub fn new(lookup: &'a dyn CountryLookup, capacity: usize) -> Self {
        Self {
            lookup,
            cache: SizedCache::with_size(capacity.max(1)),
        }
    }

    pub fn resolve(&mut self, ip: &str) -> Option<String> {
        let key = ip.trim().to_string();
        if let Some(hit) = self.cache.cache_get(&key) {
            return hit.clone();
        }

        let country = self.lookup.country_name(&key);
        self.cache.cache_set(key, country.clone());
        country
    }

    pub fn log_usage(&self) {
        debug!(
            entries = self.cache.cache_size(),
            hits = self.cache.cache_hits().unwrap_or(0),
            misses = self.cache.cache_misses().unwrap_or(0),
            "GeoIP cache usage"
        );
    }
}
