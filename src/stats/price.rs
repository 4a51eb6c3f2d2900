//! Views by asking-price range, overall and per visitor country

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

use super::views::{fetch_properties, PropertyInfo, ViewScan};
use crate::crm::{CrmApi, CrmResult, RecordId};
use crate::geoip::CountryResolver;

/// Half-open price interval; the overflow bucket has no upper bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceBucket {
    pub lower: u64,
    pub upper: Option<u64>,
}

impl PriceBucket {
    pub fn label(&self) -> String {
        match self.upper {
            Some(upper) => format!("{}-{}", self.lower, upper),
            None => format!("{}+", self.lower),
        }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.lower as f64 && self.upper.map_or(true, |upper| price < upper as f64)
    }
}

/// Contiguous fixed-width bins from zero up to a ceiling, plus one overflow bin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBuckets {
    width: u64,
    ceiling: u64,
}

impl PriceBuckets {
    pub fn new(width: u64, ceiling: u64) -> Self {
        let width = width.max(1);
        Self {
            width,
            ceiling: ceiling.max(width),
        }
    }

    /// All bins in ascending order
    #[cfg(test)]
    pub fn bins(&self) -> Vec<PriceBucket> {
        let mut bins: Vec<PriceBucket> = (0..self.ceiling)
            .step_by(self.width as usize)
            .map(|lower| PriceBucket {
                lower,
                upper: Some((lower + self.width).min(self.ceiling)),
            })
            .collect();
        bins.push(PriceBucket {
            lower: self.ceiling,
            upper: None,
        });
        bins
    }

    /// Bin holding `price`; unpriced (non-positive or non-finite) listings have none
    pub fn bucket_for(&self, price: f64) -> Option<PriceBucket> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        if price >= self.ceiling as f64 {
            return Some(PriceBucket {
                lower: self.ceiling,
                upper: None,
            });
        }

        let lower = (price as u64 / self.width) * self.width;
        let bucket = PriceBucket {
            lower,
            upper: Some((lower + self.width).min(self.ceiling)),
        };
        debug_assert!(bucket.contains(price));
        Some(bucket)
    }

    fn bucket_of(&self, property: Option<&PropertyInfo>) -> Option<PriceBucket> {
        self.bucket_for(property?.price?)
    }
}

/// View counts per price bucket, serialized in ascending price order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceRangeCounts(BTreeMap<PriceBucket, u64>);

impl PriceRangeCounts {
    pub fn add(&mut self, bucket: PriceBucket, views: u64) {
        *self.0.entry(bucket).or_insert(0) += views;
    }
}

impl Serialize for PriceRangeCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (bucket, views) in &self.0 {
            map.serialize_entry(&bucket.label(), views)?;
        }
        map.end()
    }
}

/// Views per price bucket of the viewed property
pub async fn views_by_price_range<C: CrmApi + ?Sized>(
    crm: &C,
    scan: &ViewScan,
    buckets: &PriceBuckets,
) -> CrmResult<PriceRangeCounts> {
    let by_property = scan.count_by_property(crm).await?;
    let ids: Vec<RecordId> = by_property.keys().copied().collect();
    let properties = fetch_properties(crm, &ids, &["list_price"], scan.page_size).await?;

    let mut counts = PriceRangeCounts::default();
    for (property_id, views) in by_property {
        if let Some(bucket) = buckets.bucket_of(properties.get(&property_id)) {
            counts.add(bucket, views);
        }
    }
    Ok(counts)
}

/// Views per visitor country and price bucket
///
/// Views without a resolvable country or a priced property are left out.
pub async fn views_by_price_and_nationality<C: CrmApi + ?Sized>(
    crm: &C,
    scan: &ViewScan,
    buckets: &PriceBuckets,
    resolver: &mut CountryResolver<'_>,
) -> CrmResult<BTreeMap<String, PriceRangeCounts>> {
    let mut by_country_property: HashMap<(String, RecordId), u64> = HashMap::new();
    scan.for_each(crm, |view| {
        let (Some(property_id), Some(ip)) = (view.property_id, view.ip.as_deref()) else {
            return;
        };
        if let Some(country) = resolver.resolve(ip) {
            *by_country_property.entry((country, property_id)).or_insert(0) += 1;
        }
    })
    .await?;

    let mut ids: Vec<RecordId> = by_country_property.keys().map(|(_, id)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    let properties = fetch_properties(crm, &ids, &["list_price"], scan.page_size).await?;

    let mut result: BTreeMap<String, PriceRangeCounts> = BTreeMap::new();
    for ((country, property_id), views) in by_country_property {
        if let Some(bucket) = buckets.bucket_of(properties.get(&property_id)) {
            result.entry(country).or_default().add(bucket, views);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::testing::FakeCrm;
    use crate::geoip::tests::StaticLookup;
    use crate::stats::views::tests::{scan, view};
    use crate::stats::views::{PROPERTY_MODEL, VIEW_MODEL};
    use serde_json::json;

    fn buckets() -> PriceBuckets {
        PriceBuckets::new(100_000, 5_000_000)
    }

    #[test]
    fn boundary_prices_fall_into_the_higher_bucket() {
        let b = buckets();
        assert_eq!(b.bucket_for(100_000.0).unwrap().label(), "100000-200000");
        assert_eq!(b.bucket_for(99_999.99).unwrap().label(), "0-100000");
        assert_eq!(b.bucket_for(4_999_999.0).unwrap().label(), "4900000-5000000");
    }

    #[test]
    fn prices_at_or_above_the_ceiling_overflow() {
        let b = buckets();
        assert_eq!(b.bucket_for(5_000_000.0).unwrap().label(), "5000000+");
        assert_eq!(b.bucket_for(12_500_000.0).unwrap().label(), "5000000+");
    }

    #[test]
    fn unpriced_listings_have_no_bucket() {
        let b = buckets();
        assert_eq!(b.bucket_for(0.0), None);
        assert_eq!(b.bucket_for(-5.0), None);
        assert_eq!(b.bucket_for(f64::NAN), None);
    }

    #[test]
    fn bins_are_contiguous_and_match_bucket_for() {
        let b = PriceBuckets::new(100_000, 250_000);
        let bins = b.bins();
        let labels: Vec<String> = bins.iter().map(PriceBucket::label).collect();
        assert_eq!(labels, vec!["0-100000", "100000-200000", "200000-250000", "250000+"]);
        for pair in bins.windows(2) {
            assert_eq!(pair[0].upper, Some(pair[1].lower));
        }

        for price in [1.0, 99_999.0, 100_000.0, 199_999.0, 200_000.0, 249_999.0, 250_000.0, 9e9] {
            let first_match = bins.iter().find(|bin| bin.contains(price)).copied();
            assert_eq!(b.bucket_for(price), first_match, "price {}", price);
        }
    }

    #[test]
    fn counts_serialize_in_price_order() {
        let b = buckets();
        let mut counts = PriceRangeCounts::default();
        counts.add(b.bucket_for(1_200_000.0).unwrap(), 1);
        counts.add(b.bucket_for(300_000.0).unwrap(), 2);
        counts.add(b.bucket_for(300_001.0).unwrap(), 1);

        assert_eq!(
            serde_json::to_string(&counts).unwrap(),
            r#"{"300000-400000":3,"1200000-1300000":1}"#
        );
    }

    fn scenario() -> FakeCrm {
        FakeCrm::new()
            .with_records(
                VIEW_MODEL,
                vec![
                    view(1, Some(1), "2025-01-05 10:00:00", "81.2.69.142", "Mozilla/5.0"),
                    view(2, Some(1), "2025-01-12 11:00:00", "81.2.69.142", "Mozilla/5.0"),
                    view(3, Some(1), "2025-01-30 12:00:00", "81.2.69.142", "Mozilla/5.0"),
                    view(4, Some(2), "2025-02-02 13:00:00", "203.0.113.9", "Mozilla/5.0"),
                    view(5, Some(2), "2025-02-03 14:00:00", "203.0.113.9", "Mozilla/5.0"),
                    view(6, Some(2), "2025-02-04 14:00:00", "81.2.69.142", "GPTBot/1.0"),
                ],
            )
            .with_records(
                PROPERTY_MODEL,
                vec![
                    json!({ "id": 1, "list_price": 120000.0 }),
                    json!({ "id": 2, "list_price": 450000.0 }),
                ],
            )
    }

    #[tokio::test]
    async fn price_range_scenario() {
        let crm = scenario();
        let counts = views_by_price_range(&crm, &scan(), &buckets()).await.unwrap();

        assert_eq!(
            serde_json::to_value(&counts).unwrap(),
            json!({ "100000-200000": 3, "400000-500000": 2 })
        );
    }

    #[tokio::test]
    async fn price_and_nationality_scenario_drops_unresolved_visitors() {
        let crm = scenario();
        let lookup = StaticLookup::default().with("81.2.69.142", "France");
        let mut resolver = CountryResolver::new(&lookup, 16);

        let by_country = views_by_price_and_nationality(&crm, &scan(), &buckets(), &mut resolver)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&by_country).unwrap(),
            json!({ "France": { "100000-200000": 3 } })
        );
    }

    #[tokio::test]
    async fn deleted_properties_count_nowhere() {
        let crm = FakeCrm::new()
            .with_records(VIEW_MODEL, vec![view(1, Some(77), "2025-01-05 10:00:00", "", "")]);
        let counts = views_by_price_range(&crm, &scan(), &buckets()).await.unwrap();
        assert_eq!(counts, PriceRangeCounts::default());
    }
}
