//! Top-N rankings: most viewed properties, locations and visitor countries

use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

use super::views::{fetch_properties, PropertyInfo, ViewScan, LOCATION_MODEL};
use crate::crm::{fields, read_chunked, CrmApi, CrmResult, RecordId};
use crate::geoip::CountryResolver;

/// Label for a country or location that cannot be resolved
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopLink {
    #[serde(rename = "ref")]
    pub reference: String,
    pub link: String,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopLocation {
    pub location_id: RecordId,
    pub name: String,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryViews {
    pub country: String,
    pub views: u64,
}

/// Highest count first, ties broken by ascending key
pub fn rank<K: Ord + Hash>(counts: HashMap<K, u64>) -> Vec<(K, u64)> {
    let mut ranked: Vec<(K, u64)> = counts.into_iter().collect();
    ranked.sort_by(|(ka, a), (kb, b)| b.cmp(a).then_with(|| ka.cmp(kb)));
    ranked
}

pub fn property_link(template: &str, reference: &str) -> String {
    template.replace("{ref}", reference)
}

/// Walk the candidate buffer in rank order, keeping existing, active,
/// referenced properties until `top_n` links are collected
pub fn select_top_links(
    candidates: &[(RecordId, u64)],
    properties: &HashMap<RecordId, PropertyInfo>,
    top_n: usize,
    template: &str,
) -> Vec<TopLink> {
    candidates
        .iter()
        .filter_map(|(id, views)| {
            let property = properties.get(id)?;
            if property.active == Some(false) {
                return None;
            }
            let reference = property.reference.as_deref()?;
            Some(TopLink {
                reference: reference.to_string(),
                link: property_link(template, reference),
                views: *views,
            })
        })
        .take(top_n)
        .collect()
}

/// Most viewed properties of all time
///
/// Twice `top_n` candidates are resolved so that deleted or inactive
/// properties can be skipped; no second query is made if that runs short.
pub async fn top_viewed_links<C: CrmApi + ?Sized>(
    crm: &C,
    scan: &ViewScan,
    top_n: usize,
    template: &str,
) -> CrmResult<Vec<TopLink>> {
    let counts = scan.count_by_property(crm).await?;
    let mut candidates = rank(counts);
    candidates.truncate(top_n.saturating_mul(2));

    let ids: Vec<RecordId> = candidates.iter().map(|(id, _)| *id).collect();
    let properties = fetch_properties(crm, &ids, &["reference", "active"], scan.page_size).await?;

    Ok(select_top_links(&candidates, &properties, top_n, template))
}

/// Views grouped by the location of the viewed property
pub async fn top_viewed_locations<C: CrmApi + ?Sized>(
    crm: &C,
    scan: &ViewScan,
    top_n: usize,
) -> CrmResult<Vec<TopLocation>> {
    let by_property = scan.count_by_property(crm).await?;
    let ids: Vec<RecordId> = by_property.keys().copied().collect();
    let properties = fetch_properties(crm, &ids, &["location_id"], scan.page_size).await?;

    let mut by_location: HashMap<RecordId, u64> = HashMap::new();
    for (property_id, views) in &by_property {
        if let Some(location) = properties.get(property_id).and_then(|p| p.location_id) {
            *by_location.entry(location).or_insert(0) += views;
        }
    }

    let mut ranked = rank(by_location);
    ranked.truncate(top_n);

    let location_ids: Vec<RecordId> = ranked.iter().map(|(id, _)| *id).collect();
    let names: HashMap<RecordId, String> =
        read_chunked(crm, LOCATION_MODEL, &location_ids, &["name"], scan.page_size)
            .await?
            .iter()
            .filter_map(|r| Some((fields::id(r)?, fields::text(r, "name")?)))
            .collect();

    Ok(ranked
        .into_iter()
        .map(|(location_id, views)| TopLocation {
            location_id,
            name: names
                .get(&location_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            views,
        })
        .collect())
}

/// Views grouped by the visitor's country
pub async fn top_countries<C: CrmApi + ?Sized>(
    crm: &C,
    scan: &ViewScan,
    resolver: &mut CountryResolver<'_>,
    top_n: usize,
) -> CrmResult<Vec<CountryViews>> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    scan.for_each(crm, |view| {
        let country = view
            .ip
            .as_deref()
            .and_then(|ip| resolver.resolve(ip))
            .unwrap_or_else(|| UNKNOWN.to_string());
        *counts.entry(country).or_insert(0) += 1;
    })
    .await?;

    let mut ranked = rank(counts);
    ranked.truncate(top_n);
    Ok(ranked
        .into_iter()
        .map(|(country, views)| CountryViews { country, views })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::testing::FakeCrm;
    use crate::geoip::tests::StaticLookup;
    use crate::stats::views::tests::{scan, view};
    use crate::stats::views::{PROPERTY_MODEL, VIEW_MODEL};
    use serde_json::json;

    const TEMPLATE: &str = "https://example.com/property/?ref_no={ref}";

    fn info(reference: &str, active: bool) -> PropertyInfo {
        PropertyInfo {
            reference: Some(reference.to_string()),
            active: Some(active),
            ..Default::default()
        }
    }

    #[test]
    fn ranking_is_deterministic() {
        let counts = HashMap::from([(3, 5), (1, 5), (2, 9)]);
        assert_eq!(rank(counts), vec![(2, 9), (1, 5), (3, 5)]);
    }

    #[test]
    fn buffer_refills_skipped_properties() {
        // top_n = 3, buffer of 6 with one missing and one inactive among the top 3
        let candidates = vec![(1, 60), (2, 50), (3, 40), (4, 30), (5, 20), (6, 10)];
        let properties = HashMap::from([
            (1, info("A1", true)),
            (3, info("A3", false)),
            (4, info("A4", true)),
            (5, info("A5", true)),
            (6, info("A6", true)),
        ]);

        let links = select_top_links(&candidates, &properties, 3, TEMPLATE);
        let refs: Vec<&str> = links.iter().map(|l| l.reference.as_str()).collect();
        assert_eq!(refs, vec!["A1", "A4", "A5"]);
        assert_eq!(links[1].link, "https://example.com/property/?ref_no=A4");
        assert_eq!(links[1].views, 30);
    }

    #[test]
    fn short_buffer_returns_fewer_links() {
        let candidates = vec![(1, 3), (2, 2), (3, 1), (4, 1)];
        let properties = HashMap::from([(1, info("A1", true)), (2, info("A2", false)), (4, info("A4", true))]);

        // buffer of 4, K = 2 unusable → min(2, 4 - 2) = 2
        let links = select_top_links(&candidates, &properties, 2, TEMPLATE);
        assert_eq!(links.len(), 2);

        let links = select_top_links(&candidates, &properties, 4, TEMPLATE);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn properties_without_reference_are_skipped() {
        let candidates = vec![(1, 3)];
        let properties = HashMap::from([(1, PropertyInfo::default())]);
        assert!(select_top_links(&candidates, &properties, 5, TEMPLATE).is_empty());
    }

    #[tokio::test]
    async fn top_links_resolve_against_properties() {
        let crm = FakeCrm::new()
            .with_records(
                VIEW_MODEL,
                vec![
                    view(1, Some(10), "2025-01-01 10:00:00", "", ""),
                    view(2, Some(10), "2025-01-02 10:00:00", "", ""),
                    view(3, Some(11), "2025-01-03 10:00:00", "", ""),
                    view(4, Some(12), "2025-01-04 10:00:00", "", "GPTBot"),
                    view(5, Some(12), "2025-01-05 10:00:00", "", "GPTBot"),
                    view(6, Some(12), "2025-01-06 10:00:00", "", "GPTBot"),
                ],
            )
            .with_records(
                PROPERTY_MODEL,
                vec![
                    json!({ "id": 10, "reference": "R10", "active": true }),
                    json!({ "id": 11, "reference": "R11", "active": true }),
                    json!({ "id": 12, "reference": "R12", "active": true }),
                ],
            );

        let links = top_viewed_links(&crm, &scan(), 5, TEMPLATE).await.unwrap();
        assert_eq!(
            links,
            vec![
                TopLink { reference: "R10".into(), link: property_link(TEMPLATE, "R10"), views: 2 },
                TopLink { reference: "R11".into(), link: property_link(TEMPLATE, "R11"), views: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn locations_group_views_and_resolve_names() {
        let crm = FakeCrm::new()
            .with_records(
                VIEW_MODEL,
                vec![
                    view(1, Some(10), "2025-01-01 10:00:00", "", ""),
                    view(2, Some(11), "2025-01-02 10:00:00", "", ""),
                    view(3, Some(12), "2025-01-03 10:00:00", "", ""),
                    view(4, Some(99), "2025-01-04 10:00:00", "", ""),
                    view(5, Some(12), "2025-01-05 10:00:00", "", "GPTBot/1.2"),
                    view(6, Some(12), "2025-01-06 10:00:00", "", "GPTBot/1.2"),
                ],
            )
            .with_records(
                PROPERTY_MODEL,
                vec![
                    json!({ "id": 10, "location_id": [1, "Nerja"] }),
                    json!({ "id": 11, "location_id": [1, "Nerja"] }),
                    json!({ "id": 12, "location_id": [2, "Frigiliana"] }),
                ],
            )
            .with_records(LOCATION_MODEL, vec![json!({ "id": 1, "name": "Nerja" })]);

        let locations = top_viewed_locations(&crm, &scan(), 25).await.unwrap();
        assert_eq!(
            locations,
            vec![
                TopLocation { location_id: 1, name: "Nerja".into(), views: 2 },
                TopLocation { location_id: 2, name: "Unknown".into(), views: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn countries_fall_back_to_unknown() {
        let crm = FakeCrm::new().with_records(
            VIEW_MODEL,
            vec![
                view(1, Some(10), "2025-01-01 10:00:00", "81.2.69.142", ""),
                view(2, Some(10), "2025-01-02 10:00:00", "81.2.69.142", ""),
                view(3, Some(10), "2025-01-03 10:00:00", "2.2.2.2", ""),
                view(4, Some(10), "2025-01-04 10:00:00", "", ""),
                view(5, Some(10), "2025-01-05 10:00:00", "5.5.5.5", "claudebot"),
            ],
        );
        let lookup = StaticLookup::default()
            .with("81.2.69.142", "United Kingdom")
            .with("5.5.5.5", "Spain");
        let mut resolver = CountryResolver::new(&lookup, 16);

        let countries = top_countries(&crm, &scan(), &mut resolver, 10).await.unwrap();
        assert_eq!(
            countries,
            vec![
                CountryViews { country: "United Kingdom".into(), views: 2 },
                CountryViews { country: "Unknown".into(), views: 2 },
            ]
        );
    }
}
