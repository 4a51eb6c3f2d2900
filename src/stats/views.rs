//! Property view stream and the monthly view count

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use super::bots::BotFilter;
use super::months::month_key;
use crate::crm::{fields, read_chunked, CrmApi, CrmResult, Domain, Operator, PagedScan, Record, RecordId};

pub const VIEW_MODEL: &str = "property.view";
pub const PROPERTY_MODEL: &str = "property.property";
pub const LOCATION_MODEL: &str = "res.location";

const VIEW_FIELDS: &[&str] = &["property_id", "date", "ip_address", "user_agent"];

/// Offset paging needs a unique key that new views only ever append to
const VIEW_ORDER: &str = "id asc";

/// One visit to a property detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewRecord {
    pub property_id: Option<RecordId>,
    pub date: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ViewRecord {
    pub fn from_record(record: &Record) -> Self {
        Self {
            property_id: fields::many2one_id(record, "property_id"),
            date: fields::text(record, "date"),
            ip: fields::text(record, "ip_address"),
            user_agent: fields::text(record, "user_agent"),
        }
    }
}

/// Shared parameters of every view scan in a run
#[derive(Debug, Clone)]
pub struct ViewScan {
    pub page_size: usize,
    /// Only views on or after this date
    pub since: Option<NaiveDate>,
    pub bots: BotFilter,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub seen: usize,
    pub bots: usize,
}

impl ViewScan {
    fn domain(&self) -> Domain {
        match self.since {
            Some(since) => Domain::new().filter(
                "date",
                Operator::Gte,
                since.format("%Y-%m-%d").to_string(),
            ),
            None => Domain::new(),
        }
    }

    /// Visit every non-bot view exactly once, page by page
    pub async fn for_each<C, F>(&self, crm: &C, mut visit: F) -> CrmResult<ScanSummary>
    where
        C: CrmApi + ?Sized,
        F: FnMut(ViewRecord),
    {
        let mut scan = PagedScan::new(VIEW_MODEL, self.domain(), VIEW_ORDER, self.page_size);
        let mut summary = ScanSummary::default();

        while let Some(records) = scan.next_records(crm, VIEW_FIELDS).await? {
            for record in &records {
                let view = ViewRecord::from_record(record);
                summary.seen += 1;
                if self.bots.is_bot(view.user_agent.as_deref()) {
                    summary.bots += 1;
                    continue;
                }
                visit(view);
            }
        }

        tracing::debug!(seen = summary.seen, bots = summary.bots, "View scan finished");
        Ok(summary)
    }

    /// Non-bot view count per property
    pub async fn count_by_property<C: CrmApi + ?Sized>(
        &self,
        crm: &C,
    ) -> CrmResult<HashMap<RecordId, u64>> {
        let mut counts = HashMap::new();
        self.for_each(crm, |view| {
            if let Some(id) = view.property_id {
                *counts.entry(id).or_insert(0) += 1;
            }
        })
        .await?;
        Ok(counts)
    }
}

/// Property attributes joined onto views
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyInfo {
    pub reference: Option<String>,
    pub active: Option<bool>,
    pub price: Option<f64>,
    pub location_id: Option<RecordId>,
}

impl PropertyInfo {
    fn from_record(record: &Record) -> Self {
        Self {
            reference: fields::text(record, "reference"),
            active: fields::flag(record, "active"),
            price: fields::float(record, "list_price"),
            location_id: fields::many2one_id(record, "location_id"),
        }
    }
}

/// Batched property read; deleted properties are simply absent from the map
pub async fn fetch_properties<C: CrmApi + ?Sized>(
    crm: &C,
    ids: &[RecordId],
    property_fields: &[&str],
    page_size: usize,
) -> CrmResult<HashMap<RecordId, PropertyInfo>> {
    let records = read_chunked(crm, PROPERTY_MODEL, ids, property_fields, page_size).await?;
    Ok(records
        .iter()
        .filter_map(|r| Some((fields::id(r)?, PropertyInfo::from_record(r))))
        .collect())
}

/// Views per "YYYY-MM"; views with malformed timestamps are skipped
pub async fn views_by_month<C: CrmApi + ?Sized>(
    crm: &C,
    scan: &ViewScan,
) -> CrmResult<BTreeMap<String, u64>> {
    let mut months = BTreeMap::new();
    scan.for_each(crm, |view| {
        if let Some(key) = view.date.as_deref().and_then(month_key) {
            *months.entry(key).or_insert(0) += 1;
        }
    })
    .await?;
    Ok(months)
}
