//! Monthly inbound-lead counts: portal sources, wishlist sign-ups, referrals

use std::collections::{BTreeMap, BTreeSet};

use super::months::MonthWindow;
use crate::crm::{fields, read_chunked, CrmApi, CrmResult, Domain, Operator, PagedScan, RecordId};

pub const MESSAGE_MODEL: &str = "mail.message";
pub const PARTNER_MODEL: &str = "res.partner";

/// Referral label for contacts without a referral source
pub const NO_REFERRAL: &str = "(None)";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthLeads {
    /// Distinct contacts reached through any known source
    pub autoimport_total: usize,
    /// Contacts with a wishlist that no source accounts for
    pub wishlist_total: usize,
    pub sources: BTreeMap<String, u64>,
    pub referrals: BTreeMap<String, u64>,
}

/// Count one month's leads
///
/// A message on a contact whose body contains a source label counts towards
/// that source. Wishlist contacts created in the month and not reached
/// through a source are broken down by referral source.
pub async fn month_leads<C: CrmApi + ?Sized>(
    crm: &C,
    window: &MonthWindow,
    sources: &[String],
    page_size: usize,
) -> CrmResult<MonthLeads> {
    let start = window.start_str();
    let end = window.end_str();

    let mut leads = MonthLeads::default();
    let mut matched_partners: BTreeSet<RecordId> = BTreeSet::new();

    for source in sources {
        let domain = Domain::new()
            .filter("body", Operator::ILike, source.as_str())
            .filter("date", Operator::Gte, start.as_str())
            .filter("date", Operator::Lt, end.as_str())
            .filter("model", Operator::Eq, PARTNER_MODEL);
        let mut scan = PagedScan::new(MESSAGE_MODEL, domain, "id asc", page_size);

        while let Some(messages) = scan.next_records(crm, &["res_id"]).await? {
            for message in &messages {
                *leads.sources.entry(source.clone()).or_insert(0) += 1;
                if let Some(partner) = fields::many2one_id(message, "res_id") {
                    matched_partners.insert(partner);
                }
            }
        }
    }

    let wishlist_domain = Domain::new()
        .filter("property_type_ids", Operator::NotEq, false)
        .filter("create_date", Operator::Gte, start.as_str())
        .filter("create_date", Operator::Lt, end.as_str());
    let wishlist: BTreeSet<RecordId> = PagedScan::new(PARTNER_MODEL, wishlist_domain, "id asc", page_size)
        .collect_ids(crm)
        .await?
        .into_iter()
        .collect();

    let wishlist_only: Vec<RecordId> = wishlist.difference(&matched_partners).copied().collect();

    let contacts = read_chunked(crm, PARTNER_MODEL, &wishlist_only, &["referral_source_id"], page_size).await?;
    for contact in &contacts {
        let label = fields::many2one_name(contact, "referral_source_id")
            .unwrap_or_else(|| NO_REFERRAL.to_string());
        *leads.referrals.entry(label).or_insert(0) += 1;
    }

    leads.autoimport_total = matched_partners.len();
    leads.wishlist_total = wishlist_only.len();
    Ok(leads)
}
