//! Contact export: deduplicated buyers, sellers and professionals with their log notes

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::crm::{fields, CrmApi, CrmResult, Domain, Operator, PagedScan, Record, RecordId};
use crate::stats::leads::{MESSAGE_MODEL, PARTNER_MODEL};

const CONTACT_FIELDS: &[&str] = &["name", "email", "phone", "individual_type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PartnerType {
    Buyer,
    Seller,
    Professional,
}

impl PartnerType {
    pub fn from_individual_type(value: &str) -> Option<Self> {
        match value {
            "is_buyer" => Some(Self::Buyer),
            "is_seller" => Some(Self::Seller),
            "is_professional" => Some(Self::Professional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogNote {
    pub date: Option<String>,
    pub author: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedContact {
    #[serde(skip)]
    pub id: RecordId,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(rename = "type")]
    pub partner_type: PartnerType,
    pub log_notes: Vec<LogNote>,
}

impl ExportedContact {
    /// Contacts without name, email or a known type are not exported
    fn from_record(record: &Record) -> Option<Self> {
        let trimmed = |field: &str| {
            record
                .get(field)
                .and_then(serde_json::Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let name = trimmed("name");
        let email = trimmed("email");
        if name.is_empty() || email.is_empty() {
            return None;
        }
        let partner_type = record
            .get("individual_type")
            .and_then(serde_json::Value::as_str)
            .and_then(PartnerType::from_individual_type)?;

        Some(Self {
            id: fields::id(record)?,
            name,
            email,
            phone: trimmed("phone"),
            partner_type,
            log_notes: Vec::new(),
        })
    }
}

/// Keeps one contact per lower-cased email, in first-seen order
#[derive(Debug, Default)]
pub struct Deduplicator {
    contacts: Vec<ExportedContact>,
    by_email: HashMap<String, usize>,
    type_counts: BTreeMap<PartnerType, usize>,
}

impl Deduplicator {
    /// A later duplicate only wins when it has a phone and the kept one has none
    pub fn offer(&mut self, contact: ExportedContact) {
        let key = contact.email.to_lowercase();
        match self.by_email.get(&key) {
            Some(&index) => {
                let current = &mut self.contacts[index];
                if !contact.phone.is_empty() && current.phone.is_empty() {
                    *current = contact;
                }
            }
            None => {
                *self.type_counts.entry(contact.partner_type).or_insert(0) += 1;
                self.by_email.insert(key, self.contacts.len());
                self.contacts.push(contact);
            }
        }
    }

    pub fn type_counts(&self) -> &BTreeMap<PartnerType, usize> {
        &self.type_counts
    }

    pub fn into_contacts(self) -> Vec<ExportedContact> {
        self.contacts
    }
}

/// Normalise line breaks and drop control characters from a message body
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\r' | '\u{2028}' | '\u{2029}' => Some('\n'),
            '\n' | '\t' => Some(c),
            '\u{0}'..='\u{1f}' | '\u{7f}' => None,
            _ => Some(c),
        })
        .collect()
}

async fn log_notes<C: CrmApi + ?Sized>(crm: &C, partner: RecordId, page_size: usize) -> CrmResult<Vec<LogNote>> {
    let domain = Domain::new()
        .filter("model", Operator::Eq, PARTNER_MODEL)
        .filter("res_id", Operator::Eq, partner)
        .filter("message_type", Operator::Eq, "comment");
    let mut scan = PagedScan::new(MESSAGE_MODEL, domain, "id asc", page_size);

    let mut notes = Vec::new();
    while let Some(messages) = scan.next_records(crm, &["date", "body", "author_id"]).await? {
        notes.extend(messages.iter().map(|m| LogNote {
            date: fields::text(m, "date"),
            author: fields::many2one_name(m, "author_id").unwrap_or_default(),
            body: clean_text(&fields::text(m, "body").unwrap_or_default()),
        }));
    }
    Ok(notes)
}

/// Gather, deduplicate and annotate every exportable contact
pub async fn collect_contacts<C: CrmApi + ?Sized>(crm: &C, page_size: usize) -> CrmResult<Vec<ExportedContact>> {
    let domain = Domain::new()
        .filter("email", Operator::NotILike, "autofilled%")
        .filter(
            "individual_type",
            Operator::In,
            serde_json::json!(["is_buyer", "is_seller", "is_professional"]),
        );
    let mut scan = PagedScan::new(PARTNER_MODEL, domain, "id asc", page_size);

    let mut dedup = Deduplicator::default();
    let mut scanned = 0usize;
    while let Some(records) = scan.next_records(crm, CONTACT_FIELDS).await? {
        scanned += records.len();
        for contact in records.iter().filter_map(ExportedContact::from_record) {
            dedup.offer(contact);
        }
    }

    for (partner_type, count) in dedup.type_counts() {
        info!(?partner_type, count, "Deduplicated contacts");
    }

    let mut contacts = dedup.into_contacts();
    info!(scanned, exported = contacts.len(), "Fetching log notes");
    for contact in &mut contacts {
        contact.log_notes = log_notes(crm, contact.id, page_size).await?;
    }
    Ok(contacts)
}

pub fn export_file_name(now: DateTime<Local>) -> String {
    format!("contacts_export_{}.json", now.format("%Y%m%d_%H%M%S"))
}

/// Write the export and return its path
pub async fn export_contacts<C: CrmApi + ?Sized>(
    crm: &C,
    page_size: usize,
    output_dir: &Path,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let contacts = collect_contacts(crm, page_size)
        .await
        .context("Failed to collect contacts from the CRM")?;

    let path = output_dir.join(export_file_name(now));
    let json = serde_json::to_string_pretty(&contacts)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), contacts = contacts.len(), "Contact export completed");
    Ok(path)
}
