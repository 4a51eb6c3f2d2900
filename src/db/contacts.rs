//! Loading a contact export into the agency's contact tables

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use sqlx::{Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use super::Database;

/// One contact as written by `export-contacts`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub log_notes: Vec<NoteRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactRow {
    pub name: Option<String>,
    pub email: String,
    /// `None` when empty or already taken by an earlier contact
    pub phone: Option<String>,
    pub role: String,
    pub notes: Vec<NoteRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteRow {
    pub content: String,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub contacts: usize,
    pub notes: usize,
    pub phones_nulled: usize,
    pub unmapped_authors: usize,
}

/// Maps note author names onto back-office user ids, ignoring case
pub struct AuthorMap(HashMap<String, i64>);

impl AuthorMap {
    pub fn new(authors: &HashMap<String, i64>) -> Self {
        Self(
            authors
                .iter()
                .map(|(name, id)| (name.trim().to_lowercase(), *id))
                .collect(),
        )
    }

    pub fn user_id(&self, author: &str) -> Option<i64> {
        self.0.get(&author.trim().to_lowercase()).copied()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Turn exported contacts into rows: contacts without email are dropped and
/// a phone number only stays on the first contact that carries it
pub fn plan_import(records: &[ContactRecord], authors: &AuthorMap) -> (Vec<ContactRow>, ImportSummary) {
    let mut summary = ImportSummary::default();
    let mut seen_phones = HashSet::new();
    let mut rows = Vec::new();

    for record in records {
        let Some(email) = non_blank(record.email.as_deref()) else {
            continue;
        };

        let phone = match non_blank(record.phone.as_deref()) {
            Some(phone) if !seen_phones.insert(phone.clone()) => {
                summary.phones_nulled += 1;
                None
            }
            other => other,
        };

        let notes: Vec<NoteRow> = record
            .log_notes
            .iter()
            .map(|note| {
                let author_name = non_blank(note.author.as_deref());
                let author_id = author_name.as_deref().and_then(|name| authors.user_id(name));
                if let (Some(name), None) = (&author_name, author_id) {
                    warn!(author = %name, "Unmapped note author");
                    summary.unmapped_authors += 1;
                }
                NoteRow {
                    content: note.body.clone().unwrap_or_default(),
                    author_id,
                    author_name,
                    created_at: note
                        .date
                        .as_deref()
                        .and_then(|d| NaiveDateTime::parse_from_str(d.trim(), "%Y-%m-%d %H:%M:%S").ok()),
                }
            })
            .collect();

        summary.contacts += 1;
        summary.notes += notes.len();
        rows.push(ContactRow {
            name: non_blank(record.name.as_deref()),
            email,
            phone,
            role: record.kind.as_deref().unwrap_or_default().trim().to_lowercase(),
            notes,
        });
    }

    (rows, summary)
}

pub async fn read_export(path: &Path) -> Result<Vec<ContactRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a contact export", path.display()))
}

async fn wipe_client(tx: &mut Transaction<'_, Postgres>, client_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM contact_internal_notes WHERE contact_id IN (SELECT id FROM contacts WHERE client_id = $1)",
    )
    .bind(client_id)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM imported_leads WHERE contact_id IN (SELECT id FROM contacts WHERE client_id = $1)")
        .bind(client_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM contacts WHERE client_id = $1")
        .bind(client_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_rows(
    tx: &mut Transaction<'_, Postgres>,
    client_id: i64,
    rows: &[ContactRow],
) -> Result<(), sqlx::Error> {
    for row in rows {
        let contact_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO contacts (name, email, phone, role, client_id, subscribed, created_at)
            VALUES ($1, $2, $3, $4, $5, true, NOW())
            RETURNING id::int8
            "#,
        )
        .bind(&row.name)
        .bind(&row.email)
        .bind(&row.phone)
        .bind(&row.role)
        .bind(client_id)
        .fetch_one(&mut **tx)
        .await?;

        for note in &row.notes {
            sqlx::query(
                r#"
                INSERT INTO contact_internal_notes
                    (contact_id, title, content, category, priority, author_id, author_name,
                     tags, created_at, updated_at, author_avatar)
                VALUES ($1, '', $2, 'general', 'medium', $3, $4, NULL,
                        COALESCE($5, LOCALTIMESTAMP), COALESCE($5, LOCALTIMESTAMP), NULL)
                "#,
            )
            .bind(contact_id)
            .bind(&note.content)
            .bind(note.author_id)
            .bind(&note.author_name)
            .bind(note.created_at)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

impl Database {
    /// Replace every contact of `client_id` with `rows` in one transaction
    pub async fn replace_client_contacts(&self, client_id: i64, rows: &[ContactRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let written = match wipe_client(&mut tx, client_id).await {
            Ok(()) => insert_rows(&mut tx, client_id, rows).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(anyhow::Error::new(e).context("Contact import failed, rolled back"))
            }
        }
    }
}

/// Load an export file and replace the client's contacts with it
pub async fn import_contacts(
    db: &Database,
    path: &Path,
    client_id: i64,
    authors: &HashMap<String, i64>,
) -> Result<ImportSummary> {
    let records = read_export(path).await?;
    let (rows, summary) = plan_import(&records, &AuthorMap::new(authors));

    db.replace_client_contacts(client_id, &rows).await?;
    info!(
        client_id,
        contacts = summary.contacts,
        notes = summary.notes,
        phones_nulled = summary.phones_nulled,
        unmapped_authors = summary.unmapped_authors,
        "Contact import completed"
    );
    Ok(summary)
}
