//! Paged collection scans
//!
//! The remote transport truncates large responses, so ids are fetched one
//! page at a time and records are read in chunks of the same size.

use tracing::debug;

use super::{CrmApi, CrmResult, Domain, Record, RecordId, SearchOptions};

/// Sequence of id pages over one model, ending at the first empty page
pub struct PagedScan {
    model: String,
    domain: Domain,
    order: String,
    page_size: usize,
    offset: usize,
    exhausted: bool,
}

impl PagedScan {
    pub fn new(model: &str, domain: Domain, order: &str, page_size: usize) -> Self {
        Self {
            model: model.to_string(),
            domain,
            order: order.to_string(),
            page_size: page_size.max(1),
            offset: 0,
            exhausted: false,
        }
    }

    /// Next page of ids, or `None` once the remote returns an empty page
    pub async fn next_page<C: CrmApi + ?Sized>(
        &mut self,
        crm: &C,
    ) -> CrmResult<Option<Vec<RecordId>>> {
        if self.exhausted {
            return Ok(None);
        }

        let options = SearchOptions {
            order: Some(self.order.clone()),
            limit: Some(self.page_size),
            offset: self.offset,
        };
        let ids = crm.search(&self.model, &self.domain, &options).await?;
        debug!(model = %self.model, offset = self.offset, count = ids.len(), "Scanned page");

        if ids.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.offset += ids.len();
        Ok(Some(ids))
    }

    /// Next page read with the given fields
    pub async fn next_records<C: CrmApi + ?Sized>(
        &mut self,
        crm: &C,
        fields: &[&str],
    ) -> CrmResult<Option<Vec<Record>>> {
        match self.next_page(crm).await? {
            Some(ids) => Ok(Some(crm.read(&self.model, &ids, fields).await?)),
            None => Ok(None),
        }
    }

    /// Drain the scan into a single id list
    pub async fn collect_ids<C: CrmApi + ?Sized>(mut self, crm: &C) -> CrmResult<Vec<RecordId>> {
        let mut all = Vec::new();
        while let Some(ids) = self.next_page(crm).await? {
            all.extend(ids);
        }
        Ok(all)
    }
}

/// Read records for an arbitrary id list without exceeding `chunk_size` ids per call
pub async fn read_chunked<C: CrmApi + ?Sized>(
    crm: &C,
    model: &str,
    ids: &[RecordId],
    fields: &[&str],
    chunk_size: usize,
) -> CrmResult<Vec<Record>> {
    let mut records = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(chunk_size.max(1)) {
        records.extend(crm.read(model, chunk, fields).await?);
    }
    Ok(records)
}
