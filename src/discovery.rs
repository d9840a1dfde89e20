//! 検索APIのページングによるリンク収集
//!
//! カーソルは呼び出し側が保持する。セッション切れで中断しても、
//! 新しいセッションで同じページから再開できる。

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{retry_delay, FacetFields, HarvestConfig};
use crate::error::HarvestError;
use crate::portal::{FilterQuery, SearchPage};
use crate::session::Session;
use crate::storage::{read_json, write_json_atomic};
use crate::traits::PortalClient;
use crate::types::LinkRecord;

/// ページング位置と収集済みリンク
#[derive(Debug, Default)]
pub struct DiscoveryCursor {
    next_page: usize,
    total: Option<usize>,
    links: Vec<LinkRecord>,
    seen: HashSet<String>,
    pages_fetched: usize,
    finished: bool,
}

impl DiscoveryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_page(&self) -> usize {
        self.next_page
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn links(&self) -> &[LinkRecord] {
        &self.links
    }

    pub fn into_links(self) -> Vec<LinkRecord> {
        self.links
    }

    /// 未収集のリンクだけ追加し、追加件数を返す
    fn absorb(&mut self, records: Vec<LinkRecord>) -> usize {
        let before = self.links.len();
        for record in records {
            if record.record_id.is_empty() {
                debug!("Skipping record without id: {}", record.title);
                continue;
            }
            if self.seen.insert(record.record_id.clone()) {
                self.links.push(record);
            }
        }
        self.links.len() - before
    }
}

pub struct LinkDiscoverer {
    client: Arc<dyn PortalClient>,
    facet_fields: FacetFields,
    page_size: usize,
    max_attempts: u32,
    retry_backoff: Duration,
    page_delay: Duration,
}

impl LinkDiscoverer {
    pub fn new(client: Arc<dyn PortalClient>, config: &HarvestConfig) -> Self {
        Self {
            client,
            facet_fields: config.facet_fields.clone(),
            page_size: config.page_size.max(1),
            max_attempts: config.max_fetch_attempts.max(1),
            retry_backoff: config.retry_backoff,
            page_delay: config.page_delay,
        }
    }

    /// カーソルの位置から最後のページまで進める
    ///
    /// `SessionExpired`はそのまま返す。カーソルは失敗したページを指したまま。
    pub async fn resume(
        &self,
        session: &Session,
        query: &FilterQuery,
        today: NaiveDate,
        cursor: &mut DiscoveryCursor,
    ) -> Result<(), HarvestError> {
        while !cursor.finished {
            let body = query.search_body(
                &session.search_template,
                &self.facet_fields,
                cursor.next_page,
                self.page_size,
                today,
            );
            let page = self.fetch_page(session, &body, cursor.next_page).await?;

            let fetched = page.records.len();
            let added = cursor.absorb(page.records);
            if page.total.is_some() {
                cursor.total = page.total;
            }
            cursor.pages_fetched += 1;
            cursor.next_page += 1;

            info!(
                "Page {}: {} records ({} new), {} collected{}",
                cursor.next_page,
                fetched,
                added,
                cursor.links.len(),
                cursor
                    .total
                    .map(|t| format!(" of {}", t))
                    .unwrap_or_default()
            );

            let covered = cursor
                .total
                .map_or(false, |total| cursor.next_page * self.page_size >= total);
            if fetched < self.page_size || covered {
                cursor.finished = true;
            } else if added == 0 {
                warn!("Page {} contained no new records, stopping", cursor.next_page);
                cursor.finished = true;
            } else if !self.page_delay.is_zero() {
                sleep(self.page_delay).await;
            }
        }
        Ok(())
    }

    /// 一時エラーだけを指数バックオフで再試行する
    async fn fetch_page(
        &self,
        session: &Session,
        body: &Value,
        page: usize,
    ) -> Result<SearchPage, HarvestError> {
        let mut attempt = 1;
        loop {
            match self.client.search_page(session, body).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = retry_delay(self.retry_backoff, attempt);
                    warn!(
                        "Search page {} failed (attempt {}/{}): {}, retrying in {:?}",
                        page, attempt, self.max_attempts, e, backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub fn save_links(path: &Path, links: &[LinkRecord]) -> Result<(), HarvestError> {
    write_json_atomic(path, links)?;
    info!("Saved {} links to {:?}", links.len(), path);
    Ok(())
}

pub fn load_links(path: &Path) -> Result<Option<Vec<LinkRecord>>, HarvestError> {
    read_json(path)
}
