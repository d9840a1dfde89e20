use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{info, warn};

use crate::challenge::BrowserChallengeSolver;
use crate::config::HarvestConfig;
use crate::discovery::{load_links, save_links, DiscoveryCursor, LinkDiscoverer};
use crate::error::HarvestError;
use crate::harvest::{DetailHarvester, HarvestPolicy, HarvestReport};
use crate::portal::{FilterQuery, HttpPortalClient};
use crate::progress::ProgressTracker;
use crate::session::{SessionHandle, SessionStore};
use crate::sink::ResultSink;
use crate::traits::{ChallengeSolver, PortalClient};
use crate::types::{count_by_biz_type, LinkRecord};

/// リンク収集リクエスト
#[derive(Debug, Clone, Default)]
pub struct DiscoverRequest {
    pub query: FilterQuery,
}

impl DiscoverRequest {
    pub fn new(query: FilterQuery) -> Self {
        Self { query }
    }
}

/// リンク収集結果
#[derive(Debug)]
pub struct DiscoverResult {
    pub links: Vec<LinkRecord>,
    pub links_path: PathBuf,
    pub pages_fetched: usize,
    pub session_refreshes: usize,
}

/// 詳細収集リクエスト
#[derive(Debug, Clone, Default)]
pub struct HarvestRequest {
    pub cancel: CancellationToken,
}

impl HarvestRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// tower::Serviceを実装した収集サービス
///
/// 検証突破とHTTPアクセスは差し替え可能。
#[derive(Clone)]
pub struct HarvestService {
    config: Arc<HarvestConfig>,
    client: Arc<dyn PortalClient>,
    solver: Arc<dyn ChallengeSolver>,
}

impl HarvestService {
    /// 実ブラウザと実HTTPクライアントで構成する
    pub fn new(config: HarvestConfig) -> Result<Self, HarvestError> {
        let client = Arc::new(HttpPortalClient::new(&config)?);
        let solver = Arc::new(BrowserChallengeSolver::new(config.clone()));
        Ok(Self::with_parts(config, client, solver))
    }

    pub fn with_parts(
        config: HarvestConfig,
        client: Arc<dyn PortalClient>,
        solver: Arc<dyn ChallengeSolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            solver,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    fn session_store(&self) -> SessionStore {
        SessionStore::new(self.config.session_path())
    }

    /// 検索結果のリンクをすべて集めて`links.json`に保存する
    pub async fn discover(&self, query: FilterQuery) -> Result<DiscoverResult, HarvestError> {
        std::fs::create_dir_all(self.config.output_dir())?;
        info!(
            "Discovering links: keyword={:?} region={:?} biz_type={:?} info_type={:?} period={}",
            query.keyword, query.region, query.biz_type, query.info_type, query.time_period
        );

        let sessions = SessionHandle::open(self.solver.clone(), self.session_store()).await?;
        let discoverer = LinkDiscoverer::new(self.client.clone(), &self.config);
        let today = Local::now().date_naive();

        let mut cursor = DiscoveryCursor::new();
        let mut refreshes = 0;
        loop {
            let snapshot = sessions.current().await;
            match discoverer
                .resume(&snapshot.session, &query, today, &mut cursor)
                .await
            {
                Ok(()) => break,
                Err(e) if e.is_session_expired() => {
                    if refreshes >= self.config.max_session_refreshes {
                        return Err(HarvestError::SessionRejected { refreshes });
                    }
                    warn!(
                        "Session expired at page {}: {}",
                        cursor.next_page() + 1,
                        e
                    );
                    sessions.refresh(snapshot.version).await?;
                    refreshes += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let pages_fetched = cursor.pages_fetched();
        let links = cursor.into_links();
        let links_path = self.config.links_path();
        save_links(&links_path, &links)?;

        info!("Collected {} links in {} pages", links.len(), pages_fetched);
        for (biz_type, count) in count_by_biz_type(links.iter().map(|l| l.biz_type.as_str())) {
            info!("  {}: {}", biz_type, count);
        }

        Ok(DiscoverResult {
            links,
            links_path,
            pages_fetched,
            session_refreshes: refreshes,
        })
    }

    /// `links.json`の全リンクの詳細を取得し、JSONとCSVに書き出す
    pub async fn harvest(&self, cancel: CancellationToken) -> Result<HarvestReport, HarvestError> {
        let links = load_links(&self.config.links_path())?.ok_or_else(|| {
            HarvestError::Config(format!(
                "{:?} がありません。先に links を実行してください",
                self.config.links_path()
            ))
        })?;

        let mut progress =
            ProgressTracker::load(self.config.progress_path(), self.config.batch_size);
        let mut sink = ResultSink::open(self.config.journal_path())?;

        let reset = progress.retain_completed(|id| sink.contains(id));
        if reset > 0 {
            warn!("{} completed records missing from journal, fetching again", reset);
        }

        let report = if DetailHarvester::pending_count(&links, &progress) == 0 {
            info!("All {} details already harvested", links.len());
            progress.flush()?;
            let total = links
                .iter()
                .map(|l| l.record_id.as_str())
                .collect::<HashSet<_>>()
                .len();
            HarvestReport {
                total,
                already_done: total,
                ..Default::default()
            }
        } else {
            let sessions =
                Arc::new(SessionHandle::open(self.solver.clone(), self.session_store()).await?);
            let harvester = DetailHarvester::new(
                self.client.clone(),
                sessions,
                HarvestPolicy::from(self.config.as_ref()),
            )?;
            harvester
                .run(&links, &mut progress, &mut sink, &cancel)
                .await?
        };

        let exported = sink.export(
            &links,
            &self.config.details_json_path(),
            &self.config.details_csv_path(),
        )?;

        info!(
            "Harvest finished: {} succeeded, {} failed, {} exported, {} session refreshes",
            report.succeeded,
            report.failed.len(),
            exported,
            report.session_refreshes
        );
        let exported_records = sink.ordered(&links);
        for (biz_type, count) in
            count_by_biz_type(exported_records.iter().map(|r| r.biz_type.as_str()))
        {
            info!("  {}: {}", biz_type, count);
        }

        Ok(report)
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, HarvestError>> + Send>>;

impl Service<DiscoverRequest> for HarvestService {
    type Response = DiscoverResult;
    type Error = HarvestError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DiscoverRequest) -> Self::Future {
        info!("リンク収集リクエスト受信: {}", req.query.time_period);
        let service = self.clone();
        Box::pin(async move { service.discover(req.query).await })
    }
}

impl Service<HarvestRequest> for HarvestService {
    type Response = HarvestReport;
    type Error = HarvestError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HarvestRequest) -> Self::Future {
        info!("詳細収集リクエスト受信");
        let service = self.clone();
        Box::pin(async move { service.harvest(req.cancel).await })
    }
}
