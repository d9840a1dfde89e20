//! 詳細ページの並行取得
//!
//! ワーカーは取得と解析だけを行う。結果の永続化と進捗の更新は
//! 調整ループが1か所で行う。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{retry_delay, HarvestConfig};
use crate::error::HarvestError;
use crate::parser::DetailParser;
use crate::progress::ProgressTracker;
use crate::session::{SessionHandle, SessionSnapshot};
use crate::sink::ResultSink;
use crate::traits::PortalClient;
use crate::types::{DetailRecord, FailedRecord, LinkRecord};

/// 並行数と再試行の設定
#[derive(Debug, Clone)]
pub struct HarvestPolicy {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_session_refreshes: usize,
}

impl From<&HarvestConfig> for HarvestPolicy {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_fetch_attempts.max(1),
            retry_backoff: config.retry_backoff,
            max_session_refreshes: config.max_session_refreshes,
        }
    }
}

/// 1回の実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    /// 重複を除いたリンク数
    pub total: usize,
    /// 実行前から完了していた件数
    pub already_done: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedRecord>,
    pub session_refreshes: usize,
    pub cancelled: bool,
    /// 中断により未処理のまま残った件数
    pub remaining: usize,
}

impl HarvestReport {
    pub fn completed(&self) -> usize {
        self.already_done + self.succeeded
    }
}

#[derive(Debug)]
struct Job {
    seq: usize,
    link: LinkRecord,
    /// このジョブの拒否を受けて取り直したセッションのバージョン
    refreshed_for: Option<u64>,
}

enum Outcome {
    Parsed(Job, DetailRecord),
    /// 取得に使ったセッションのバージョン付き
    Expired(Job, u64),
    Failed(Job, String),
    /// 1件のスキップでは済まないエラー
    Fatal(HarvestError),
}

pub struct DetailHarvester {
    client: Arc<dyn PortalClient>,
    sessions: Arc<SessionHandle>,
    parser: Arc<DetailParser>,
    policy: HarvestPolicy,
}

impl DetailHarvester {
    pub fn new(
        client: Arc<dyn PortalClient>,
        sessions: Arc<SessionHandle>,
        policy: HarvestPolicy,
    ) -> Result<Self, HarvestError> {
        Ok(Self {
            client,
            sessions,
            parser: Arc::new(DetailParser::new()?),
            policy,
        })
    }

    /// 未完了のリンク数（重複IDは1件として数える）
    pub fn pending_count(links: &[LinkRecord], progress: &ProgressTracker) -> usize {
        pending_jobs(links, progress).len()
    }

    /// 未完了のリンクをすべて処理する
    ///
    /// エラーで終わる場合も、それまでに永続化した分は進捗に書き出す。
    pub async fn run(
        &self,
        links: &[LinkRecord],
        progress: &mut ProgressTracker,
        sink: &mut ResultSink,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport, HarvestError> {
        let result = self.drive(links, progress, sink, cancel).await;
        let saved = checkpoint(progress, sink);
        let report = result?;
        saved?;
        Ok(report)
    }

    async fn drive(
        &self,
        links: &[LinkRecord],
        progress: &mut ProgressTracker,
        sink: &mut ResultSink,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport, HarvestError> {
        let mut queue = pending_jobs(links, progress);
        let total = links
            .iter()
            .map(|l| l.record_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let mut report = HarvestReport {
            total,
            already_done: total - queue.len(),
            ..Default::default()
        };
        info!(
            "Harvesting {} details ({} already done, concurrency {})",
            queue.len(),
            report.already_done,
            self.policy.concurrency
        );

        // 最後の成功以降に行った再検証の回数
        let mut refreshes_since_success = 0;
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        loop {
            while !cancel.is_cancelled() && tasks.len() < self.policy.concurrency {
                let Some(job) = queue.pop_front() else { break };
                // 差し替え中は書き込みロックが解けるまでここで待つ
                let snapshot = self.sessions.current().await;
                tasks.spawn(fetch_one(
                    self.client.clone(),
                    self.parser.clone(),
                    snapshot,
                    job,
                    self.policy.clone(),
                ));
            }

            let Some(joined) = tasks.join_next().await else { break };
            let outcome = joined.map_err(|e| HarvestError::Task(e.to_string()))?;

            match outcome {
                Outcome::Parsed(job, record) => {
                    sink.persist(record)?;
                    progress.mark_done(&job.link.record_id);
                    report.succeeded += 1;
                    refreshes_since_success = 0;
                    debug!(
                        "[{}/{}] {}",
                        report.completed(),
                        report.total,
                        job.link.title
                    );
                    if progress.should_flush() {
                        checkpoint(progress, sink)?;
                        info!("Progress: {}/{}", report.completed(), report.total);
                    }
                }
                Outcome::Expired(mut job, version) => {
                    debug!("Session v{} rejected for {}", version, job.link.record_id);
                    if job.refreshed_for == Some(version) {
                        // 自分のために取り直したセッションでも拒否された
                        let reason = format!("再検証後のセッションv{}でも拒否されました", version);
                        skip_record(progress, &mut report, job, reason);
                        continue;
                    }
                    if cancel.is_cancelled() {
                        queue.push_front(job);
                        continue;
                    }

                    let stale = self.sessions.current().await.version == version;
                    if stale && refreshes_since_success >= self.policy.max_session_refreshes {
                        return Err(HarvestError::SessionRejected {
                            refreshes: refreshes_since_success,
                        });
                    }
                    let before = self.sessions.acquisitions();
                    let fresh = self.sessions.refresh(version).await?;
                    let minted = self.sessions.acquisitions() - before;
                    report.session_refreshes += minted;
                    refreshes_since_success += minted;
                    if minted > 0 {
                        job.refreshed_for = Some(fresh.version);
                    }
                    queue.push_front(job);
                }
                Outcome::Fatal(e) => return Err(e),
                Outcome::Failed(job, reason) => skip_record(progress, &mut report, job, reason),
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.remaining = queue.len();
        if report.cancelled {
            warn!(
                "Interrupted: {} details left for the next run",
                report.remaining
            );
        }
        Ok(report)
    }
}

fn skip_record(progress: &mut ProgressTracker, report: &mut HarvestReport, job: Job, reason: String) {
    warn!("Skipping {}: {}", job.link.detail_url, reason);
    progress.mark_failed(&job.link.record_id, reason.clone());
    report.failed.push(FailedRecord {
        record_id: job.link.record_id,
        detail_url: job.link.detail_url,
        reason,
    });
}

/// 未完了のリンクを先頭から並べる。序号はリンク順の1始まり
fn pending_jobs(links: &[LinkRecord], progress: &ProgressTracker) -> VecDeque<Job> {
    let mut seen = HashSet::new();
    links
        .iter()
        .enumerate()
        .filter(|(_, link)| seen.insert(link.record_id.as_str()))
        .filter(|(_, link)| !progress.is_done(&link.record_id))
        .map(|(i, link)| Job {
            seq: i + 1,
            link: link.clone(),
            refreshed_for: None,
        })
        .collect()
}

/// ジャーナルを同期してから進捗を保存する
fn checkpoint(progress: &mut ProgressTracker, sink: &mut ResultSink) -> Result<(), HarvestError> {
    sink.sync()?;
    progress.flush()
}

async fn fetch_one(
    client: Arc<dyn PortalClient>,
    parser: Arc<DetailParser>,
    snapshot: SessionSnapshot,
    job: Job,
    policy: HarvestPolicy,
) -> Outcome {
    if job.link.detail_url.is_empty() {
        return Outcome::Failed(job, "详情链接が空です".to_string());
    }

    let mut attempt = 1;
    loop {
        match client.fetch_detail(&snapshot.session, &job.link.detail_url).await {
            Ok(html) => {
                return match parser.parse(&html) {
                    Ok(fields) => {
                        let record = DetailRecord::merge(job.seq, &job.link, fields);
                        Outcome::Parsed(job, record)
                    }
                    Err(e) => Outcome::Failed(job, e.to_string()),
                };
            }
            Err(e) if e.is_session_expired() => return Outcome::Expired(job, snapshot.version),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let backoff = retry_delay(policy.retry_backoff, attempt);
                warn!(
                    "Fetch {} failed (attempt {}/{}): {}, retrying in {:?}",
                    job.link.detail_url, attempt, policy.max_attempts, e, backoff
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) if e.is_record_level() => return Outcome::Failed(job, e.to_string()),
            Err(e) => return Outcome::Fatal(e),
        }
    }
}
