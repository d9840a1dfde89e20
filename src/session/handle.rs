//! 共有セッションセル
//!
//! 読み手は常に一貫したセッション全体を見る。差し替えは書き込みロック下で
//! バージョンを進めて丸ごと行い、その間は新規の取得開始が止まる。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::store::SessionStore;
use super::types::Session;
use crate::error::HarvestError;
use crate::traits::ChallengeSolver;

/// ある時点のセッションとそのバージョン
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub version: u64,
    pub session: Arc<Session>,
}

pub struct SessionHandle {
    current: RwLock<SessionSnapshot>,
    solver: Arc<dyn ChallengeSolver>,
    store: SessionStore,
    acquisitions: AtomicUsize,
}

impl SessionHandle {
    /// 既知のセッションから開始
    pub fn new(session: Session, solver: Arc<dyn ChallengeSolver>, store: SessionStore) -> Self {
        Self {
            current: RwLock::new(SessionSnapshot {
                version: 0,
                session: Arc::new(session),
            }),
            solver,
            store,
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// 保存済みセッションがあればそれを使い、なければ検証を突破して取得する
    pub async fn open(
        solver: Arc<dyn ChallengeSolver>,
        store: SessionStore,
    ) -> Result<Self, HarvestError> {
        if let Some(session) = store.load() {
            return Ok(Self::new(session, solver, store));
        }

        info!("No cached session, solving challenge...");
        let session = solver.acquire_session().await?;
        store.save(&session)?;

        let handle = Self::new(session, solver, store);
        handle.acquisitions.store(1, Ordering::SeqCst);
        Ok(handle)
    }

    pub async fn current(&self) -> SessionSnapshot {
        self.current.read().await.clone()
    }

    /// `stale_version`のセッションが拒否されたときに呼ぶ
    ///
    /// 既に別の呼び出しで差し替え済みなら検証はやり直さず最新を返す。
    /// 検証中は書き込みロックを保持するため、同時に走る検証は高々1つ。
    pub async fn refresh(&self, stale_version: u64) -> Result<SessionSnapshot, HarvestError> {
        let mut guard = self.current.write().await;
        if guard.version != stale_version {
            debug!(
                "Session v{} already replaced by v{}, skipping re-verification",
                stale_version, guard.version
            );
            return Ok(guard.clone());
        }

        info!("Session v{} expired, re-running challenge...", stale_version);
        let session = self.solver.acquire_session().await?;
        self.store.save(&session)?;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        *guard = SessionSnapshot {
            version: stale_version + 1,
            session: Arc::new(session),
        };
        info!("Session v{} installed", guard.version);
        Ok(guard.clone())
    }

    /// このハンドルで検証を実行した回数
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}
