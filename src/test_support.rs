//! テスト用のスタブ（ブラウザ・ネットワークなし）

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::HarvestError;
use crate::portal::SearchPage;
use crate::session::{CookieEntry, Session};
use crate::traits::{ChallengeSolver, PortalClient};
use crate::types::LinkRecord;

pub(crate) fn stub_session(token: &str) -> Session {
    Session::new(
        vec![CookieEntry {
            name: "token".to_string(),
            value: token.to_string(),
            domain: "portal.test".to_string(),
            path: "/".to_string(),
        }],
        BTreeMap::new(),
        json!({"pn": 0, "rn": 20, "condition": null, "time": null}),
        "test-agent",
    )
}

/// 呼ばれるたびに `s2`, `s3`, ... のセッションを返す
pub(crate) struct StubSolver {
    calls: AtomicUsize,
    delay: Duration,
    failing: bool,
}

impl StubSolver {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
            failing: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for StubSolver {
    async fn acquire_session(&self) -> Result<Session, HarvestError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.failing {
            return Err(HarvestError::ChallengeTimeout { attempts: 3 });
        }
        Ok(stub_session(&format!("s{}", n + 2)))
    }
}

pub(crate) fn stub_links(n: usize) -> Vec<LinkRecord> {
    (0..n)
        .map(|i| LinkRecord {
            title: format!("记录{}", i),
            publish_date: "2026-01-01".to_string(),
            biz_type: if i % 2 == 0 { "工程建设" } else { "政府采购" }.to_string(),
            region: "渝中区".to_string(),
            record_id: format!("rid-{}", i),
            detail_url: format!("https://portal.test/detail/{}.html", i),
        })
        .collect()
}

pub(crate) fn stub_detail_html(url: &str) -> String {
    format!(
        r#"<html><body>
          <h2 class="detail-title">{url}</h2>
          <table><tr><td>项目编号</td><td>NO-{url}</td></tr></table>
          <div class="detail-content">一、成交金额：100万元</div>
        </body></html>"#
    )
}

/// 詳細ページごとの振る舞い
#[derive(Debug, Clone)]
pub(crate) enum DetailBehavior {
    /// このトークンのセッションでは期限切れ
    ExpiredUnder(String),
    /// どのセッションでも期限切れ
    AlwaysExpired,
    /// 最初のn回は一時エラー
    TransientTimes(usize),
    AlwaysTransient,
    Rejected(u16),
    Malformed,
}

/// 検索APIと詳細ページのスタブ
pub(crate) struct StubPortal {
    records: Vec<LinkRecord>,
    report_total: bool,
    /// (ページ番号, トークン): このトークンではそのページが期限切れ
    expired_search: Option<(usize, String)>,
    behaviors: HashMap<String, DetailBehavior>,
    detail_delay: Duration,
    /// n回目の詳細取得の開始時にキャンセルする
    cancel_at: Option<(usize, CancellationToken)>,
    search_calls: AtomicUsize,
    detail_calls: Mutex<HashMap<String, usize>>,
    detail_total: AtomicUsize,
    in_flight: Mutex<HashSet<String>>,
    max_in_flight: AtomicUsize,
    duplicate_dispatch: AtomicBool,
}

impl StubPortal {
    pub(crate) fn new(records: Vec<LinkRecord>) -> Self {
        Self {
            records,
            report_total: true,
            expired_search: None,
            behaviors: HashMap::new(),
            detail_delay: Duration::from_millis(5),
            cancel_at: None,
            search_calls: AtomicUsize::new(0),
            detail_calls: Mutex::new(HashMap::new()),
            detail_total: AtomicUsize::new(0),
            in_flight: Mutex::new(HashSet::new()),
            max_in_flight: AtomicUsize::new(0),
            duplicate_dispatch: AtomicBool::new(false),
        }
    }

    pub(crate) fn without_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    pub(crate) fn with_expired_search(mut self, page: usize, token: &str) -> Self {
        self.expired_search = Some((page, token.to_string()));
        self
    }

    pub(crate) fn with_behavior(mut self, url: &str, behavior: DetailBehavior) -> Self {
        self.behaviors.insert(url.to_string(), behavior);
        self
    }

    pub(crate) fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    pub(crate) fn with_cancel_at(mut self, call: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((call, token));
        self
    }

    pub(crate) fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn detail_calls(&self, url: &str) -> usize {
        self.detail_calls
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn detail_total(&self) -> usize {
        self.detail_total.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn saw_duplicate_dispatch(&self) -> bool {
        self.duplicate_dispatch.load(Ordering::SeqCst)
    }
}

fn body_usize(body: &Value, key: &str) -> usize {
    body.get(key).and_then(Value::as_u64).unwrap_or(0) as usize
}

#[async_trait]
impl PortalClient for StubPortal {
    async fn search_page(&self, session: &Session, body: &Value) -> Result<SearchPage, HarvestError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let page = body_usize(body, "pn");
        let size = body_usize(body, "rn").max(1);

        if let Some((expired_page, token)) = &self.expired_search {
            if *expired_page == page && session.cookie("token") == Some(token.as_str()) {
                return Err(HarvestError::SessionExpired("HTTP 521".to_string()));
            }
        }

        let start = (page * size).min(self.records.len());
        let end = ((page + 1) * size).min(self.records.len());
        Ok(SearchPage {
            records: self.records[start..end].to_vec(),
            total: self.report_total.then_some(self.records.len()),
        })
    }

    async fn fetch_detail(&self, session: &Session, url: &str) -> Result<String, HarvestError> {
        let total = self.detail_total.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = &self.cancel_at {
            if total == *at {
                token.cancel();
            }
        }

        let call_no = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(url.to_string()) {
                self.duplicate_dispatch.store(true, Ordering::SeqCst);
            }
            self.max_in_flight
                .fetch_max(in_flight.len(), Ordering::SeqCst);

            let mut calls = self.detail_calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        tokio::time::sleep(self.detail_delay).await;
        self.in_flight.lock().unwrap().remove(url);

        match self.behaviors.get(url) {
            None => Ok(stub_detail_html(url)),
            Some(DetailBehavior::ExpiredUnder(token)) => {
                if session.cookie("token") == Some(token.as_str()) {
                    Err(HarvestError::SessionExpired("HTTP 521".to_string()))
                } else {
                    Ok(stub_detail_html(url))
                }
            }
            Some(DetailBehavior::AlwaysExpired) => {
                Err(HarvestError::SessionExpired("HTTP 521".to_string()))
            }
            Some(DetailBehavior::TransientTimes(n)) if call_no <= *n => {
                Err(HarvestError::TransientFetch("connection reset".to_string()))
            }
            Some(DetailBehavior::TransientTimes(_)) => Ok(stub_detail_html(url)),
            Some(DetailBehavior::AlwaysTransient) => {
                Err(HarvestError::TransientFetch("timed out".to_string()))
            }
            Some(DetailBehavior::Rejected(status)) => Err(HarvestError::Http {
                status: *status,
                url: url.to_string(),
            }),
            Some(DetailBehavior::Malformed) => Ok("<html><body><p>x</p></body></html>".to_string()),
        }
    }
}
