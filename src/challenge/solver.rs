//! ブラウザによる検証突破
//!
//! ブラウザは検証を通してセッションを取り出すためだけに起動し、取り出したら必ず終了する。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, GetRequestPostDataParams,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::capture::{ChallengePhase, RequestCapture};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::session::{CookieEntry, Session};
use crate::traits::ChallengeSolver;

/// 捕捉後にページの読み込み完了を待つ上限（秒）
const READY_WAIT_SECS: u32 = 15;
/// 検証通過後のページタイトルに含まれる語
const PASSED_TITLE_MARKERS: &[&str] = &["公共资源", "交易"];

/// 起動済みブラウザとイベントハンドラ
struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl LaunchedBrowser {
    async fn launch(config: &HarvestConfig) -> Result<Self, HarvestError> {
        info!("Launching browser for challenge...");

        // ユニークなユーザーデータディレクトリを生成
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("trade-harvest-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(1280, 800);

        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--lang=zh-CN")
            .arg(format!("--user-agent={}", config.user_agent));

        if config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| HarvestError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| HarvestError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        Ok(Self {
            browser,
            handler,
            user_data_dir,
        })
    }

    /// ブラウザプロセスを確実に終了させる
    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!("Failed to remove {:?}: {}", self.user_data_dir, e);
        }
        info!("Browser closed");
    }
}

/// chromiumoxideで検証ページを開き、署名付きAPIリクエストを捕捉する
pub struct BrowserChallengeSolver {
    config: HarvestConfig,
}

impl BrowserChallengeSolver {
    pub fn new(config: HarvestConfig) -> Self {
        Self { config }
    }

    /// 1回分の試行。`ChallengeTimeout`は呼び出し側で再試行する
    async fn attempt(&self, browser: &Browser, attempt: u32) -> Result<Session, HarvestError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::BrowserInit(e.to_string()))?;

        let result = self.solve_on_page(&page, attempt).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }
        result
    }

    async fn solve_on_page(&self, page: &Page, attempt: u32) -> Result<Session, HarvestError> {
        let mut phase = ChallengePhase::Start;
        debug!("Challenge attempt {}: {:?}", attempt, phase);

        // ナビゲーション前にリクエストの監視を開始する
        page.execute(EnableParams::default())
            .await
            .map_err(|e| HarvestError::Navigation(format!("Network有効化失敗: {}", e)))?;
        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| HarvestError::Navigation(format!("リクエスト監視失敗: {}", e)))?;

        let mut capture = RequestCapture::new(&self.config.api_url);
        phase = ChallengePhase::AwaitChallenge;
        debug!("Challenge attempt {}: {:?}", attempt, phase);

        let page_url = self.config.page_url.clone();
        let waited = timeout(self.config.challenge_timeout, async {
            // 検証ページはJSで再読み込みするため、goto自体の失敗では諦めない
            if let Err(e) = page.goto(page_url.as_str()).await {
                warn!("Navigation to {} reported: {}", page_url, e);
            }

            while let Some(event) = requests.next().await {
                let request = &event.request;
                // イベントには本文が載らないので別途取得する
                let post_data = if request.has_post_data == Some(true) {
                    page.execute(GetRequestPostDataParams::new(event.request_id.clone()))
                        .await
                        .ok()
                        .map(|r| r.result.post_data.clone())
                } else {
                    None
                };

                if capture.offer(
                    &request.url,
                    &request.method,
                    request.headers.inner(),
                    post_data.as_deref(),
                ) {
                    return;
                }
            }
        })
        .await;

        if waited.is_err() || !capture.is_captured() {
            phase = ChallengePhase::Timeout;
            warn!(
                "Challenge attempt {}: {:?} after {:?}",
                attempt, phase, self.config.challenge_timeout
            );
            self.debug_screenshot(page).await;
            return Err(HarvestError::ChallengeTimeout { attempts: attempt });
        }

        phase = ChallengePhase::Captured;
        info!("Challenge attempt {}: {:?} signed API request", attempt, phase);

        self.wait_ready(page).await;

        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| HarvestError::JavaScript(format!("クッキー取得失敗: {}", e)))?
            .into_iter()
            .map(|c| CookieEntry {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect::<Vec<_>>();

        let Some(captured) = capture.into_captured() else {
            return Err(HarvestError::ChallengeTimeout { attempts: attempt });
        };
        info!(
            "Captured {} cookies and {} headers from {}",
            cookies.len(),
            captured.headers.len(),
            captured.url
        );

        Ok(Session::new(
            cookies,
            captured.headers,
            captured.body,
            self.config.user_agent.clone(),
        ))
    }

    /// 補助確認: ページの読み込み完了とタイトル
    async fn wait_ready(&self, page: &Page) {
        for i in 0..READY_WAIT_SECS {
            let state = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|v| v.into_value::<String>().ok())
                .unwrap_or_default();

            if state == "interactive" || state == "complete" {
                debug!("Page {} after {}s", state, i);
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }

        let title = page
            .evaluate("document.title")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default();

        if PASSED_TITLE_MARKERS.iter().any(|m| title.contains(m)) {
            info!("Challenge passed, page title: {}", title);
        } else {
            warn!("Unexpected page title after challenge: {:?}", title);
        }
    }

    async fn debug_screenshot(&self, page: &Page) {
        if !self.config.debug {
            return;
        }
        if let Ok(screenshot) = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&screenshot);
            debug!("Challenge screenshot: data:image/png;base64,{}", encoded);
        }
    }
}

#[async_trait]
impl ChallengeSolver for BrowserChallengeSolver {
    async fn acquire_session(&self) -> Result<Session, HarvestError> {
        let attempts = self.config.challenge_attempts.max(1);
        let launched = LaunchedBrowser::launch(&self.config).await?;

        let mut result = Err(HarvestError::ChallengeTimeout { attempts });
        for attempt in 1..=attempts {
            match self.attempt(&launched.browser, attempt).await {
                Ok(session) => {
                    result = Ok(session);
                    break;
                }
                Err(HarvestError::ChallengeTimeout { .. }) | Err(HarvestError::Navigation(_))
                    if attempt < attempts =>
                {
                    warn!("Challenge attempt {}/{} failed, retrying", attempt, attempts);
                }
                Err(HarvestError::ChallengeTimeout { .. }) => {
                    result = Err(HarvestError::ChallengeTimeout { attempts });
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        launched.shutdown().await;
        debug!("Challenge: {:?}", ChallengePhase::Done);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 実環境テスト用: cargo test challenge -- --ignored --nocapture
    async fn test_browser_challenge() {
        tracing_subscriber::fmt()
            .with_env_filter("info,trade_result_scraper=debug")
            .init();

        let config = HarvestConfig::from_env().with_debug(true);
        let solver = BrowserChallengeSolver::new(config);

        match solver.acquire_session().await {
            Ok(session) => {
                println!("Cookies: {}", session.cookies.len());
                println!("Headers: {:?}", session.headers.keys().collect::<Vec<_>>());
                println!("Template: {}", session.search_template);
            }
            Err(e) => panic!("Challenge failed: {:?}", e),
        }
    }
}
