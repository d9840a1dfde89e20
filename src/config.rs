use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

/// 検知を避けるための同時取得数の上限
pub const MAX_SAFE_CONCURRENCY: usize = 20;

const DEFAULT_BASE_URL: &str = "https://www.cqggzy.com";
const DEFAULT_PAGE_PATH: &str = "/jyxx/transaction_detail.html";
const DEFAULT_API_PATH: &str = "/inteligentsearch/rest/esinteligentsearch/getFullTextDataNew";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 絞り込み条件を検索APIのどのフィールドに載せるか
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetFields {
    pub region: String,
    pub biz_type: String,
    pub info_type: String,
}

impl Default for FacetFields {
    fn default() -> Self {
        Self {
            region: "infoc".to_string(),
            biz_type: "categorytype".to_string(),
            info_type: "infotype".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub base_url: String,
    pub page_url: String,
    pub api_url: String,
    pub output_dir: PathBuf,
    pub headless: bool,
    pub debug: bool,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    /// 1回の検証試行でAPIリクエストを待つ上限
    pub challenge_timeout: Duration,
    pub challenge_attempts: u32,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub page_size: usize,
    /// 進捗を書き出す間隔（完了件数）
    pub batch_size: usize,
    pub max_fetch_attempts: u32,
    pub retry_backoff: Duration,
    pub page_delay: Duration,
    pub max_session_refreshes: usize,
    pub facet_fields: FacetFields,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_url: format!("{}{}", DEFAULT_BASE_URL, DEFAULT_PAGE_PATH),
            api_url: format!("{}{}", DEFAULT_BASE_URL, DEFAULT_API_PATH),
            output_dir: PathBuf::from("./output"),
            headless: true,
            debug: false,
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            challenge_timeout: Duration::from_secs(45),
            challenge_attempts: 3,
            request_timeout: Duration::from_secs(15),
            concurrency: 10,
            page_size: 20,
            batch_size: 10,
            max_fetch_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
            page_delay: Duration::from_millis(300),
            max_session_refreshes: 3,
            facet_fields: FacetFields::default(),
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 環境変数で既定値を上書きする
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("HARVEST_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = std::env::var("HARVEST_CONCURRENCY")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            config = config.with_concurrency(n);
        }
        if let Some(headless) = env_flag("HARVEST_HEADLESS") {
            config.headless = headless;
        }
        if let Some(debug) = env_flag("HARVEST_DEBUG") {
            config.debug = debug;
        }
        config.chrome_path = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .ok()
            .map(PathBuf::from);

        config
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 0は1に、上限を超える値は[`MAX_SAFE_CONCURRENCY`]に丸める
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        if concurrency > MAX_SAFE_CONCURRENCY {
            warn!(
                "Concurrency {} exceeds safe limit, clamping to {}",
                concurrency, MAX_SAFE_CONCURRENCY
            );
        }
        self.concurrency = concurrency.clamp(1, MAX_SAFE_CONCURRENCY);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }

    pub fn links_path(&self) -> PathBuf {
        self.output_dir.join("links.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.output_dir.join("session.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.output_dir.join("progress.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.output_dir.join("details.jsonl")
    }

    pub fn details_json_path(&self) -> PathBuf {
        self.output_dir.join("details.json")
    }

    pub fn details_csv_path(&self) -> PathBuf {
        self.output_dir.join("details.csv")
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// 再試行の待ち時間の上限
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// `attempt`回目（1始まり）の失敗後に待つ時間。`base * 2^(attempt-1)`を上限で打ち切る
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_site() {
        let config = HarvestConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.challenge_attempts, 3);
        assert!(config.api_url.ends_with("getFullTextDataNew"));
        assert!(config.page_url.starts_with(&config.base_url));
    }

    #[test]
    fn test_config_builder() {
        let config = HarvestConfig::new()
            .with_output_dir("/tmp/harvest")
            .with_headless(false)
            .with_concurrency(4)
            .with_retry_backoff(Duration::from_millis(5));

        assert_eq!(config.output_dir, PathBuf::from("/tmp/harvest"));
        assert!(!config.headless);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry_backoff, Duration::from_millis(5));
        assert_eq!(config.links_path(), PathBuf::from("/tmp/harvest/links.json"));
        assert_eq!(
            config.progress_path(),
            PathBuf::from("/tmp/harvest/progress.json")
        );
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(HarvestConfig::new().with_concurrency(64).concurrency, 20);
        assert_eq!(HarvestConfig::new().with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn test_retry_delay_doubles_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(100));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(400));
        assert_eq!(retry_delay(base, 40), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(Duration::from_secs(u64::MAX), 2), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(base, 0), base);
    }
}
