use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("検証タイムアウト: {attempts}回試行してもAPIリクエストを捕捉できませんでした")]
    ChallengeTimeout { attempts: u32 },

    #[error("セッション期限切れ: {0}")]
    SessionExpired(String),

    #[error("再検証後もセッションが拒否されました ({refreshes}回再取得)")]
    SessionRejected { refreshes: usize },

    #[error("一時的な取得エラー: {0}")]
    TransientFetch(String),

    /// URLの不備や本文の復号失敗など、再試行しても変わらないもの
    #[error("リクエストエラー: {0}")]
    Request(String),

    #[error("HTTPエラー: status={status} url={url}")]
    Http { status: u16, url: String },

    #[error("検索APIエラー: {0}")]
    Api(String),

    #[error("詳細ページ解析エラー: {0}")]
    RecordParse(String),

    #[error("永続化エラー: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("シリアライズエラー: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV出力エラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ワーカータスク異常終了: {0}")]
    Task(String),
}

impl HarvestError {
    /// セッション再取得で回復できるエラーか
    pub fn is_session_expired(&self) -> bool {
        matches!(self, HarvestError::SessionExpired(_))
    }

    /// バックオフ付きで再試行してよいエラーか
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvestError::TransientFetch(_) | HarvestError::Api(_))
    }

    /// 1件だけスキップして処理を続行できるエラーか
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            HarvestError::TransientFetch(_)
                | HarvestError::Request(_)
                | HarvestError::Http { .. }
                | HarvestError::RecordParse(_)
        )
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return HarvestError::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if e.is_timeout() || e.is_connect() || e.is_request() {
            HarvestError::TransientFetch(e.to_string())
        } else {
            HarvestError::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(HarvestError::SessionExpired("521".into()).is_session_expired());
        assert!(!HarvestError::SessionExpired("521".into()).is_retryable());

        assert!(HarvestError::TransientFetch("timeout".into()).is_retryable());
        assert!(HarvestError::TransientFetch("timeout".into()).is_record_level());

        let http = HarvestError::Http {
            status: 404,
            url: "https://example.com/a".into(),
        };
        assert!(!http.is_retryable());
        assert!(http.is_record_level());

        let io = HarvestError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(!io.is_record_level());
        assert!(!io.is_retryable());
    }

    #[test]
    fn test_invalid_url_is_not_retried() {
        let e = reqwest::Client::new().get("not a url").build().unwrap_err();
        let err = HarvestError::from(e);
        assert!(matches!(err, HarvestError::Request(_)));
        assert!(!err.is_retryable());
        assert!(err.is_record_level());
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        // 一度確保してから閉じたポートには誰も待ち受けていない
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let e = reqwest::get(format!("http://127.0.0.1:{}/", port))
            .await
            .unwrap_err();
        let err = HarvestError::from(e);
        assert!(err.is_retryable());
        assert!(err.is_record_level());
    }

    #[test]
    fn test_error_display() {
        let err = HarvestError::ChallengeTimeout { attempts: 3 };
        assert!(err.to_string().contains("3回"));
    }
}
