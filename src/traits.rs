use async_trait::async_trait;
use serde_json::Value;

use crate::error::HarvestError;
use crate::portal::SearchPage;
use crate::session::Session;

/// 検証突破の能力
///
/// ブラウザ操作の詳細はこの境界の内側に閉じ込める。
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// 検証を突破してセッションを1つ取得する（ブラウザは終了済みで返る）
    async fn acquire_session(&self) -> Result<Session, HarvestError>;
}

/// セッションを使った素のHTTPアクセス
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// 検索APIを1ページ分呼び出す
    async fn search_page(&self, session: &Session, body: &Value) -> Result<SearchPage, HarvestError>;

    /// 詳細ページのHTMLを取得
    async fn fetch_detail(&self, session: &Session, url: &str) -> Result<String, HarvestError>;
}
