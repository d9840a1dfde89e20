//! 公共資源交易ポータルへの素のHTTPアクセス
//!
//! 検証突破後のセッションを載せて検索APIと詳細ページを取得する

mod classify;
mod client;
mod query;
mod search;

pub use classify::{classify, is_challenge_page, Verdict};
pub use client::HttpPortalClient;
pub use query::{FilterQuery, TimePeriod, DEFAULT_INFO_TYPE};
pub use search::{clean_record, parse_search_response, SearchPage};
