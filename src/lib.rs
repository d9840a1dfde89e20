//! 公共資源交易結果スクレイパー
//!
//! - ブラウザでJSL検証を1回だけ突破し、クッキーと署名付きリクエストを取り出す
//! - 以降は素のHTTPで検索APIをページングしてリンクを収集
//! - 詳細ページを並行取得し、中断しても続きから再開できる形で保存
//!
//! # 使用例
//!
//! ```rust,ignore
//! use trade_result_scraper::{DiscoverRequest, FilterQuery, HarvestConfig, HarvestRequest, HarvestService, TimePeriod};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = HarvestConfig::from_env().with_output_dir("./output");
//!     let mut service = HarvestService::new(config).unwrap();
//!
//!     let query = FilterQuery::new().with_time_period(TimePeriod::Month);
//!     let links = service.call(DiscoverRequest::new(query)).await.unwrap();
//!     println!("Links: {}", links.links.len());
//!
//!     let report = service.call(HarvestRequest::new()).await.unwrap();
//!     println!("Details: {} ok, {} failed", report.succeeded, report.failed.len());
//! }
//! ```

pub mod challenge;
pub mod config;
pub mod discovery;
pub mod error;
pub mod harvest;
pub mod parser;
pub mod portal;
pub mod progress;
pub mod service;
pub mod session;
pub mod sink;
pub mod storage;
pub mod telemetry;
pub mod traits;
pub mod types;

#[cfg(test)]
mod test_support;

// 主要な型をリエクスポート
pub use config::{HarvestConfig, MAX_SAFE_CONCURRENCY};
pub use error::HarvestError;
pub use harvest::{DetailHarvester, HarvestPolicy, HarvestReport};
pub use portal::{FilterQuery, HttpPortalClient, TimePeriod, DEFAULT_INFO_TYPE};
pub use service::{DiscoverRequest, DiscoverResult, HarvestRequest, HarvestService};
pub use session::{Session, SessionHandle, SessionStore};
pub use traits::{ChallengeSolver, PortalClient};
pub use types::{DetailRecord, FailedRecord, LinkRecord};
