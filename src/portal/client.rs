//! reqwestによるポータルアクセス

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, REFERER, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use super::classify::{classify, Verdict};
use super::search::{parse_search_response, SearchPage};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::session::Session;
use crate::traits::PortalClient;

pub struct HttpPortalClient {
    client: reqwest::Client,
    api_url: String,
    base_url: String,
    page_url: String,
}

impl HttpPortalClient {
    pub fn new(config: &HarvestConfig) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HarvestError::Config(format!("HTTPクライアント構築失敗: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            base_url: config.base_url.clone(),
            page_url: config.page_url.clone(),
        })
    }

    /// セッションのクッキーとUser-Agent。`captured`なら捕捉したヘッダーも載せる
    fn session_headers(&self, session: &Session, captured: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if captured {
            for (k, v) in &session.headers {
                if let (Ok(k), Ok(v)) = (
                    HeaderName::from_bytes(k.as_bytes()),
                    HeaderValue::from_str(v),
                ) {
                    headers.insert(k, v);
                }
            }
        }

        if let Ok(ua) = HeaderValue::from_str(&session.user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        if !headers.contains_key(REFERER) {
            if let Ok(referer) = HeaderValue::from_str(&self.page_url) {
                headers.insert(REFERER, referer);
            }
        }
        if let Some(cookie) = session
            .cookie_header()
            .and_then(|c| HeaderValue::from_str(&c).ok())
        {
            headers.insert(COOKIE, cookie);
        }

        headers
    }

    async fn read(response: reqwest::Response) -> Result<(u16, String, String), HarvestError> {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;
        Ok((status, url, body))
    }

    fn check(status: u16, url: &str, body: &str) -> Result<(), HarvestError> {
        match classify(status, body) {
            Verdict::Ok => Ok(()),
            Verdict::SessionExpired => Err(HarvestError::SessionExpired(format!(
                "status={} url={}",
                status, url
            ))),
            Verdict::Transient => Err(HarvestError::TransientFetch(format!(
                "status={} url={}",
                status, url
            ))),
            Verdict::Rejected => Err(HarvestError::Http {
                status,
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl PortalClient for HttpPortalClient {
    async fn search_page(&self, session: &Session, body: &Value) -> Result<SearchPage, HarvestError> {
        let response = self
            .client
            .post(&self.api_url)
            .headers(self.session_headers(session, true))
            .json(body)
            .send()
            .await?;

        let (status, url, text) = Self::read(response).await?;
        debug!("Search API responded {} ({} bytes)", status, text.len());
        Self::check(status, &url, &text)?;

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| HarvestError::Api(format!("response is not JSON: {}", e)))?;
        parse_search_response(&data, &self.base_url)
    }

    async fn fetch_detail(&self, session: &Session, url: &str) -> Result<String, HarvestError> {
        let response = self
            .client
            .get(url)
            .headers(self.session_headers(session, false))
            .send()
            .await?;

        let (status, final_url, text) = Self::read(response).await?;
        debug!("Detail {} responded {} ({} bytes)", url, status, text.len());
        Self::check(status, &final_url, &text)?;
        Ok(text)
    }
}
