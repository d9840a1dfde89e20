//! セッション関連の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// ブラウザから取り出したクッキー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
}

/// 検証突破後のクッキーと署名付きリクエストの束
///
/// 差し替えは常に丸ごと行い、フィールド単位では変更しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub cookies: Vec<CookieEntry>,
    /// 捕捉したAPIリクエストのヘッダー
    pub headers: BTreeMap<String, String>,
    /// 捕捉したAPIリクエストのボディ（検索条件のテンプレート）
    pub search_template: Value,
    pub user_agent: String,
    /// 参考値。有効期限の判定には使わない
    pub captured_at: DateTime<Utc>,
}

/// 再送しないヘッダー（小文字）
const DROPPED_HEADERS: &[&str] = &["cookie", "content-length", "host", "connection"];

impl Session {
    pub fn new(
        cookies: Vec<CookieEntry>,
        headers: BTreeMap<String, String>,
        search_template: Value,
        user_agent: impl Into<String>,
    ) -> Self {
        let headers = headers
            .into_iter()
            .filter(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                !lower.starts_with(':') && !DROPPED_HEADERS.contains(&lower.as_str())
            })
            .collect();

        Self {
            cookies,
            headers,
            search_template,
            user_agent: user_agent.into(),
            captured_at: Utc::now(),
        }
    }

    /// `Cookie`ヘッダーの値。クッキーがなければ`None`
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cookie(name: &str, value: &str) -> CookieEntry {
        CookieEntry {
            name: name.into(),
            value: value.into(),
            domain: "www.cqggzy.com".into(),
            path: "/".into(),
        }
    }

    #[test]
    fn test_captured_headers_are_filtered() {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Cookie".to_string(), "stale=1".to_string());
        headers.insert("Content-Length".to_string(), "120".to_string());
        headers.insert(":authority".to_string(), "www.cqggzy.com".to_string());

        let session = Session::new(vec![], headers, json!({}), "ua");
        assert_eq!(session.headers.len(), 1);
        assert!(session.headers.contains_key("Content-Type"));
    }

    #[test]
    fn test_cookie_header() {
        let session = Session::new(
            vec![cookie("__jsluid_s", "abc"), cookie("__jsl_clearance_s", "xyz")],
            BTreeMap::new(),
            json!({}),
            "ua",
        );
        assert_eq!(
            session.cookie_header().as_deref(),
            Some("__jsluid_s=abc; __jsl_clearance_s=xyz")
        );
        assert_eq!(session.cookie("__jsl_clearance_s"), Some("xyz"));

        let empty = Session::new(vec![], BTreeMap::new(), json!({}), "ua");
        assert!(empty.cookie_header().is_none());
    }
}
