//! 検証中に発行されるAPIリクエストの捕捉

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

/// 検証1回分の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePhase {
    Start,
    AwaitChallenge,
    Captured,
    Timeout,
    Done,
}

/// 捕捉した署名付きリクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// 最初に条件を満たしたリクエストだけを受け入れる
///
/// ページ側のリダイレクトや再送で同じAPIが複数回呼ばれても、2件目以降は無視する。
#[derive(Debug)]
pub struct RequestCapture {
    api_path: String,
    captured: Option<CapturedRequest>,
    ignored: usize,
}

impl RequestCapture {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_path: url_path(api_url).to_string(),
            captured: None,
            ignored: 0,
        }
    }

    /// 観測したリクエストを渡す。今回初めて捕捉できたら`true`
    pub fn offer(&mut self, url: &str, method: &str, headers: &Value, post_data: Option<&str>) -> bool {
        if !method.eq_ignore_ascii_case("POST") || !url.contains(&self.api_path) {
            return false;
        }

        let Some(body) = post_data
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .filter(Value::is_object)
        else {
            debug!("API request without JSON body observed: {}", url);
            return false;
        };

        if self.captured.is_some() {
            self.ignored += 1;
            debug!("Ignoring repeated API request #{}", self.ignored);
            return false;
        }

        let headers = headers
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        self.captured = Some(CapturedRequest {
            url: url.to_string(),
            headers,
            body,
        });
        true
    }

    pub fn is_captured(&self) -> bool {
        self.captured.is_some()
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn into_captured(self) -> Option<CapturedRequest> {
        self.captured
    }
}

/// `https://host/a/b?x=1` → `/a/b`
fn url_path(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    path.split(['?', '#']).next().unwrap_or(path)
}
