//! セッション切れと一時障害の判定
//!
//! - 521 / 401 / 403 / 412 → セッション切れ
//! - 2xxでも本文がJSL検証スクリプトならセッション切れ
//! - 408 / 429 / その他5xx → 一時障害
//! - それ以外の非2xx → そのレコードは失敗

/// 検証ページの本文に現れる印
const CHALLENGE_MARKERS: &[&str] = &["__jsl_clearance", "_jsl_clearance_s", "jsl_clearance"];

/// これより大きい本文は通常ページとみなす
const CHALLENGE_BODY_LIMIT: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// 再検証が必要
    SessionExpired,
    /// バックオフして再試行
    Transient,
    /// このレコードは失敗扱い
    Rejected,
}

pub fn classify(status: u16, body: &str) -> Verdict {
    match status {
        521 | 401 | 403 | 412 => Verdict::SessionExpired,
        408 | 429 => Verdict::Transient,
        500..=599 => Verdict::Transient,
        200..=299 if is_challenge_page(body) => Verdict::SessionExpired,
        200..=299 => Verdict::Ok,
        _ => Verdict::Rejected,
    }
}

/// JSL検証のスクリプトページか
pub fn is_challenge_page(body: &str) -> bool {
    if CHALLENGE_MARKERS.iter().any(|m| body.contains(m)) {
        return true;
    }
    body.len() < CHALLENGE_BODY_LIMIT
        && body.contains("document.cookie")
        && body.contains("location")
        && !body.contains("</table>")
}
