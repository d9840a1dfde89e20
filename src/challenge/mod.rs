//! JSL検証（加速楽）の突破
//!
//! ヘッドレスブラウザで検索ページを開き、ページ内JSが発行する
//! 署名付きAPIリクエストとクッキーを取り出してセッションにする

mod capture;
mod solver;

pub use capture::{CapturedRequest, ChallengePhase, RequestCapture};
pub use solver::BrowserChallengeSolver;
