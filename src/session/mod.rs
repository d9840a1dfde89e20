//! セッション管理
//!
//! 検証突破で得たクッキーと署名の束を保存・共有・差し替えする

mod handle;
mod store;
mod types;

pub use handle::{SessionHandle, SessionSnapshot};
pub use store::SessionStore;
pub use types::{CookieEntry, Session};
