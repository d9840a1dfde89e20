//! 最後に取得したセッションの保存

use std::path::PathBuf;

use tracing::{info, warn};

use super::types::Session;
use crate::error::HarvestError;
use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 保存済みセッションを読む
    ///
    /// 読めないファイルは「なし」と同じ扱い。有効かどうかは使う側がAPIの応答で判断する。
    pub fn load(&self) -> Option<Session> {
        match read_json::<Session>(&self.path) {
            Ok(Some(session)) => {
                info!(
                    "Loaded cached session from {:?} (captured at {})",
                    self.path, session.captured_at
                );
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable session file {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), HarvestError> {
        write_json_atomic(&self.path, session)?;
        info!("Session saved to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CookieEntry;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        assert!(store.load().is_none());

        let session = Session::new(
            vec![CookieEntry {
                name: "__jsl_clearance_s".into(),
                value: "token".into(),
                domain: "www.cqggzy.com".into(),
                path: "/".into(),
            }],
            BTreeMap::new(),
            json!({"pn": 0, "rn": 20}),
            "ua",
        );
        store.save(&session).unwrap();
        assert_eq!(store.load(), Some(session));
    }

    #[test]
    fn test_corrupted_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{bad json").unwrap();
        assert!(SessionStore::new(path).load().is_none());
    }
}
