//! On-disk pipeline state: the inbound cursor and the outbound backlog.
//!
//! Both files are written with a temp-file-then-rename so a crash mid-write
//! never leaves a torn file. The cursor is written only on the outage and
//! shutdown paths, never per message; the backlog exists only while there
//! is undelivered work to survive a restart.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    serde::{Deserialize, Serialize},
    tokio::fs,
};

use crate::types::{OutboundMessage, SeqId};

const OFFSET_FILE: &str = "offset.json";
const BACKLOG_FILE: &str = "backlog.json";

#[derive(Debug, Serialize, Deserialize)]
struct OffsetRecord {
    cursor: SeqId,
}

pub struct StateStore {
    offset_path: PathBuf,
    backlog_path: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let dir = data_dir.into();
        Self {
            offset_path: dir.join(OFFSET_FILE),
            backlog_path: dir.join(BACKLOG_FILE),
        }
    }

    /// Last persisted cursor, or `None` on a cold start.
    pub async fn load_cursor(&self) -> Result<Option<SeqId>> {
        if !fs::try_exists(&self.offset_path).await.unwrap_or(false) {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.offset_path).await?;
        let record: OffsetRecord =
            serde_json::from_str(&data).context("failed to parse offset file")?;
        Ok(Some(record.cursor))
    }

    pub async fn save_cursor(&self, cursor: SeqId) -> Result<()> {
        let json = serde_json::to_string(&OffsetRecord { cursor })?;
        self.atomic_write(&self.offset_path, json.as_bytes()).await
    }

    /// Undelivered outbound messages from a previous run, oldest first.
    pub async fn load_backlog(&self) -> Result<Vec<OutboundMessage>> {
        if !fs::try_exists(&self.backlog_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.backlog_path).await?;
        serde_json::from_str(&data).context("failed to parse backlog file")
    }

    pub async fn save_backlog(&self, messages: &[OutboundMessage]) -> Result<()> {
        let json = serde_json::to_string_pretty(messages)?;
        self.atomic_write(&self.backlog_path, json.as_bytes())
            .await
    }

    /// Remove the backlog file after a full replay.
    pub async fn clear_backlog(&self) -> Result<()> {
        if fs::try_exists(&self.backlog_path).await.unwrap_or(false) {
            fs::remove_file(&self.backlog_path).await?;
        }
        Ok(())
    }

    async fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[tokio::test]
    async fn cold_start_has_no_cursor() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert_eq!(store.load_cursor().await.unwrap(), None);
    }

    #[tokio::test]
    async fn cursor_survives_a_restart() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store.save_cursor(104).await.unwrap();

        let reopened = StateStore::new(tmp.path());
        assert_eq!(reopened.load_cursor().await.unwrap(), Some(104));
    }

    #[tokio::test]
    async fn cursor_file_matches_the_wire_format() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store.save_cursor(7).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join(OFFSET_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"cursor": 7}));
    }

    #[tokio::test]
    async fn backlog_roundtrips_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let messages = vec![
            OutboundMessage::text("1", "first"),
            OutboundMessage::text("2", "second"),
        ];
        store.save_backlog(&messages).await.unwrap();

        let loaded = store.load_backlog().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].text, "first");
        assert_eq!(loaded[1].text, "second");
    }

    #[tokio::test]
    async fn missing_backlog_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert!(store.load_backlog().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_backlog_removes_the_file() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store
            .save_backlog(&[OutboundMessage::text("1", "x")])
            .await
            .unwrap();
        store.clear_backlog().await.unwrap();

        assert!(!tmp.path().join(BACKLOG_FILE).exists());
        // Clearing twice is fine.
        store.clear_backlog().await.unwrap();
    }

    #[tokio::test]
    async fn save_replaces_previous_cursor() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store.save_cursor(10).await.unwrap();
        store.save_cursor(20).await.unwrap();
        assert_eq!(store.load_cursor().await.unwrap(), Some(20));
    }
}
