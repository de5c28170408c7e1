//! Durable ticket records.
//!
//! The registry is the only writer of open-ticket state; the store only needs
//! whatever single-record consistency its backing technology provides.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::ticket::{Ticket, TicketKey};

/// Durable record of tickets. Closed records are retained indefinitely for
/// audit consumers; `put` with a closed ticket is the terminal write.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert or replace the record for the ticket's key.
    async fn put(&self, ticket: &Ticket) -> Result<(), StoreError>;

    /// All non-closed tickets, used to rehydrate the in-memory index after a
    /// restart.
    async fn open_tickets(&self) -> Result<Vec<Ticket>, StoreError>;
}

/// Default on-disk location for the JSON file store.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modmail-relay")
        .join("tickets.json")
}

/// File-backed store: every ticket record as a JSON array in one file, with a
/// write-through in-memory map. Good for single-process deployments and tests;
/// larger deployments implement [`TicketStore`] over a database.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<HashMap<TicketKey, Ticket>>,
}

impl JsonFileStore {
    /// Open the store, loading existing records if the file is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(data) => {
                let tickets: Vec<Ticket> = serde_json::from_slice(&data)?;
                tickets.into_iter().map(|t| (t.key.clone(), t)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &HashMap<TicketKey, Ticket>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tickets: Vec<&Ticket> = records.values().collect();
        tickets.sort_by_key(|t| t.created_at);
        let data = serde_json::to_vec_pretty(&tickets)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for JsonFileStore {
    async fn put(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        records.insert(ticket.key.clone(), ticket.clone());
        self.flush(&records)
    }

    async fn open_tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        let records = self.records.lock();
        Ok(records.values().filter(|t| !t.closed).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::ticket::ClosedBy;

    fn ticket(requester: &str) -> Ticket {
        Ticket::open(
            TicketKey::new("guild-1", requester),
            format!("chan-{requester}"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.put(&ticket("alice")).await.unwrap();
        store.put(&ticket("bob")).await.unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let mut open = reopened.open_tickets().await.unwrap();
        open.sort_by(|a, b| a.key.requester_id.cmp(&b.key.requester_id));
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].key.requester_id, "alice");
        assert_eq!(open[1].key.requester_id, "bob");
    }

    #[tokio::test]
    async fn closed_tickets_are_retained_but_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.json");
        let store = JsonFileStore::open(&path).unwrap();

        let mut t = ticket("alice");
        store.put(&t).await.unwrap();
        t.mark_closed(ClosedBy::System, Some("idle".into()), Utc::now());
        store.put(&t).await.unwrap();

        assert!(store.open_tickets().await.unwrap().is_empty());

        // The closed record is still on disk for audit consumers.
        let raw = fs::read_to_string(&path).unwrap();
        let parsed: Vec<Ticket> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].closed);
        assert_eq!(parsed[0].close_reason.as_deref(), Some("idle"));
    }

    #[tokio::test]
    async fn put_replaces_record_for_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("tickets.json")).unwrap();

        let mut t = ticket("alice");
        store.put(&t).await.unwrap();
        t.last_activity_at = t.last_activity_at + chrono::Duration::seconds(5);
        store.put(&t).await.unwrap();

        let open = store.open_tickets().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].last_activity_at, t.last_activity_at);
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.records.lock().is_empty());
    }

    #[test]
    fn open_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "not-json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Codec(_))
        ));
    }

    #[test]
    fn default_path_ends_with_tickets_file() {
        assert!(default_store_path().ends_with("modmail-relay/tickets.json"));
    }
}
