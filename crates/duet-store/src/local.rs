//! SQLite-backed live document store.
//!
//! Every committed write bumps a revision counter on a `watch` channel. Each
//! subscription owns a producer task that re-evaluates its query whenever the
//! revision moves and forwards the result-set if it differs from the last one
//! it delivered.
//!
//! Appends are visible to local subscribers before they commit: the record is
//! first published from an in-memory overlay with its server timestamps
//! `Pending`, then committed after the configured latency with the timestamps
//! resolved.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use duet_shared::constants::DEFAULT_SUBSCRIPTION_BUFFER;

use crate::database::Database;
use crate::error::{Result, StoreError, SubscriptionError};
use crate::models::{Document, DocumentId, ResultSet, WriteFields};
use crate::query::Query;
use crate::store::{DocumentStore, Subscription};

/// Tuning for a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// Delay between publishing an append as pending and committing it.
    pub commit_latency: Duration,
    /// Result-sets a subscription may buffer before its producer waits.
    pub subscription_buffer: usize,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            commit_latency: Duration::ZERO,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

/// Cheaply cloneable handle; all clones share one database.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: Mutex<Database>,
    overlay: Mutex<Vec<PendingAppend>>,
    revision: watch::Sender<u64>,
    last_commit_time: Mutex<DateTime<Utc>>,
    config: LocalStoreConfig,
}

struct PendingAppend {
    collection: String,
    document: Document,
}

impl LocalStore {
    pub fn new(db: Database, config: LocalStoreConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                db: Mutex::new(db),
                overlay: Mutex::new(Vec::new()),
                revision,
                last_commit_time: Mutex::new(DateTime::<Utc>::MIN_UTC),
                config,
            }),
        }
    }

    pub fn open_at(path: &Path, config: LocalStoreConfig) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?, config))
    }

    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with(LocalStoreConfig::default())
    }

    pub fn in_memory_with(config: LocalStoreConfig) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?, config))
    }

    /// Log where the store keeps its data.
    pub fn describe(&self) {
        match self.db().map(|db| db.path()) {
            Ok(Some(path)) => info!(path = %path.display(), "local store ready"),
            Ok(None) => info!("local store ready (in memory)"),
            Err(e) => warn!(error = %e, "local store unavailable"),
        }
    }

    /// Change counter; moves whenever subscribers may see a new result.
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.inner
            .db
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("database lock poisoned: {e}")))
    }

    fn overlay(&self) -> Result<MutexGuard<'_, Vec<PendingAppend>>> {
        self.inner
            .overlay
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("overlay lock poisoned: {e}")))
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    /// Commit times never go backwards, even if the wall clock does.
    fn next_commit_time(&self) -> Result<DateTime<Utc>> {
        let mut last = self
            .inner
            .last_commit_time
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("clock lock poisoned: {e}")))?;
        let now = Utc::now().max(*last);
        *last = now;
        Ok(now)
    }

    /// Current result-set of `query`: committed documents followed by pending
    /// appends, then filtered and ordered.
    ///
    /// The overlay lock is held across the database read. An append commits
    /// before leaving the overlay, so it is always seen in one or the other.
    fn evaluate(&self, query: &Query) -> Result<ResultSet> {
        let overlay = self.overlay()?;
        let mut documents = self.db()?.list_documents(&query.collection)?;

        let committed: HashSet<DocumentId> = documents.iter().map(|d| d.id.clone()).collect();
        let mut has_pending_writes = false;
        for pending in overlay.iter() {
            if pending.collection != query.collection || committed.contains(&pending.document.id) {
                continue;
            }
            if query.matches(&pending.document) {
                has_pending_writes = true;
            }
            documents.push(pending.document.clone());
        }

        Ok(ResultSet {
            documents: query.apply(documents),
            has_pending_writes,
        })
    }

    fn commit_append(&self, collection: &str, id: &DocumentId, fields: &WriteFields) -> Result<()> {
        let committed_at = self.next_commit_time()?;
        let document = Document::new(id.clone(), fields.resolve(Some(committed_at)));
        self.db()?.insert_document(collection, &document)
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.inner.config.subscription_buffer.max(1));
        let mut revisions = self.inner.revision.subscribe();
        let store = self.clone();
        let producer_query = query.clone();

        debug!(query = %query, "opening subscription");

        let producer = tokio::spawn(async move {
            let query = producer_query;
            let mut last: Option<ResultSet> = None;
            loop {
                revisions.borrow_and_update();

                match store.evaluate(&query) {
                    Ok(set) => {
                        if last.as_ref() != Some(&set) {
                            if tx.send(Ok(set.clone())).await.is_err() {
                                break;
                            }
                            last = Some(set);
                        }
                    }
                    Err(e) => {
                        warn!(query = %query, error = %e, "subscription evaluation failed");
                        let _ = tx.send(Err(SubscriptionError::new(&query, e.to_string()))).await;
                        break;
                    }
                }

                if revisions.changed().await.is_err() {
                    break;
                }
            }
            debug!(query = %query, "subscription producer stopped");
        });

        Ok(Subscription::with_producer(query, rx, producer))
    }

    async fn fetch(&self, query: &Query) -> Result<ResultSet> {
        self.evaluate(query)
    }

    async fn append(&self, collection: &str, fields: WriteFields) -> Result<DocumentId> {
        if fields.is_empty() {
            return Err(StoreError::Rejected("empty record".into()));
        }

        let id = DocumentId::generate();
        let _pending = PendingGuard::publish(self, collection, &id, &fields)?;

        if !self.inner.config.commit_latency.is_zero() {
            tokio::time::sleep(self.inner.config.commit_latency).await;
        }

        self.commit_append(collection, &id, &fields)?;
        debug!(collection, id = %id, "append committed");
        Ok(id)
    }

    async fn merge_update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: WriteFields,
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(StoreError::Rejected("empty update".into()));
        }

        let committed_at = self.next_commit_time()?;
        self.db()?
            .merge_document(collection, id, fields.resolve(Some(committed_at)))?;
        self.bump();

        debug!(collection, id = %id, fields = fields.len(), "merge-update committed");
        Ok(())
    }
}

/// Keeps an append in the overlay until it is committed or abandoned.
/// Dropping the guard removes the overlay entry and notifies subscribers.
struct PendingGuard<'a> {
    store: &'a LocalStore,
    id: DocumentId,
}

impl<'a> PendingGuard<'a> {
    fn publish(
        store: &'a LocalStore,
        collection: &str,
        id: &DocumentId,
        fields: &WriteFields,
    ) -> Result<Self> {
        store.overlay()?.push(PendingAppend {
            collection: collection.to_string(),
            document: Document::new(id.clone(), fields.resolve(None)),
        });
        store.bump();
        Ok(Self {
            store,
            id: id.clone(),
        })
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut overlay) = self.store.overlay() {
            overlay.retain(|p| p.document.id != self.id);
        }
        self.store.bump();
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("revision", &self.revision())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn messages_in(conversation: &str) -> Query {
        Query::collection("messages")
            .where_eq("conversation_id", conversation)
            .order_by("sent_at")
    }

    fn message(conversation: &str, text: &str) -> WriteFields {
        WriteFields::new()
            .set("conversation_id", conversation)
            .set("text", text)
            .set("user", "a@x")
            .server_timestamp("sent_at")
    }

    async fn next_set(sub: &mut Subscription) -> ResultSet {
        timeout(WAIT, sub.next_delivery())
            .await
            .expect("delivery in time")
            .expect("subscription open")
            .expect("no subscription error")
    }

    fn texts(set: &ResultSet) -> Vec<String> {
        set.iter()
            .map(|d| d.get_str("text").unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_committing_appends_never_vanish() {
        const APPENDS: usize = 40;
        let store = LocalStore::in_memory().unwrap();
        let mut sub = store.subscribe(messages_in("c1")).await.unwrap();

        let writers: Vec<_> = (0..APPENDS)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append("messages", message("c1", &format!("m{i}")))
                        .await
                        .unwrap();
                })
            })
            .collect();

        let mut seen = 0;
        while seen < APPENDS {
            let set = next_set(&mut sub).await;
            assert!(set.len() >= seen, "delivery shrank from {seen} to {}", set.len());
            seen = set.len();
        }
        for writer in writers {
            writer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_delivery_is_current_state() {
        let store = LocalStore::in_memory().unwrap();
        store.append("messages", message("c1", "hello")).await.unwrap();

        let mut sub = store.subscribe(messages_in("c1")).await.unwrap();
        let set = next_set(&mut sub).await;
        assert_eq!(texts(&set), vec!["hello"]);
        assert!(!set.has_pending_writes);
    }

    #[tokio::test]
    async fn test_live_updates_in_send_order() {
        let store = LocalStore::in_memory().unwrap();
        let mut sub = store.subscribe(messages_in("c1")).await.unwrap();
        assert!(next_set(&mut sub).await.is_empty());

        for text in ["one", "two", "three"] {
            store.append("messages", message("c1", text)).await.unwrap();
        }
        store.append("messages", message("c2", "elsewhere")).await.unwrap();

        let mut latest = next_set(&mut sub).await;
        while latest.len() < 3 {
            latest = next_set(&mut sub).await;
        }
        assert_eq!(texts(&latest), vec!["one", "two", "three"]);

        let stamps: Vec<_> = latest.iter().map(|d| d.get_timestamp("sent_at").unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(stamps.iter().all(|t| !t.is_pending()));
    }

    #[tokio::test]
    async fn test_resubscribe_yields_same_sequence() {
        let store = LocalStore::in_memory().unwrap();
        for text in ["a", "b", "c"] {
            store.append("messages", message("c1", text)).await.unwrap();
        }

        let mut first = store.subscribe(messages_in("c1")).await.unwrap();
        let before = next_set(&mut first).await;
        drop(first);

        let mut second = store.subscribe(messages_in("c1")).await.unwrap();
        let after = next_set(&mut second).await;
        assert_eq!(before, after);
        assert_eq!(after.len(), 3);
    }

    #[tokio::test]
    async fn test_pending_append_visible_before_commit() {
        let config = LocalStoreConfig {
            commit_latency: Duration::from_millis(200),
            ..LocalStoreConfig::default()
        };
        let store = LocalStore::in_memory_with(config).unwrap();
        let mut sub = store.subscribe(messages_in("c1")).await.unwrap();
        assert!(next_set(&mut sub).await.is_empty());

        let writer = store.clone();
        let append =
            tokio::spawn(async move { writer.append("messages", message("c1", "hi")).await });

        let pending = next_set(&mut sub).await;
        assert!(pending.has_pending_writes);
        assert_eq!(
            pending.documents[0].get_timestamp("sent_at"),
            Some(duet_shared::Timestamp::Pending)
        );

        let committed = next_set(&mut sub).await;
        assert!(!committed.has_pending_writes);
        assert_eq!(committed.len(), 1);
        assert_eq!(committed.documents[0].id, pending.documents[0].id);
        assert!(committed.documents[0].get_timestamp("sent_at").unwrap().resolved().is_some());

        append.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_append_leaves_no_trace() {
        let config = LocalStoreConfig {
            commit_latency: Duration::from_secs(60),
            ..LocalStoreConfig::default()
        };
        let store = LocalStore::in_memory_with(config).unwrap();

        let slow = store.append("messages", message("c1", "never"));
        assert!(timeout(Duration::from_millis(50), slow).await.is_err());

        let set = store.fetch(&messages_in("c1")).await.unwrap();
        assert!(set.is_empty());
        assert!(!set.has_pending_writes);
    }

    #[tokio::test]
    async fn test_merge_update_keeps_other_fields() {
        let store = LocalStore::in_memory().unwrap();
        let id = DocumentId::from("a@x");
        store
            .merge_update("users", &id, WriteFields::new().set("photo_url", "a.png"))
            .await
            .unwrap();
        store
            .merge_update("users", &id, WriteFields::new().server_timestamp("last_seen"))
            .await
            .unwrap();

        let set = store.fetch(&Query::collection("users").where_id("a@x")).await.unwrap();
        let user = &set.documents[0];
        assert_eq!(user.get("photo_url"), Some(&json!("a.png")));
        assert!(user.get_timestamp("last_seen").is_some());
    }

    #[tokio::test]
    async fn test_empty_writes_rejected() {
        let store = LocalStore::in_memory().unwrap();
        let err = store.append("messages", WriteFields::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let err = store
            .merge_update("users", &DocumentId::from("a@x"), WriteFields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_result_not_redelivered() {
        let store = LocalStore::in_memory().unwrap();
        let mut sub = store.subscribe(messages_in("c1")).await.unwrap();
        assert!(next_set(&mut sub).await.is_empty());

        // Writes to other conversations do not change this result-set.
        store.append("messages", message("c2", "x")).await.unwrap();
        assert!(timeout(Duration::from_millis(100), sub.next_delivery()).await.is_err());

        store.append("messages", message("c1", "y")).await.unwrap();
        assert_eq!(texts(&next_set(&mut sub).await), vec!["y"]);
    }

    #[tokio::test]
    async fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duet.db");

        {
            let store = LocalStore::open_at(&path, LocalStoreConfig::default()).unwrap();
            store.append("messages", message("c1", "kept")).await.unwrap();
        }

        let store = LocalStore::open_at(&path, LocalStoreConfig::default()).unwrap();
        let set = store.fetch(&messages_in("c1")).await.unwrap();
        assert_eq!(texts(&set), vec!["kept"]);
    }
}
