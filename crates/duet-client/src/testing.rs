//! Test doubles shared by the client's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use duet_shared::Timestamp;
use duet_store::{
    Delivery, Document, DocumentId, DocumentStore, LocalStore, Query, ResultSet, StoreError,
    Subscription, WriteFields,
};

pub fn doc(id: &str, fields: Value) -> Document {
    let fields = match fields {
        Value::Object(map) => map,
        other => panic!("document fields must be an object, got {other}"),
    };
    Document::new(DocumentId::from(id), fields)
}

pub fn message_doc(id: &str, conversation_id: &str, text: &str, sent_at_secs: i64) -> Document {
    let sent_at = Timestamp::Resolved(Utc.timestamp_opt(sent_at_secs, 0).unwrap());
    doc(
        id,
        json!({
            "conversation_id": conversation_id,
            "text": text,
            "user": "a@x",
            "sent_at": sent_at.to_value(),
        }),
    )
}

/// Wait until the watched value satisfies `predicate`, failing after two
/// seconds.
pub async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("state sender dropped")
        .clone()
}

/// Poll `check` until it holds, failing after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let polled = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), polled)
        .await
        .expect("timed out waiting for condition");
}

/// A store whose deliveries are pushed by hand.
///
/// Each `subscribe` call registers a sender, retrievable in call order via
/// [`ManualStore::sender`]. Writes are refused.
#[derive(Default)]
pub struct ManualStore {
    senders: Mutex<Vec<mpsc::Sender<Delivery>>>,
    queries: Mutex<Vec<Query>>,
    offline: AtomicBool,
}

impl ManualStore {
    pub fn sender(&self, index: usize) -> mpsc::Sender<Delivery> {
        self.senders.lock().unwrap()[index].clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Close every subscription from the store side.
    pub fn drop_senders(&self) {
        self.senders.lock().unwrap().clear();
    }
}

#[async_trait]
impl DocumentStore for ManualStore {
    async fn subscribe(&self, query: Query) -> duet_store::Result<Subscription> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("offline".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push(tx);
        self.queries.lock().unwrap().push(query.clone());
        Ok(Subscription::from_receiver(query, rx))
    }

    async fn fetch(&self, _query: &Query) -> duet_store::Result<ResultSet> {
        Ok(ResultSet::default())
    }

    async fn append(
        &self,
        _collection: &str,
        _fields: WriteFields,
    ) -> duet_store::Result<DocumentId> {
        Err(StoreError::Rejected("read-only test store".into()))
    }

    async fn merge_update(
        &self,
        _collection: &str,
        _id: &DocumentId,
        _fields: WriteFields,
    ) -> duet_store::Result<()> {
        Err(StoreError::Rejected("read-only test store".into()))
    }
}

/// A [`LocalStore`] whose writes can be switched to fail.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: LocalStore,
    reject_appends: Arc<AtomicBool>,
    reject_merges: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            reject_appends: Arc::default(),
            reject_merges: Arc::default(),
        }
    }

    pub fn reject_appends(&self, reject: bool) {
        self.reject_appends.store(reject, Ordering::SeqCst);
    }

    pub fn reject_merges(&self, reject: bool) {
        self.reject_merges.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn subscribe(&self, query: Query) -> duet_store::Result<Subscription> {
        self.inner.subscribe(query).await
    }

    async fn fetch(&self, query: &Query) -> duet_store::Result<ResultSet> {
        self.inner.fetch(query).await
    }

    async fn append(
        &self,
        collection: &str,
        fields: WriteFields,
    ) -> duet_store::Result<DocumentId> {
        if self.reject_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("append refused".into()));
        }
        self.inner.append(collection, fields).await
    }

    async fn merge_update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: WriteFields,
    ) -> duet_store::Result<()> {
        if self.reject_merges.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("merge refused".into()));
        }
        self.inner.merge_update(collection, id, fields).await
    }
}
