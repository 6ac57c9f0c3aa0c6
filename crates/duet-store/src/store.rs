//! The subscribable document store consumed by the client.
//!
//! A [`Subscription`] is a cancellable handle over a stream of full
//! result-sets. The first delivery is the current result-set; each later one
//! replaces it entirely. An `Err` delivery is the last one.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SubscriptionError};
use crate::models::{DocumentId, ResultSet, WriteFields};
use crate::query::Query;

pub type Delivery = std::result::Result<ResultSet, SubscriptionError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a live query.
    async fn subscribe(&self, query: Query) -> Result<Subscription>;

    /// One-shot read of the current result-set.
    async fn fetch(&self, query: &Query) -> Result<ResultSet>;

    /// Append a new record and return its store-assigned id.
    async fn append(&self, collection: &str, fields: WriteFields) -> Result<DocumentId>;

    /// Update only the named fields of a record, creating it when missing.
    async fn merge_update(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: WriteFields,
    ) -> Result<()>;
}

/// Live query handle. Dropping it cancels the producer.
pub struct Subscription {
    query: Query,
    rx: mpsc::Receiver<Delivery>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl Subscription {
    /// Wrap a delivery channel fed by a spawned producer task. The task is
    /// aborted when the subscription is cancelled or dropped.
    pub fn with_producer(
        query: Query,
        rx: mpsc::Receiver<Delivery>,
        producer: JoinHandle<()>,
    ) -> Self {
        Self {
            query,
            rx,
            producer: Some(producer),
            finished: false,
        }
    }

    /// Wrap a delivery channel whose sender is owned elsewhere.
    pub fn from_receiver(query: Query, rx: mpsc::Receiver<Delivery>) -> Self {
        Self {
            query,
            rx,
            producer: None,
            finished: false,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Whether the subscription has ended (cancelled, failed, or closed by
    /// the store).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the next result-set. `None` once the subscription has ended.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        std::future::poll_fn(|cx| self.poll_delivery(cx)).await
    }

    /// Stop the producer. Deliveries already buffered are discarded.
    pub fn cancel(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        self.rx.close();
        self.finished = true;
    }

    fn poll_delivery(&mut self, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let delivery = std::task::ready!(self.rx.poll_recv(cx));
        if !matches!(delivery, Some(Ok(_))) {
            tracing::debug!(query = %self.query, failed = delivery.is_some(), "subscription ended");
            self.cancel();
        }
        Poll::Ready(delivery)
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_delivery(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.query.to_string())
            .field("finished", &self.finished)
            .finish()
    }
}
