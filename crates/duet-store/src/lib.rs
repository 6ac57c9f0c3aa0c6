//! # duet-store
//!
//! The subscribable document store behind the duet client.
//!
//! [`DocumentStore`] is the interface the client consumes: live queries that
//! redeliver their full result-set on every change, one-shot reads, appends
//! and merge-updates with server-assigned timestamps. [`LocalStore`]
//! implements it on top of a local SQLite database.

pub mod database;
pub mod documents;
pub mod local;
pub mod migrations;
pub mod models;
pub mod query;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError, SubscriptionError};
pub use local::{LocalStore, LocalStoreConfig};
pub use models::*;
pub use query::{Filter, Query};
pub use store::{Delivery, DocumentStore, Subscription};
