//! Document store (component C2).
//!
//! The store itself — a real CouchDB-style service in production — is an
//! external collaborator (spec §1); what's core is the `DocumentStore`
//! contract and the scoped update guard every mutation goes through. Two
//! implementations are provided: an in-memory one (used by `--standalone`
//! runs and tests) and a JSON-file-backed one (mirrors the source's file
//! datasource, useful for local runs without a real auction module).

mod file;
mod memory;

pub use file::FileDocumentStore;
pub use memory::InMemoryDocumentStore;

use async_trait::async_trait;
use payloads::AuctionDocument;

use crate::error::StoreConflict;

/// Load/save an [`AuctionDocument`] by id, tracking an opaque revision for
/// optimistic concurrency.
///
/// Implementations must fail `save` when the revision on the document being
/// saved doesn't match what's currently stored — the single in-process
/// writer lock (spec §5) means this should never actually happen; if it
/// does, it's surfaced as [`StoreConflict`] and treated as fatal.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, id: &str) -> anyhow::Result<Option<AuctionDocument>>;

    async fn save(&self, doc: &mut AuctionDocument) -> Result<(), StoreConflict>;
}
