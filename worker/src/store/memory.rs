use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use payloads::{AuctionDocument, Revision};
use uuid::Uuid;

use super::DocumentStore;
use crate::error::StoreConflict;

/// Document store backed by a process-local map. Used for `--standalone`
/// runs and the bulk of the unit/integration test suite, where there is no
/// real document service to talk to.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: Mutex<HashMap<String, AuctionDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, id: &str) -> anyhow::Result<Option<AuctionDocument>> {
        Ok(self.docs.lock().unwrap().get(id).cloned())
    }

    async fn save(&self, doc: &mut AuctionDocument) -> Result<(), StoreConflict> {
        let mut docs = self.docs.lock().unwrap();
        if let Some(existing) = docs.get(&doc.id) {
            if existing.revision != doc.revision {
                return Err(StoreConflict {
                    doc_id: doc.id.clone(),
                    held_revision: existing
                        .revision
                        .clone()
                        .map(|r| r.0)
                        .unwrap_or_default(),
                });
            }
        }
        doc.revision = Some(Revision(Uuid::new_v4().to_string()));
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }
}
