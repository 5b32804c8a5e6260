use std::path::{Path, PathBuf};

use async_trait::async_trait;
use payloads::{AuctionDocument, Revision};
use tokio::fs;
use uuid::Uuid;

use super::DocumentStore;
use crate::error::StoreConflict;

/// Document store backed by one JSON file per auction under `dir`, named
/// `auction_{id}.json` the way the source's file datasource names its
/// tender data file. Meant for local runs against a real auction module
/// without standing up a document service.
pub struct FileDocumentStore {
    dir: PathBuf,
}

impl FileDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("auction_{id}.json"))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn load(&self, id: &str) -> anyhow::Result<Option<AuctionDocument>> {
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, doc: &mut AuctionDocument) -> Result<(), StoreConflict> {
        let path = self.path_for(&doc.id);

        if let Ok(existing) = load_for_conflict_check(&path).await {
            if existing.revision != doc.revision {
                return Err(StoreConflict {
                    doc_id: doc.id.clone(),
                    held_revision: existing
                        .revision
                        .map(|r| r.0)
                        .unwrap_or_default(),
                });
            }
        }

        doc.revision = Some(Revision(Uuid::new_v4().to_string()));
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| StoreConflict { doc_id: doc.id.clone(), held_revision: e.to_string() })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreConflict { doc_id: doc.id.clone(), held_revision: e.to_string() })?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| StoreConflict { doc_id: doc.id.clone(), held_revision: e.to_string() })?;

        Ok(())
    }
}

async fn load_for_conflict_check(path: &Path) -> anyhow::Result<AuctionDocument> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
