use async_trait::async_trait;
use payloads::{AuctionData, AuctionDocument, AuctionProtocol, Envelope};

use super::Datasource;
use crate::config::DatasourceConfig;

/// Reads/writes a single auction's JSON fixture off disk, one file per
/// auction id under `config.path`. Used for local runs against a real
/// auction module without standing up the procurement API.
pub struct FileDatasource {
    file_path: std::path::PathBuf,
}

impl FileDatasource {
    pub fn new(config: DatasourceConfig) -> anyhow::Result<Self> {
        let dir = config
            .path
            .ok_or_else(|| anyhow::anyhow!("file datasource requires datasource.path"))?;
        let auction_id = config
            .auction_id
            .ok_or_else(|| anyhow::anyhow!("file datasource requires datasource.auction_id"))?;
        let dir = if dir.ends_with('/') { dir } else { format!("{dir}/") };
        let file_path = std::path::PathBuf::from(format!("{dir}auction_{auction_id}.json"));
        Ok(Self { file_path })
    }
}

#[async_trait]
impl Datasource for FileDatasource {
    fn post_result(&self) -> bool {
        false
    }

    fn post_history_document(&self) -> bool {
        false
    }

    async fn get_data(&self, _public: bool, _with_credentials: bool) -> anyhow::Result<AuctionData> {
        let raw = tokio::fs::read_to_string(&self.file_path).await?;
        let envelope: Envelope<AuctionData> = serde_json::from_str(&raw)?;
        Ok(envelope.data)
    }

    async fn set_participation_urls(&self, _data: &AuctionData) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upload_audit(
        &self,
        _protocol: &AuctionProtocol,
        _doc_id: Option<String>,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn post_results(
        &self,
        _data: &AuctionData,
        _doc: &AuctionDocument,
    ) -> anyhow::Result<Option<AuctionDocument>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_auction_fixture_by_id() {
        let tmp = std::env::temp_dir().join(format!("auction-texas-ds-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp).await.unwrap();
        let fixture = include_str!("../../fixtures/tender_texas.json");
        tokio::fs::write(tmp.join("auction_UA-2026-01-01-000001.json"), fixture)
            .await
            .unwrap();

        let ds = FileDatasource::new(DatasourceConfig {
            kind: "file".into(),
            path: Some(tmp.to_string_lossy().to_string()),
            auction_id: Some("UA-2026-01-01-000001".into()),
            resource_name: None,
        })
        .unwrap();

        let data = ds.get_data(true, false).await.unwrap();
        assert_eq!(data.auction_id.0, "UA-2026-01-01-000001");

        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }
}
