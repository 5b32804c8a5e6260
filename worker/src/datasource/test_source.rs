use async_trait::async_trait;
use jiff::Span;
use payloads::{AuctionData, AuctionDocument, AuctionProtocol, Envelope};

use super::Datasource;
use crate::config::DatasourceConfig;
use crate::time;

const DEFAULT_FIXTURE: &str = include_str!("../../fixtures/tender_texas.json");

/// Synthesises a near-future auction out of a bundled fixture. Mirrors the
/// source's `SimpleTestingFileDataSource`: every call rewrites
/// `auctionPeriod.startDate` to `now + 120s` so the auction is always
/// plannable regardless of when the fixture was written.
pub struct TestDatasource {
    config: DatasourceConfig,
}

impl TestDatasource {
    pub fn new(config: DatasourceConfig) -> Self {
        Self { config }
    }

    fn fixture(&self) -> anyhow::Result<String> {
        match &self.config.path {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Ok(DEFAULT_FIXTURE.to_string()),
        }
    }
}

#[async_trait]
impl Datasource for TestDatasource {
    fn post_result(&self) -> bool {
        false
    }

    fn post_history_document(&self) -> bool {
        false
    }

    async fn get_data(&self, _public: bool, _with_credentials: bool) -> anyhow::Result<AuctionData> {
        let raw = self.fixture()?;
        let mut envelope: Envelope<AuctionData> = serde_json::from_str(&raw)?;
        envelope.data.auction_period.start_date = Some(time::now() + Span::new().seconds(120));
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
    async fn rewrites_start_date_to_near_future() {
        let ds = TestDatasource::new(DatasourceConfig {
            kind: "test".into(),
            path: None,
            auction_id: None,
            resource_name: None,
        });
        let before = time::now();
        let data = ds.get_data(true, false).await.unwrap();
        let start = data.auction_period.start_date.unwrap();
        assert!(start > before);
        assert_eq!(data.bids.len(), 2);
    }
}
