//! External procurement API integration (component C3).
//!
//! `Datasource` is the only point of contact with the world outside this
//! worker: it hands back the canonical auction definition and absorbs the
//! final results and audit trail. Three variants are provided, matching the
//! `datasource.type` values a running deployment actually uses: `test`
//! (synthesises a near-future start date on every call), `file` (reads a
//! fixture off disk) and `external_api` (talks to the real procurement API
//! over HTTP).

mod external_api;
mod file;
mod test_source;

pub use external_api::ExternalApiDatasource;
pub use file::FileDatasource;
pub use test_source::TestDatasource;

use async_trait::async_trait;
use payloads::{AuctionData, AuctionDocument, AuctionProtocol};

/// Read the canonical auction definition; post participation URLs, results
/// and the audit trail back.
///
/// `post_result`/`post_history_document` tell the coordinator whether this
/// variant actually has anywhere to push results/audit to — local
/// (file/test) variants report `false` for both and the corresponding calls
/// become no-ops.
#[async_trait]
pub trait Datasource: Send + Sync {
    fn post_result(&self) -> bool;
    fn post_history_document(&self) -> bool;

    /// `public` selects the public (unauthenticated) vs. private
    /// (credentialed) view of the tender; `with_credentials` additionally
    /// asks the public view to carry credentials when the caller needs both
    /// (used when re-synchronising mid-auction).
    async fn get_data(&self, public: bool, with_credentials: bool) -> anyhow::Result<AuctionData>;

    /// Compute and push a per-bidder participation URL for each active bid.
    /// No-op for variants with nowhere to push it to.
    async fn set_participation_urls(&self, data: &AuctionData) -> anyhow::Result<()>;

    /// Upload (or, given a prior `doc_id`, update) the audit trail. Returns
    /// the document id to pass to the next call, if the upload produced one.
    async fn upload_audit(
        &self,
        protocol: &AuctionProtocol,
        doc_id: Option<String>,
    ) -> anyhow::Result<Option<String>>;

    /// Push the final bid ledger. Returns the upstream's potentially
    /// enriched document (bidder display names opened up), or `None` if the
    /// upstream refused — the coordinator treats that as "results not
    /// approved" and proceeds without adopting anything.
    async fn post_results(
        &self,
        data: &AuctionData,
        doc: &AuctionDocument,
    ) -> anyhow::Result<Option<AuctionDocument>>;
}

/// Build the configured [`Datasource`] implementation from `config.datasource.type`.
///
/// Mirrors the source's plugin-loaded factory (`DATASOURCE_MAPPING`) without
/// the dynamic plugin-loading part — new variants are added here instead of
/// through a runtime registration interface.
pub fn build_datasource(config: &crate::config::Config, auction_id: &str) -> anyhow::Result<Box<dyn Datasource>> {
    match config.datasource.kind.as_str() {
        "test" => Ok(Box::new(TestDatasource::new(config.datasource.clone()))),
        "file" => Ok(Box::new(FileDatasource::new(config.datasource.clone())?)),
        "external_api" => Ok(Box::new(ExternalApiDatasource::from_config(config, auction_id)?)),
        other => anyhow::bail!(
            "no datasource for type {other:?}; available types are test, file, external_api"
        ),
    }
}
