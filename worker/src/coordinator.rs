//! Auction Coordinator (component C6, spec §4.6).
//!
//! Owns the lifecycle state machine end to end: planning, scheduling the
//! timeline's first two stages, reacting to the scheduler's fixed jobs,
//! and driving the final announcement. Bid-triggered rescheduling lives in
//! [`crate::bid_handler`]; this module only deals with the three scheduler
//! jobs installed once per stage boundary plus the CLI-invoked one-shots
//! (plan/cancel/reschedule/announce/post results/post audit).

use std::sync::Arc;

use jiff::{Timestamp, tz::TimeZone};
use payloads::{AuctionData, AuctionDocument, BidRecord, Stage};

use crate::bids::build_bids_mapping;
use crate::clock::{self, StageInputs};
use crate::context::{Context, GuardError};
use crate::error::DatasourceMissing;
use crate::protocol;
use crate::scheduler;

/// Refresh the canonical auction definition from the datasource and
/// recompute the bids mapping (spec §4.6 "Synchronize").
///
/// Fetches both the public and the private (credentialed) view, the way
/// the source does before re-synchronising mid-auction; the private fetch
/// is canonical. A failed private fetch is treated as "the auction no
/// longer exists upstream": an existing document is cancelled in place,
/// otherwise the end-of-process signal fires and planning/scheduling bails
/// out with [`DatasourceMissing`].
#[tracing::instrument(skip(ctx))]
pub async fn synchronize_auction_info(ctx: &Arc<Context>, prepare: bool) -> anyhow::Result<AuctionData> {
    let _ = ctx.datasource.get_data(true, !prepare).await;

    let private = match ctx.datasource.get_data(false, true).await {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!("private auction fetch failed: {err:#}");
            let had_document = {
                let mut state = ctx.state.lock().await;
                if let Some(doc) = state.document.as_mut() {
                    doc.current_stage = payloads::STAGE_CANCELLED;
                    doc.end_date = Some(crate::time::now());
                    true
                } else {
                    false
                }
            };
            if !had_document {
                ctx.end_auction.notify_one();
            }
            return Err(DatasourceMissing(ctx.doc_id.clone()).into());
        }
    };

    let active_bids: Vec<_> = private.bids.iter().filter(|b| b.is_active()).cloned().collect();
    let mapping = build_bids_mapping(&active_bids);

    let mut state = ctx.state.lock().await;
    state.auction_data = Some(private.clone());
    state.bids_mapping = mapping;

    Ok(private)
}

fn compute_deadline(ctx: &Context, data: &AuctionData, start_date: Timestamp) -> Option<Timestamp> {
    if !ctx.deadline_enabled {
        return None;
    }
    let tz = TimeZone::UTC;
    let is_quick = data.submission_method_details.contains("quick");
    let is_test_mode = data.mode.as_deref() == Some("test");
    if ctx.sandbox_mode && is_test_mode && is_quick {
        let (deadline, _) = clock::relative_deadline(start_date, clock::sandbox_auction_duration(), &tz);
        Some(deadline)
    } else {
        Some(clock::absolute_deadline(start_date, &tz, ctx.deadline_hour))
    }
}

/// Planning command: build a fresh document from the datasource's
/// definition, compute its first two stages, and persist it. If the
/// deadline is already too close for a main round to fit, hands off to
/// [`reschedule_auction`] instead (spec §4.6 step 6).
#[tracing::instrument(skip(ctx))]
pub async fn prepare_auction_document(ctx: &Arc<Context>, api_version: Option<&str>) -> anyhow::Result<()> {
    let prior_revision = ctx.store.load(&ctx.doc_id).await?.and_then(|d| d.revision);

    let auction_data = synchronize_auction_info(ctx, true).await?;
    let start_date = auction_data
        .auction_period
        .start_date
        .ok_or_else(|| anyhow::anyhow!("auction data has no start date"))?;

    let deadline = compute_deadline(ctx, &auction_data, start_date);
    let inputs = StageInputs { value: auction_data.value, minimal_step: auction_data.minimal_step };
    let (pause, main_round) = clock::prepare_auction_stages(start_date, &inputs, deadline, ctx.sandbox_mode);

    let fits = main_round.is_some();
    let mut stages = vec![pause];
    if let Some(main_round) = main_round {
        stages.push(main_round);
    }

    let mut doc = AuctionDocument {
        id: ctx.doc_id.clone(),
        revision: prior_revision,
        auction_id: auction_data.auction_id.clone(),
        procurement_method_type: auction_data.procurement_method_type.clone(),
        api_version: api_version.unwrap_or("2.5").into(),
        value: auction_data.value,
        minimal_step: auction_data.minimal_step,
        initial_value: auction_data.value.amount,
        stages,
        current_stage: payloads::STAGE_PLANNED,
        initial_bids: vec![],
        results: vec![],
        auction_period: auction_data.auction_period,
        submission_method_details: auction_data.submission_method_details.clone(),
        standalone: auction_data.standalone,
        mode: auction_data.mode.clone(),
        auction_type: payloads::DEFAULT_AUCTION_TYPE.into(),
        procuring_entity: auction_data.procuring_entity.clone(),
        items: auction_data.items.clone(),
        multilingual: auction_data.multilingual.clone(),
        end_date: None,
    };

    ctx.store.save(&mut doc).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    {
        let mut state = ctx.state.lock().await;
        state.document = Some(doc);
        state.deadline = deadline;
    }

    if !fits {
        tracing::warn!(doc_id = %ctx.doc_id, "deadline too close to fit a main round, rescheduling");
        return reschedule_auction(ctx).await;
    }

    ctx.datasource.set_participation_urls(&auction_data).await
}

/// Scheduling command: load the planned document, re-synchronise, seed a
/// fresh audit protocol, install the three fixed jobs, and start the HTTP
/// bid server (spec §4.6 "Scheduling").
#[tracing::instrument(skip(ctx))]
pub async fn schedule_auction(ctx: &Arc<Context>, bind_addr: (String, u16)) -> anyhow::Result<()> {
    let loaded = ctx
        .store
        .load(&ctx.doc_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("auction {} has not been planned yet", ctx.doc_id))?;
    {
        let mut state = ctx.state.lock().await;
        state.document = Some(loaded.clone());
    }

    let auction_data = synchronize_auction_info(ctx, false).await?;

    {
        let mut state = ctx.state.lock().await;
        state.auction_protocol = Some(protocol::new_protocol(
            format!("protocol-{}", ctx.doc_id),
            loaded.auction_id.clone(),
            protocol::items_from_document(&loaded),
        ));
    }

    let start_date = loaded
        .auction_period
        .start_date
        .ok_or_else(|| anyhow::anyhow!("auction data has no start date"))?;
    let deadline = compute_deadline(ctx, &auction_data, start_date);
    {
        let mut state = ctx.state.lock().await;
        state.deadline = deadline;
    }

    if loaded.stages.len() < 2 {
        anyhow::bail!("auction {} was rescheduled or has fewer than 2 planned stages", ctx.doc_id);
    }
    let start_job_at = loaded.stages[0].start;
    let pause_end_at = loaded.stages[1].start;
    let round_end_at = clock::get_round_ending_time(pause_end_at, clock::round_duration(), deadline);

    schedule_job(ctx, scheduler::JOB_AUCTION_START, start_job_at, |ctx| async move {
        start_auction(&ctx).await
    });
    schedule_job(ctx, scheduler::JOB_AUCTION_PAUSE, pause_end_at, |ctx| async move {
        on_pause_end(&ctx).await
    });
    schedule_job(ctx, scheduler::JOB_AUCTION_END, round_end_at, |ctx| async move {
        end_auction(&ctx).await
    });

    let server = crate::routes::run_server(Arc::clone(ctx), bind_addr).await?;
    *ctx.server_handle.lock().await = Some(server.handle());
    actix_web::rt::spawn(server);

    Ok(())
}

fn schedule_job<F, Fut>(ctx: &Arc<Context>, name: &'static str, run_at: Timestamp, f: F)
where
    F: FnOnce(Arc<Context>) -> Fut + 'static,
    Fut: std::future::Future<Output = ()> + 'static,
{
    let ctx = Arc::clone(ctx);
    ctx.scheduler.add_job(name, run_at, move || f(ctx));
}

/// Fired by the `auction:start` job: promote the planned auction into its
/// initial pause, seeding `initial_bids` and the matching audit entry.
#[tracing::instrument(skip(ctx))]
pub async fn start_auction(ctx: &Arc<Context>) {
    let (bids_mapping, auction_data) = {
        let state = ctx.state.lock().await;
        (state.bids_mapping.clone(), state.auction_data.clone())
    };
    let Some(auction_data) = auction_data else {
        tracing::error!("auction:start fired with no auction data in context");
        return;
    };

    let mut initial_bids: Vec<BidRecord> = auction_data
        .bids
        .iter()
        .filter(|b| b.is_active())
        .map(|b| {
            let bid_number = bids_mapping.get(&b.id).copied();
            BidRecord {
                bidder_id: b.id.clone(),
                time: b.date,
                amount: b.value.amount,
                label: payloads::Label::for_bid_number(bid_number.unwrap_or_default()),
                bid_number,
                owner: None,
                identification: None,
            }
        })
        .collect();
    initial_bids.sort_by(|a, b| a.amount.cmp(&b.amount).then(a.bid_number.cmp(&b.bid_number)));

    let start_time = crate::time::now();
    let for_doc = initial_bids.clone();
    let outcome: Result<(), GuardError<std::convert::Infallible>> =
        crate::context::with_document(ctx, move |doc| {
            doc.initial_bids = for_doc;
            doc.current_stage = 0;
            Ok(())
        })
        .await;

    if let Err(err) = outcome {
        tracing::error!("failed to start auction: {err}");
        return;
    }

    let mut state = ctx.state.lock().await;
    if let Some(protocol) = state.auction_protocol.as_mut() {
        protocol::record_initial_bids(protocol, start_time, &initial_bids);
    }
}

/// Fired by a pause-end job, whether installed at scheduling time or
/// reinstalled by [`crate::bid_handler`] after a bid: the pause immediately
/// preceding the live main round always sits right before it in `stages`,
/// so opening the round is just advancing the index.
#[tracing::instrument(skip(ctx))]
pub async fn on_pause_end(ctx: &Arc<Context>) {
    let outcome: Result<(), GuardError<std::convert::Infallible>> =
        crate::context::with_document(ctx, |doc| {
            doc.current_stage += 1;
            Ok(())
        })
        .await;
    if let Err(err) = outcome {
        tracing::error!("failed to open round at pause end: {err}");
    }
}

/// Fired by the end-of-auction job (either a round closing with no bid, or
/// the absolute deadline): drives the announcement (spec §4.6 "End").
#[tracing::instrument(skip(ctx))]
pub async fn end_auction(ctx: &Arc<Context>) {
    ctx.scheduler.remove_all_jobs();
    if let Some(handle) = ctx.server_handle.lock().await.take() {
        handle.stop(true).await;
    }

    let loaded = match ctx.store.load(&ctx.doc_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            tracing::error!("end_auction fired with no document in the store");
            ctx.end_auction.notify_one();
            return;
        }
        Err(err) => {
            tracing::error!("failed to reload document at announcement: {err:#}");
            ctx.end_auction.notify_one();
            return;
        }
    };
    ctx.state.lock().await.document = Some(loaded);

    let preannounce: Result<(), GuardError<std::convert::Infallible>> =
        crate::context::with_document(ctx, |doc| {
            doc.stages.push(Stage::preannouncement(crate::time::now()));
            Ok(())
        })
        .await;
    if let Err(err) = preannounce {
        tracing::error!("failed to append preannouncement stage: {err}");
    }

    let (auction_data, doc_snapshot) = {
        let state = ctx.state.lock().await;
        (state.auction_data.clone(), state.document.clone())
    };
    if let (Some(auction_data), Some(doc_snapshot)) = (auction_data, doc_snapshot) {
        match ctx.datasource.post_results(&auction_data, &doc_snapshot).await {
            Ok(Some(enriched)) => {
                ctx.state.lock().await.document = Some(enriched);
            }
            Ok(None) => {
                tracing::warn!("results not approved by datasource; keeping local document");
            }
            Err(err) => {
                tracing::warn!("post_results failed: {err:#}");
            }
        }
    }

    let now = crate::time::now();
    let finalised: Result<Vec<BidRecord>, GuardError<std::convert::Infallible>> =
        crate::context::with_document(ctx, move |doc| {
            doc.stages.push(Stage::end(now));
            doc.end_date = Some(now);
            Ok(doc.results.clone())
        })
        .await;

    let results = match finalised {
        Ok(results) => results,
        Err(err) => {
            tracing::error!("failed to finalise document: {err}");
            ctx.end_auction.notify_one();
            return;
        }
    };

    let (protocol_snapshot, prior_doc_id) = {
        let mut state = ctx.state.lock().await;
        if let Some(protocol) = state.auction_protocol.as_mut() {
            protocol::record_results(protocol, now, &results);
        }
        (state.auction_protocol.clone(), state.audit_doc_id.clone())
    };
    if let Some(protocol) = protocol_snapshot {
        match ctx.datasource.upload_audit(&protocol, prior_doc_id).await {
            Ok(Some(id)) => ctx.state.lock().await.audit_doc_id = Some(id),
            Ok(None) => tracing::warn!("audit log not approved"),
            Err(err) => tracing::warn!("audit upload failed: {err:#}"),
        }
    }

    ctx.end_auction.notify_one();
}

/// `cancel` CLI command: idempotent, no-op if no document exists.
pub async fn cancel_auction(ctx: &Arc<Context>) -> anyhow::Result<()> {
    set_terminal_stage(ctx, payloads::STAGE_CANCELLED, true).await
}

/// `reschedule` CLI command: idempotent, no-op if no document exists.
pub async fn reschedule_auction(ctx: &Arc<Context>) -> anyhow::Result<()> {
    set_terminal_stage(ctx, payloads::STAGE_RESCHEDULED, false).await
}

async fn set_terminal_stage(ctx: &Arc<Context>, sentinel: i64, stamp_end_date: bool) -> anyhow::Result<()> {
    let cached = ctx.state.lock().await.document.clone();
    let mut doc = match cached {
        Some(doc) => doc,
        None => match ctx.store.load(&ctx.doc_id).await? {
            Some(doc) => doc,
            None => return Ok(()),
        },
    };

    doc.current_stage = sentinel;
    if stamp_end_date {
        doc.end_date = Some(crate::time::now());
    }
    ctx.store.save(&mut doc).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    ctx.state.lock().await.document = Some(doc);
    Ok(())
}

/// `announce` CLI command: reload the document, refresh bidder data, and
/// open up bidder display names the way the final announcement step does,
/// without driving the rest of the lifecycle.
pub async fn announce(ctx: &Arc<Context>) -> anyhow::Result<()> {
    let loaded = ctx
        .store
        .load(&ctx.doc_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("auction {} does not exist", ctx.doc_id))?;
    ctx.state.lock().await.document = Some(loaded);

    let auction_data = synchronize_auction_info(ctx, false).await?;
    let doc_snapshot = ctx.state.lock().await.document.clone().expect("just set above");

    if let Some(enriched) = ctx.datasource.post_results(&auction_data, &doc_snapshot).await? {
        let mut enriched = enriched;
        ctx.store.save(&mut enriched).await.map_err(|e| anyhow::anyhow!("{e}"))?;
        ctx.state.lock().await.document = Some(enriched);
    }
    Ok(())
}

/// `post_results` CLI command: push the current ledger without a live
/// auction (e.g. a manual re-publish after the worker process exited).
pub async fn post_results_only(ctx: &Arc<Context>) -> anyhow::Result<()> {
    let doc = ctx
        .store
        .load(&ctx.doc_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("auction {} does not exist", ctx.doc_id))?;
    let auction_data = synchronize_auction_info(ctx, false).await?;
    if let Some(enriched) = ctx.datasource.post_results(&auction_data, &doc).await? {
        let mut enriched = enriched;
        ctx.store.save(&mut enriched).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    Ok(())
}

/// `post_auction_protocol` CLI command: upload or update the audit trail
/// without going through the full announcement. Returns the document id
/// the CLI prints on success.
pub async fn post_auction_protocol(ctx: &Arc<Context>, doc_id: Option<String>) -> anyhow::Result<String> {
    let doc = ctx
        .store
        .load(&ctx.doc_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("auction {} does not exist", ctx.doc_id))?;

    let mut protocol = protocol::new_protocol(
        format!("protocol-{}", ctx.doc_id),
        doc.auction_id.clone(),
        protocol::items_from_document(&doc),
    );
    if let Some(start) = doc.initial_bids.first().map(|b| b.time) {
        protocol::record_initial_bids(&mut protocol, start, &doc.initial_bids);
    }
    let now = crate::time::now();
    protocol::record_results(&mut protocol, now, &doc.results);

    let uploaded = ctx
        .datasource
        .upload_audit(&protocol, doc_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("audit upload was not approved"))?;
    Ok(uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::TestDatasource;
    use crate::store::InMemoryDocumentStore;

    fn test_ctx() -> Arc<Context> {
        Arc::new(Context::new(
            "a1".into(),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(TestDatasource::new(crate::config::DatasourceConfig {
                kind: "test".into(),
                path: None,
                auction_id: None,
                resource_name: None,
            })),
            Arc::new(crate::scheduler::Scheduler::new()),
            true,
        ))
    }

    #[tokio::test]
    async fn s1_prepare_document_plans_two_stages() {
        let ctx = test_ctx();
        prepare_auction_document(&ctx, None).await.unwrap();

        let state = ctx.state.lock().await;
        let doc = state.document.as_ref().unwrap();
        assert_eq!(doc.stages.len(), 2);
        assert_eq!(doc.stages[0].kind, payloads::StageKind::Pause);
        assert_eq!(doc.stages[1].kind, payloads::StageKind::MainRound);
        assert_eq!(doc.current_stage, payloads::STAGE_PLANNED);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let ctx = test_ctx();
        prepare_auction_document(&ctx, None).await.unwrap();

        cancel_auction(&ctx).await.unwrap();
        let first_end_date = ctx.state.lock().await.document.as_ref().unwrap().end_date;

        cancel_auction(&ctx).await.unwrap();
        let state = ctx.state.lock().await;
        let doc = state.document.as_ref().unwrap();
        assert_eq!(doc.current_stage, payloads::STAGE_CANCELLED);
        assert!(first_end_date.is_some());
        assert!(doc.end_date.is_some());
    }

    #[tokio::test]
    async fn reschedule_is_idempotent() {
        let ctx = test_ctx();
        prepare_auction_document(&ctx, None).await.unwrap();

        reschedule_auction(&ctx).await.unwrap();
        reschedule_auction(&ctx).await.unwrap();

        let state = ctx.state.lock().await;
        assert_eq!(state.document.as_ref().unwrap().current_stage, payloads::STAGE_RESCHEDULED);
    }

    #[tokio::test]
    async fn cancel_without_document_is_a_no_op() {
        let ctx = test_ctx();
        cancel_auction(&ctx).await.unwrap();
        assert!(ctx.state.lock().await.document.is_none());
    }
}
