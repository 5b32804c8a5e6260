//! End-to-end lifecycle test: plan, open, bid, announce — exercising
//! `coordinator`, `bid_handler`, `protocol` and the store together the way
//! a real run would, minus the HTTP layer and the scheduler's real sleeps
//! (driven directly instead, with mocked time).

use std::sync::Arc;

use jiff::{Span, Timestamp};
use payloads::{BidInput, BidderId, StageKind};
use worker::context::Context;
use worker::coordinator;
use worker::datasource::TestDatasource;
use worker::scheduler::Scheduler;
use worker::store::InMemoryDocumentStore;

fn test_ctx(start: Timestamp) -> Arc<Context> {
    worker::time::set_mock_time(start);
    Arc::new(Context::with_deadline(
        "UA-2026-01-01-000001".into(),
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(TestDatasource::new(worker::config::DatasourceConfig {
            kind: "test".into(),
            path: None,
            auction_id: None,
            resource_name: None,
        })),
        Arc::new(Scheduler::new()),
        true,
        18,
        true,
        "test-secret".into(),
    ))
}

#[actix_web::test]
async fn plans_opens_bids_and_announces() {
    let start: Timestamp = "2026-01-01T08:00:00Z".parse().unwrap();
    let ctx = test_ctx(start);

    coordinator::prepare_auction_document(&ctx, None).await.unwrap();
    {
        let state = ctx.state.lock().await;
        let doc = state.document.as_ref().unwrap();
        assert_eq!(doc.stages.len(), 2);
        assert_eq!(doc.current_stage, payloads::STAGE_PLANNED);
        assert_eq!(doc.minimal_step.amount, "200.00".parse().unwrap());
    }

    // simulate the auction:start job firing
    coordinator::start_auction(&ctx).await;
    {
        let state = ctx.state.lock().await;
        let doc = state.document.as_ref().unwrap();
        assert_eq!(doc.current_stage, 0);
        assert_eq!(doc.initial_bids.len(), 2);
    }

    // simulate the pause-end job firing: the round opens
    coordinator::on_pause_end(&ctx).await;
    {
        let state = ctx.state.lock().await;
        let doc = state.document.as_ref().unwrap();
        assert_eq!(doc.current_stage, 1);
        assert!(doc.stages[1].is_open_main_round());
        assert_eq!(doc.stages[1].amount, Some("1200.00".parse().unwrap()));
    }

    // bidder-1 raises the round
    let bid_time = start + Span::new().seconds(120 + 30);
    let stage = worker::bid_handler::add_bid(
        &ctx,
        BidInput { bidder_id: BidderId("bidder-1".into()), amount: "1200.00".parse().unwrap(), time: bid_time },
    )
    .await
    .unwrap();
    assert_eq!(stage.bidder_id, Some(BidderId("bidder-1".into())));

    {
        let state = ctx.state.lock().await;
        let doc = state.document.as_ref().unwrap();
        assert_eq!(doc.current_stage, 2);
        assert_eq!(doc.stages.len(), 4);
        assert_eq!(doc.results[0].amount, "1200.00".parse().unwrap());
        assert!(state.auction_protocol.as_ref().unwrap().timeline.rounds.contains_key("round_1"));
    }

    // simulate the end-of-auction job firing with nobody raising the new round
    coordinator::end_auction(&ctx).await;
    let state = ctx.state.lock().await;
    let doc = state.document.as_ref().unwrap();
    assert!(doc.end_date.is_some());
    assert_eq!(doc.stages.last().unwrap().kind, StageKind::End);
    assert!(doc.stages.iter().any(|s| s.kind == StageKind::Preannouncement));
    assert_eq!(state.auction_protocol.as_ref().unwrap().timeline.results.as_ref().unwrap().bids.len(), 1);
}

#[actix_web::test]
async fn planning_then_cancel_marks_document_cancelled() {
    let start: Timestamp = "2026-01-01T08:00:00Z".parse().unwrap();
    let ctx = test_ctx(start);

    coordinator::prepare_auction_document(&ctx, None).await.unwrap();
    coordinator::cancel_auction(&ctx).await.unwrap();

    let state = ctx.state.lock().await;
    let doc = state.document.as_ref().unwrap();
    assert_eq!(doc.current_stage, payloads::STAGE_CANCELLED);
    assert!(doc.end_date.is_some());
}
