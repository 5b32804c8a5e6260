//! Bid Handler (component C5, spec §4.5).
//!
//! `add_bid` is the only entry point the HTTP route calls. Validation
//! happens before any mutation, so a rejected bid never touches the
//! document; a bid that passes validation is applied and immediately
//! followed by `end_bid_stage`, which closes the round out in the audit
//! protocol and rebuilds the schedule.

use std::sync::Arc;

use payloads::{BidInput, BidRecord, Stage, StageKind};

use crate::clock::{self, StageInputs};
use crate::context::{Context, GuardError};
use crate::error::{BidApplyError, BidError, BidValidationError};
use crate::scheduler;

/// Validate and apply `bid` to the currently open main round, then rebuild
/// the schedule around it. Returns the stage record the bid landed in.
///
/// `ctx.lock` is acquired once here and held across both steps (the apply,
/// via [`crate::context::with_document_locked`], and the reschedule inside
/// [`end_bid_stage`]) so a second bid racing in concurrently always sees
/// either the fully-closed round or nothing of it at all — never a round
/// whose amount has been overwritten but whose `current_stage` hasn't moved
/// past it yet (spec §5).
#[tracing::instrument(skip(ctx), fields(bidder = %bid.bidder_id), err)]
pub async fn add_bid(ctx: &Arc<Context>, bid: BidInput) -> Result<Stage, BidError> {
    let bid_number = {
        let state = ctx.state.lock().await;
        *state
            .bids_mapping
            .get(&bid.bidder_id)
            .ok_or_else(|| BidValidationError::UnknownBidder(bid.bidder_id.clone()))?
    };

    let _permit = ctx
        .lock
        .acquire()
        .await
        .expect("the context semaphore is never closed");

    let bid_for_closure = bid.clone();
    let result = crate::context::with_document_locked(ctx, move |doc| {
        let stage_index = usize::try_from(doc.current_stage)
            .map_err(|_| BidValidationError::WrongStage)?;
        let stage = doc
            .stages
            .get(stage_index)
            .ok_or(BidValidationError::WrongStage)?;
        if !stage.is_open_main_round() {
            return Err(BidValidationError::WrongStage);
        }
        let floor = stage.amount.ok_or(BidValidationError::WrongStage)?;
        let step = doc.minimal_step.amount;

        let diff = bid_for_closure.amount - floor;
        if diff.is_sign_negative() && !diff.is_zero() {
            return Err(BidValidationError::BelowFloor {
                amount: bid_for_closure.amount.to_string(),
                floor: floor.to_string(),
            });
        }
        if !(diff % step).is_zero() {
            return Err(BidValidationError::NotStepMultiple);
        }

        let label = payloads::Label::for_bid_number(bid_number);
        let applied = doc.stages.get_mut(stage_index).expect("index checked above");
        applied.time = Some(bid_for_closure.time);
        applied.bidder_id = Some(bid_for_closure.bidder_id.clone());
        applied.amount = Some(bid_for_closure.amount);
        applied.label = Some(label.clone());
        applied.bid_number = Some(bid_number);

        doc.value.amount = bid_for_closure.amount;

        let record = BidRecord {
            bidder_id: bid_for_closure.bidder_id.clone(),
            time: bid_for_closure.time,
            amount: bid_for_closure.amount,
            label,
            bid_number: Some(bid_number),
            owner: None,
            identification: None,
        };
        upsert_result(&mut doc.results, record);

        Ok((doc.stages[stage_index].clone(), doc.current_stage))
    })
    .await;

    let (stage, stage_index) = match result {
        Ok(pair) => pair,
        Err(GuardError::Inner(e)) => return Err(e.into()),
        Err(GuardError::NoDocument) => return Err(BidValidationError::WrongStage.into()),
        Err(GuardError::Store(conflict)) => {
            return Err(BidApplyError(conflict.into()).into());
        }
    };

    end_bid_stage(ctx, &bid, stage_index).await;
    Ok(stage)
}

/// Replace the existing result for `record.bidder_id`, or append it, then
/// re-sort descending by amount. `sort_by` is stable, so equal-amount bids
/// keep their relative insertion order (spec §8 sort-stability law).
fn upsert_result(results: &mut Vec<BidRecord>, record: BidRecord) {
    if let Some(existing) = results.iter_mut().find(|r| r.bidder_id == record.bidder_id) {
        *existing = record;
    } else {
        results.push(record);
    }
    results.sort_by(|a, b| b.amount.cmp(&a.amount));
}

/// Close out the round the bid was accepted into: record it in the audit
/// protocol, cancel every pending job, then rebuild and reinstall the
/// schedule around the bid's time (spec §4.5). Called from [`add_bid`] with
/// `ctx.lock` already held, so this never re-acquires it — the apply and
/// the reschedule below are one critical section.
async fn end_bid_stage(ctx: &Arc<Context>, bid: &BidInput, stage_index: i64) {
    let deadline = ctx.state.lock().await.deadline;

    {
        let mut state = ctx.state.lock().await;
        if let Some(protocol) = state.auction_protocol.as_mut() {
            crate::protocol::record_round_close(
                protocol,
                stage_index,
                bid.bidder_id.clone(),
                bid.amount,
                bid.time,
            );
        }
    }

    ctx.scheduler.remove_all_jobs();

    let bid = bid.clone();
    let inputs = StageInputs {
        value: payloads::Value { amount: bid.amount },
        minimal_step: {
            let state = ctx.state.lock().await;
            state
                .document
                .as_ref()
                .map(|d| d.minimal_step)
                .unwrap_or(payloads::MinimalStep { amount: rust_decimal::Decimal::ZERO })
        },
    };

    let (pause, main_round) = clock::prepare_auction_stages(bid.time, &inputs, deadline, ctx.sandbox_mode);

    let outcome: Result<(Option<Stage>, i64), GuardError<std::convert::Infallible>> =
        crate::context::with_document_locked(ctx, {
            let pause = pause.clone();
            let main_round = main_round.clone();
            move |doc| {
                doc.stages.push(pause);
                if let Some(main_round) = main_round.clone() {
                    doc.stages.push(main_round.clone());
                }
                doc.current_stage += 1;
                Ok((main_round, doc.current_stage))
            }
        })
        .await;

    let Ok((main_round, _current_stage)) = outcome else {
        tracing::error!("failed to rewrite schedule after bid; leaving scheduler idle");
        return;
    };

    install_post_bid_jobs(ctx, main_round, deadline);
}

fn install_post_bid_jobs(ctx: &Arc<Context>, main_round: Option<Stage>, deadline: Option<jiff::Timestamp>) {
    match main_round {
        Some(main_round) => {
            let round_end = clock::get_round_ending_time(main_round.start, clock::round_duration(), deadline);
            schedule_pause_end(ctx, main_round.start);
            schedule_auction_end(ctx, round_end);
        }
        None => {
            if let Some(deadline) = deadline {
                schedule_auction_end(ctx, deadline);
            }
        }
    }
}

fn schedule_pause_end(ctx: &Arc<Context>, run_at: jiff::Timestamp) {
    let ctx = Arc::clone(ctx);
    ctx.scheduler.add_job(scheduler::JOB_AUCTION_PAUSE, run_at, move || async move {
        crate::coordinator::on_pause_end(&ctx).await
    });
}

fn schedule_auction_end(ctx: &Arc<Context>, run_at: jiff::Timestamp) {
    let ctx = Arc::clone(ctx);
    ctx.scheduler.add_job(scheduler::JOB_AUCTION_END, run_at, move || async move {
        crate::coordinator::end_auction(&ctx).await
    });
}
