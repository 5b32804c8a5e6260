//! Stage timing and deadline arithmetic (component C1).
//!
//! Everything here is a pure function of its arguments — no I/O, no shared
//! state — so the scheduling rules can be unit tested without spinning up
//! a scheduler or a document store.

use jiff::{Span, Timestamp, Zoned, tz::TimeZone};
use rust_decimal::Decimal;

use payloads::{MinimalStep, Stage, Value};

/// Time a bidding round is preceded by before it opens.
pub fn pause_duration() -> Span {
    Span::new().seconds(120)
}

/// Maximum time a main round stays open if nobody bids.
pub fn round_duration() -> Span {
    Span::new().seconds(120)
}

/// Default hour-of-day (local time) after which no new main round may
/// start, when the deadline is computed absolutely rather than relative
/// to the auction's start date.
pub const DEADLINE_HOUR: i8 = 18;

/// Total wall-clock budget given to a sandbox/fast-forward auction when the
/// deadline is computed relative to the start date instead of absolute.
pub fn sandbox_auction_duration() -> Span {
    Span::new().seconds(3600)
}

/// Minimal slice of an [`payloads::AuctionDocument`] the stage-planning
/// functions need: the current value and step. Bid-triggered replanning
/// builds one of these from the bid amount rather than the live document.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs {
    pub value: Value,
    pub minimal_step: MinimalStep,
}

/// Round a decimal to `places` fractional digits using banker's rounding
/// (round-half-to-even), matching the source's use of Python's
/// `Decimal.quantize` (which defaults to `ROUND_HALF_EVEN`).
pub fn round_half_even(amount: Decimal, places: u32) -> Decimal {
    amount.round_dp_with_strategy(
        places,
        rust_decimal::RoundingStrategy::MidpointNearestEven,
    )
}

/// Compute the next valid bid floor: current value plus the minimal step,
/// rounded to cents.
pub fn next_round_amount(inputs: &StageInputs) -> Decimal {
    round_half_even(inputs.value.amount + inputs.minimal_step.amount, 2)
}

/// Build the pause/main-round pair that opens at `stage_start`.
///
/// Always emits a pause. Emits a main round alongside it unless the round
/// would have no time left to run before `deadline` — in that case the
/// second element is `None` and the caller (planning or a bid-triggered
/// replan) must treat this as "auction can't fit another round".
///
/// `fast_forward` exists for symmetry with the source; sandbox auctions use
/// the same [`pause_duration`]/[`round_duration`] today — collapsed
/// wall-clock waits come from the scheduler firing against mocked time, not
/// from different durations here.
pub fn prepare_auction_stages(
    stage_start: Timestamp,
    inputs: &StageInputs,
    deadline: Option<Timestamp>,
    _fast_forward: bool,
) -> (Stage, Option<Stage>) {
    let pause = Stage::pause(stage_start);

    let main_start = stage_start + pause_duration();
    if let Some(deadline) = deadline {
        if main_start >= deadline {
            return (pause, None);
        }
    }

    let planned_end = get_round_ending_time(main_start, round_duration(), deadline);
    let main_round = Stage {
        kind: payloads::StageKind::MainRound,
        start: main_start,
        planned_end: Some(planned_end),
        amount: Some(next_round_amount(inputs)),
        time: None,
        bidder_id: None,
        label: None,
        bid_number: None,
    };

    (pause, Some(main_round))
}

/// `min(start + duration, deadline)`, or `start + duration` with no deadline.
pub fn get_round_ending_time(start: Timestamp, duration: Span, deadline: Option<Timestamp>) -> Timestamp {
    let natural_end = start + duration;
    match deadline {
        Some(d) if d < natural_end => d,
        _ => natural_end,
    }
}

/// Reset `date` to `hour:minute:second` on the same calendar day, in the
/// same timezone, carrying any minute/second overflow into the hour
/// (modulo 24) the way the source's `set_specific_time` does.
///
/// `set_specific_hour` (the source's other variant, which truncates
/// instead of wrapping) is deliberately not reproduced — the spec picks
/// `set_specific_time` for all deadline computations.
pub fn set_specific_time(date: Timestamp, tz: &TimeZone, hour: i64, minute: i64, second: i64) -> Timestamp {
    let minute = minute + second.div_euclid(60);
    let second = second.rem_euclid(60);
    let hour = hour + minute.div_euclid(60);
    let minute = minute.rem_euclid(60);
    let hour = hour.rem_euclid(24);

    let zoned: Zoned = date.to_zoned(tz.clone());
    let replaced = zoned
        .with()
        .hour(hour as i8)
        .minute(minute as i8)
        .second(second as i8)
        .subsec_nanosecond(0)
        .build()
        .expect("hour/minute/second are already normalized into valid ranges");
    replaced.timestamp()
}

/// Deadline computed as an absolute wall-clock time on the auction's start
/// date, via [`DEADLINE_HOUR`] (or a configured override).
pub fn absolute_deadline(start_date: Timestamp, tz: &TimeZone, deadline_hour: i8) -> Timestamp {
    set_specific_time(start_date, tz, deadline_hour as i64, 0, 0)
}

/// Deadline computed relative to the auction's start date, used for
/// sandbox/fast-forward auctions with `submissionMethodDetails == "quick"`.
/// Returns the deadline along with the hour/minute/second it lands on, so
/// the caller can keep the configured deadline-time-of-day consistent with
/// it (the source re-derives `deadline_time` from this for exactly that
/// reason).
pub fn relative_deadline(start_date: Timestamp, duration: Span, tz: &TimeZone) -> (Timestamp, (i8, i8, i8)) {
    let deadline = start_date + duration;
    let zoned = deadline.to_zoned(tz.clone());
    (deadline, (zoned.hour(), zoned.minute(), zoned.second()))
}
