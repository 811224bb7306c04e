//! Daily Settlement Window
//!
//! This module is the single source of truth for the noon settlement window.
//! All upkeep gating MUST use `is_noon_window` so signal checks and the
//! trigger's own re-validation can never disagree on the boundary.
//!
//! # Canonical Rule
//!
//! For a timestamp `t` and a per-deployment offset `o` (a signed
//! timezone-like correction, may be negative):
//!
//! - `local = t + o`, reduced modulo one day with `rem_euclid`
//! - the window is open iff `hour == 12 && minute <= 10`
//!
//! i.e. 12:00:00 through 12:10:59 of the adjusted day. The end bound is
//! inclusive of the whole tenth minute. Membership depends only on
//! `(t + o) mod 86400`; the gate is pure and carries no call history.

use crate::engine::clock::{UnixSeconds, SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_MIN};

/// Hour of the adjusted day the window is anchored at.
pub const NOON_HOUR: i64 = 12;
/// Last minute-of-hour inside the window (inclusive).
pub const NOON_WINDOW_LAST_MINUTE: i64 = 10;

/// First second-of-day inside the window (12:00:00).
pub const NOON_WINDOW_START_SOD: i64 = NOON_HOUR * SECS_PER_HOUR;
/// First second-of-day past the window (12:11:00).
pub const NOON_WINDOW_END_SOD: i64 =
    NOON_HOUR * SECS_PER_HOUR + (NOON_WINDOW_LAST_MINUTE + 1) * SECS_PER_MIN;

/// Second-of-day for a timestamp after applying the deployment offset.
///
/// `rem_euclid` keeps the result in [0, 86400) even when `offset` is
/// negative and larger than the time-of-day component.
#[inline]
pub fn adjusted_second_of_day(now: UnixSeconds, offset_seconds: i64) -> i64 {
    (now + offset_seconds).rem_euclid(SECS_PER_DAY)
}

/// Is `now` (adjusted by the deployment offset) inside the daily
/// settlement window?
#[inline]
pub fn is_noon_window(now: UnixSeconds, offset_seconds: i64) -> bool {
    let sod = adjusted_second_of_day(now, offset_seconds);
    let hour = sod / SECS_PER_HOUR;
    let minute = (sod / SECS_PER_MIN) % 60;
    hour == NOON_HOUR && minute <= NOON_WINDOW_LAST_MINUTE
}
