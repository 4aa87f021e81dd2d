//! Randomized multi-day schedule generation.
//!
//! Pure: all randomness comes from the injected [`Rng`], so a seeded
//! `StdRng` reproduces sequences exactly in tests.

use crate::config::SchedulePolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Milliseconds in one day.
pub const DAY_MS: u64 = 86_400_000;

/// Milliseconds in one hour.
const HOUR_MS: f64 = 3_600_000.0;

/// Each day's first session lands within this window after the day starts.
const DAY_START_WINDOW_HOURS: f64 = 6.0;

/// One registered session slot: a unique timer name plus its fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Unique timer name, derived from the run id, slot index, and fire time.
    pub timer_name: String,
    /// Fire time, epoch milliseconds.
    pub fires_at: u64,
}

/// Generate session fire times for a whole campaign.
///
/// For each day: draw a session count in `[min, max]`, place the first
/// session within the day's start window, then advance by a uniform gap in
/// `[min_gap_hours, max_gap_hours]` per session. The cursor never moves
/// backwards, so the returned sequence is non-decreasing even when one
/// day's sessions spill past the next day's jittered start.
pub fn generate_schedule<R: Rng + ?Sized>(
    start_ms: u64,
    policy: &SchedulePolicy,
    rng: &mut R,
) -> Vec<u64> {
    let mut times = Vec::new();
    let mut floor = start_ms;

    for day in 0..u64::from(policy.days) {
        let count =
            rng.gen_range(policy.min_sessions_per_day..=policy.max_sessions_per_day);
        let jitter = hours_to_ms(rng.gen_range(0.0..DAY_START_WINDOW_HOURS));
        let mut cursor = (start_ms + day * DAY_MS + jitter).max(floor);

        for _ in 0..count {
            times.push(cursor);
            floor = cursor;
            let gap = rng.gen_range(policy.min_gap_hours..=policy.max_gap_hours);
            cursor += hours_to_ms(gap);
        }
    }

    times
}

/// Derive uniquely named schedule entries for a run's fire times.
#[must_use]
pub fn build_entries(run_id: &str, times: &[u64]) -> Vec<ScheduleEntry> {
    times
        .iter()
        .enumerate()
        .map(|(index, fires_at)| ScheduleEntry {
            timer_name: format!("{run_id}:{index}:{fires_at}"),
            fires_at: *fires_at,
        })
        .collect()
}

/// The terminal timer entry for a run: fires once the whole campaign
/// window (plus buffer) has elapsed.
#[must_use]
pub fn end_entry(run_id: &str, start_ms: u64, policy: &SchedulePolicy) -> ScheduleEntry {
    let fires_at =
        start_ms + u64::from(policy.days) * DAY_MS + hours_to_ms(policy.end_buffer_hours);
    ScheduleEntry {
        timer_name: format!("{run_id}:end"),
        fires_at,
    }
}

fn hours_to_ms(hours: f64) -> u64 {
    (hours * HOUR_MS) as u64
}
