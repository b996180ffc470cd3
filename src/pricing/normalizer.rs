use chrono::{DateTime, Duration, FixedOffset};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::domain::{PriceSlot, RawPriceEntry, MAX_HORIZON_SLOTS, SLOT_MINUTES};
use crate::error::ScheduleFault;

/// Entries longer than this are hourly and split into four quarter-hour slots.
const HOURLY_MIN_MINUTES: u32 = 45;
/// Accepted tolerance around a quarter-hour entry.
const QUARTER_MIN_MINUTES: u32 = 10;
const QUARTER_MAX_MINUTES: u32 = 20;

/// Uniform 15-minute slots plus the fault that truncated them, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedForecast {
    pub slots: Vec<PriceSlot>,
    pub fault: Option<ScheduleFault>,
}

impl NormalizedForecast {
    /// Start of the first slot after the usable horizon.
    pub fn horizon_end(&self) -> Option<DateTime<FixedOffset>> {
        self.slots.last().map(|s| s.end)
    }
}

/// Convert a mixed hourly/quarter-hourly price forecast into contiguous
/// 15-minute slots starting at the slot that contains `now`.
///
/// Hourly entries are split into four slots at the same price. On the first
/// gap, overlap, unsupported duration or invalid price the usable prefix is
/// returned together with the fault; nothing after it is trusted.
pub fn normalize(entries: &[RawPriceEntry], now: DateTime<FixedOffset>) -> NormalizedForecast {
    let mut sorted: Vec<&RawPriceEntry> = entries
        .iter()
        .filter(|e| e.start + Duration::minutes(e.duration_minutes as i64) > now)
        .collect();
    sorted.sort_by_key(|e| e.start);

    let mut fault = None;
    let mut slots = Vec::with_capacity(sorted.len() * 4);
    for entry in sorted {
        if !entry.price.is_finite() {
            fault = Some(ScheduleFault::InvalidPrice { at: entry.start });
            break;
        }
        match split_entry(entry) {
            Some(parts) => slots.extend(parts),
            None => {
                fault = Some(ScheduleFault::UnsupportedDuration {
                    at: entry.start,
                    duration_minutes: entry.duration_minutes,
                });
                break;
            }
        }
    }

    slots.retain(|s| s.end > now);

    // Earlier tiling faults take precedence over a later entry fault
    if let Some(i) = slots
        .iter()
        .tuple_windows()
        .position(|(a, b)| a.end != b.start)
    {
        let (prev, next) = (&slots[i], &slots[i + 1]);
        fault = Some(if next.start > prev.end {
            ScheduleFault::DataGap {
                at: prev.end,
                resumes_at: next.start,
            }
        } else {
            ScheduleFault::DataOverlap { at: next.start }
        });
        slots.truncate(i + 1);
    }

    if slots.len() > MAX_HORIZON_SLOTS {
        debug!(
            dropped = slots.len() - MAX_HORIZON_SLOTS,
            "Truncating forecast to maximum horizon"
        );
        slots.truncate(MAX_HORIZON_SLOTS);
    }

    if slots.is_empty() && fault.is_none() {
        fault = Some(ScheduleFault::EmptyHorizon);
    }

    if let Some(f) = &fault {
        warn!(fault = %f, usable_slots = slots.len(), "Price forecast truncated");
    }

    NormalizedForecast { slots, fault }
}

fn split_entry(entry: &RawPriceEntry) -> Option<Vec<PriceSlot>> {
    let quarter = Duration::minutes(SLOT_MINUTES);
    match entry.duration_minutes {
        d if d > HOURLY_MIN_MINUTES => Some(
            (0..4)
                .map(|i| {
                    let start = entry.start + quarter * i;
                    PriceSlot::new(start, start + quarter, entry.price)
                })
                .collect(),
        ),
        QUARTER_MIN_MINUTES..=QUARTER_MAX_MINUTES => Some(vec![PriceSlot::new(
            entry.start,
            entry.start + quarter,
            entry.price,
        )]),
        _ => None,
    }
}
