//! Per-minute chart aggregation.

use std::collections::BTreeMap;

use keel_core::{MAX_WINDOW_MINUTES, MIN_WINDOW_MINUTES};

use crate::types::ChartEntry;

/// Clamp a chart window to the supported range.
pub fn clamp_window(offset_minutes: u64) -> u64 {
    offset_minutes.clamp(MIN_WINDOW_MINUTES, MAX_WINDOW_MINUTES)
}

/// Round unix seconds to the nearest minute; half a minute rounds up.
pub fn round_to_minute(secs: u64) -> u64 {
    (secs + 30) / 60 * 60
}

/// Sums samples per minute.
#[derive(Debug, Default)]
pub struct MinuteBuckets {
    sums: BTreeMap<u64, f64>,
}

impl MinuteBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, created_at: u64, value: f64) {
        *self.sums.entry(round_to_minute(created_at)).or_default() += value;
    }

    /// Time-ordered chart points.
    pub fn into_entries(self) -> Vec<ChartEntry> {
        self.sums
            .into_iter()
            .map(|(time, value)| ChartEntry { time, value })
            .collect()
    }
}

/// Turn cumulative totals into per-minute increases.
///
/// Each output point is stamped with the later minute of its pair. Negative
/// differences are counter resets and are dropped.
pub fn to_deltas(entries: &[ChartEntry]) -> Vec<ChartEntry> {
    entries
        .windows(2)
        .filter_map(|pair| {
            let delta = pair[1].value - pair[0].value;
            (delta >= 0.0).then_some(ChartEntry {
                time: pair[1].time,
                value: delta,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_clamped() {
        assert_eq!(clamp_window(0), 5);
        assert_eq!(clamp_window(60), 60);
        assert_eq!(clamp_window(1_000_000), 10_080);
    }

    #[test]
    fn minutes_round_to_nearest() {
        assert_eq!(round_to_minute(120), 120);
        assert_eq!(round_to_minute(149), 120);
        assert_eq!(round_to_minute(150), 180);
    }

    #[test]
    fn buckets_sum_per_minute_in_time_order() {
        let mut buckets = MinuteBuckets::new();
        buckets.add(185, 2.0);
        buckets.add(61, 1.0);
        buckets.add(178, 3.0);

        let entries = buckets.into_entries();
        assert_eq!(
            entries,
            vec![
                ChartEntry { time: 60, value: 1.0 },
                ChartEntry { time: 180, value: 5.0 },
            ]
        );
    }

    #[test]
    fn deltas_drop_resets() {
        let totals = [
            ChartEntry { time: 60, value: 100.0 },
            ChartEntry { time: 120, value: 150.0 },
            ChartEntry { time: 180, value: 20.0 },
            ChartEntry { time: 240, value: 50.0 },
        ];
        assert_eq!(
            to_deltas(&totals),
            vec![
                ChartEntry { time: 120, value: 50.0 },
                ChartEntry { time: 240, value: 30.0 },
            ]
        );
        assert!(to_deltas(&totals[..1]).is_empty());
    }
}
