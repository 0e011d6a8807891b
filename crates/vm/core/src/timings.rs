#![allow(
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    clippy::type_complexity
)]

use std::{
    sync::{LazyLock, Mutex},
    time::Duration,
};

use rustc_hash::FxHashMap;

use crate::opcodes::Opcode;

#[derive(Default, Debug)]
pub struct OpcodeTimings {
    totals: FxHashMap<Opcode, Duration>,
    counts: FxHashMap<Opcode, u64>,
    methods: usize,
}

impl OpcodeTimings {
    pub fn update(&mut self, opcode: Opcode, time: Duration) {
        *self.totals.entry(opcode).or_default() += time;
        *self.counts.entry(opcode).or_default() += 1;
    }

    /// Average, total and count per opcode, slowest average first.
    pub fn info(&self) -> (Vec<(Opcode, Duration, Duration, u64)>, usize) {
        let mut average: Vec<(Opcode, Duration, Duration, u64)> = self
            .totals
            .iter()
            .filter_map(|(opcode, total)| {
                let count = *self.counts.get(opcode).unwrap_or(&0);
                (count > 0).then(|| {
                    (
                        *opcode,
                        Duration::from_secs_f64(total.as_secs_f64() / count as f64),
                        *total,
                        count,
                    )
                })
            })
            .collect();
        average.sort_by(|a, b| b.1.cmp(&a.1));
        (average, self.methods)
    }

    pub fn info_pretty(&self) -> String {
        let (avg_timings_sorted, methods_seen) = self.info();
        let pretty_avg = format_opcode_timings(&avg_timings_sorted);
        let total_accumulated = self
            .totals
            .values()
            .fold(Duration::from_secs(0), |acc, dur| acc + *dur);
        format!(
            "[PERF] opcode timings (methods={}, total={:?}, sorted desc):\n{}",
            methods_seen, total_accumulated, pretty_avg
        )
    }

    pub fn inc_method_count(&mut self) {
        self.methods += 1;
    }

    pub fn reset(&mut self) {
        self.totals.clear();
        self.counts.clear();
        self.methods = 0;
    }

    pub fn raw_totals(&self) -> &FxHashMap<Opcode, Duration> {
        &self.totals
    }

    pub fn raw_counts(&self) -> &FxHashMap<Opcode, u64> {
        &self.counts
    }
}

pub static OPCODE_TIMINGS: LazyLock<Mutex<OpcodeTimings>> =
    LazyLock::new(|| Mutex::new(OpcodeTimings::default()));

/// Record one execution of `opcode`. The lock is taken per instruction
/// because handlers re-enter the dispatch loop for nested calls.
pub(crate) fn record(opcode: Opcode, time: Duration) {
    #[allow(clippy::expect_used)]
    let mut timings = OPCODE_TIMINGS.lock().expect("poison");
    timings.update(opcode, time);
}

/// Record one method or block activation.
pub(crate) fn record_activation() {
    #[allow(clippy::expect_used)]
    let mut timings = OPCODE_TIMINGS.lock().expect("poison");
    timings.inc_method_count();
}

fn format_opcode_timings(rows: &[(Opcode, Duration, Duration, u64)]) -> String {
    rows.iter()
        .map(|(opcode, average, total, count)| {
            format!(
                "{:<28} avg={:>12?} total={:>12?} count={:>10}",
                opcode.to_string(),
                average,
                total,
                count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_sorts_by_average() {
        let mut timings = OpcodeTimings::default();
        timings.update(Opcode::Add, Duration::from_micros(2));
        timings.update(Opcode::Add, Duration::from_micros(4));
        timings.update(Opcode::SendStack, Duration::from_micros(30));
        timings.inc_method_count();

        let (rows, methods) = timings.info();
        assert_eq!(methods, 1);
        assert_eq!(rows[0].0, Opcode::SendStack);
        assert_eq!(rows[1], (Opcode::Add, Duration::from_micros(3), Duration::from_micros(6), 2));
        assert!(timings.info_pretty().contains("send_stack"));

        timings.reset();
        assert!(timings.raw_totals().is_empty());
        assert!(timings.raw_counts().is_empty());
    }
}
