//! Bounded linear search over bill numbers.
//!
//! congress.gov listings are sorted by update date, not by introduction, so the
//! freshest bills are easiest to find by probing numbers just above the highest
//! one already recorded. `find_new_in_range` turns that into a stream of typed
//! outcomes over any [`BillSource`]; a listing-based strategy can replace it
//! without touching the scan.

use async_stream::stream;
use futures::Stream;

use crate::bill::{BillKey, BillRecord, ChamberType};
use crate::error::FetchError;
use crate::ingest::types::BillSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub congress: u32,
    pub chamber: ChamberType,
    /// First number probed.
    pub start: u32,
    /// Exclusive upper bound.
    pub stop: u32,
    pub step: u32,
    /// Stop after this many NotFound in a row (0 = probe the whole range).
    pub max_consecutive_misses: u32,
}

impl RangeSpec {
    /// Window starting just past `resolved_through` (or at `first` when nothing is
    /// resolved yet). The window always reaches `span` numbers past the high-water
    /// mark, so a number that keeps failing cannot pin it below the frontier.
    pub fn above(
        congress: u32,
        chamber: ChamberType,
        resolved_through: Option<u32>,
        high_water: Option<u32>,
        first: u32,
        span: u32,
    ) -> Self {
        let start = resolved_through.map_or(first.max(1), |n| n.saturating_add(1));
        let frontier = high_water.map_or(start, |n| n.saturating_add(1)).max(start);
        Self {
            congress,
            chamber,
            start,
            stop: frontier.saturating_add(span.max(1)),
            step: 1,
            max_consecutive_misses: 0,
        }
    }

    pub fn with_misses(mut self, max_consecutive_misses: u32) -> Self {
        self.max_consecutive_misses = max_consecutive_misses;
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }
}

#[derive(Debug)]
pub enum Probe {
    Found(BillRecord),
    NotFound(BillKey),
    /// Transient or malformed after the source's own retries.
    Failed(BillKey, FetchError),
}

/// How one probed number ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found,
    NotFound,
    /// Detail arrived but could not be parsed; skipped for good.
    Malformed,
    /// Transient failure; the number has to be probed again.
    Failed,
}

/// Everything one range pass learned, in probe order.
#[derive(Debug, Default)]
pub struct RangeScan {
    pub found: Vec<BillRecord>,
    pub outcomes: Vec<(u32, ProbeOutcome)>,
}

impl RangeScan {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ProbeOutcome::Failed | ProbeOutcome::Malformed))
            .count()
    }

    /// Highest number `n` such that every probe up to `n` is settled: found and
    /// accepted by `settled`, not found, or malformed. Trailing not-found numbers
    /// are excluded since they may be assigned later.
    pub fn resolved_through(&self, settled: impl Fn(u32) -> bool) -> Option<u32> {
        let mut through = None;
        for &(n, outcome) in &self.outcomes {
            match outcome {
                ProbeOutcome::NotFound => {}
                ProbeOutcome::Malformed => through = Some(n),
                ProbeOutcome::Found if settled(n) => through = Some(n),
                ProbeOutcome::Found | ProbeOutcome::Failed => break,
            }
        }
        through
    }
}

/// Probes `spec.start..spec.stop` in order, one detail fetch per number.
pub fn find_new_in_range<'a>(
    source: &'a dyn BillSource,
    spec: RangeSpec,
) -> impl Stream<Item = Probe> + Send + 'a {
    stream! {
        let step = spec.step.max(1);
        let mut misses = 0u32;
        let mut n = spec.start.max(1);
        while n < spec.stop {
            let key = match BillKey::new(spec.congress, spec.chamber.clone(), n) {
                Ok(k) => k,
                Err(e) => {
                    tracing::debug!(error = %e, "range probe skipped invalid key");
                    break;
                }
            };
            match source.fetch_detail(&key).await {
                Ok(Some(rec)) => {
                    misses = 0;
                    yield Probe::Found(rec);
                }
                Ok(None) => {
                    misses += 1;
                    yield Probe::NotFound(key);
                    if spec.max_consecutive_misses > 0 && misses >= spec.max_consecutive_misses {
                        tracing::debug!(
                            chamber = %spec.chamber,
                            last = n,
                            misses,
                            "range probe reached end of assigned numbers"
                        );
                        break;
                    }
                }
                Err(e) => yield Probe::Failed(key, e),
            }
            n = match n.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(outcomes: &[(u32, ProbeOutcome)]) -> RangeScan {
        RangeScan {
            found: Vec::new(),
            outcomes: outcomes.to_vec(),
        }
    }

    #[test]
    fn window_starts_past_resolved_numbers_and_reaches_frontier() {
        let fresh = RangeSpec::above(119, ChamberType::HR, None, None, 1, 50);
        assert_eq!((fresh.start, fresh.stop), (1, 51));

        let stuck = RangeSpec::above(119, ChamberType::HR, Some(9), Some(120), 1, 50);
        assert_eq!((stuck.start, stuck.stop), (10, 171));

        let caught_up = RangeSpec::above(119, ChamberType::HR, Some(120), Some(120), 1, 50);
        assert_eq!((caught_up.start, caught_up.stop), (121, 171));
    }

    #[test]
    fn resolution_stops_at_first_failure() {
        use ProbeOutcome::*;
        let s = scan(&[(1, Failed), (2, Found), (3, NotFound)]);
        assert_eq!(s.resolved_through(|_| true), None);
        assert_eq!(s.failed(), 1);

        let s = scan(&[(1, Found), (2, NotFound), (3, Found), (4, Failed), (5, Found)]);
        assert_eq!(s.resolved_through(|_| true), Some(3));
        assert_eq!(s.resolved_through(|n| n != 3), Some(1));
    }

    #[test]
    fn trailing_misses_stay_unresolved() {
        use ProbeOutcome::*;
        let s = scan(&[(7, Found), (8, NotFound), (9, NotFound)]);
        assert_eq!(s.resolved_through(|_| true), Some(7));
        let s = scan(&[(7, Malformed), (8, NotFound)]);
        assert_eq!(s.resolved_through(|_| false), Some(7));
    }
}
