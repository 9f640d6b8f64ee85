// src/notify/antiflutter.rs
use chrono::{DateTime, Utc};

use crate::bill::BillRecord;

/// Posting cooldown: at most one thread per aligned window
/// (`floor(unix_ts / window)`), so a 3h window posts at most once in 00:00-03:00,
/// once in 03:00-06:00, and so on.
/// - First post always allowed.
/// - Batches arriving inside the window are held and merged into the next thread.
/// - The window is only consumed via `record_post` after something went out.
#[derive(Debug, Clone, Default)]
pub struct PostCooldown {
    window_secs: i64,
    last_post_ts: Option<DateTime<Utc>>,
    pending: Vec<BillRecord>,
}

impl PostCooldown {
    /// `cooldown_secs` <= 0 disables the gate.
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            window_secs: cooldown_secs.max(0),
            last_post_ts: None,
            pending: Vec::new(),
        }
    }

    fn cycle(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.window_secs)
    }

    /// May a thread go out at `now`? Does NOT mutate state.
    pub fn should_post(&self, now: DateTime<Utc>) -> bool {
        match self.last_post_ts {
            None => true,
            Some(_) if self.window_secs == 0 => true,
            Some(last) => self.cycle(now) > self.cycle(last),
        }
    }

    /// Queues `batch`; returns everything queued when a post is allowed.
    pub fn admit(&mut self, batch: Vec<BillRecord>, now: DateTime<Utc>) -> Option<Vec<BillRecord>> {
        for rec in batch {
            if !self.pending.iter().any(|p| p.key == rec.key) {
                self.pending.push(rec);
            }
        }
        if !self.should_post(now) {
            return None;
        }
        let mut out = std::mem::take(&mut self.pending);
        crate::scan::sort_batch(&mut out);
        Some(out)
    }

    pub fn record_post(&mut self, now: DateTime<Utc>) {
        self.last_post_ts = Some(now);
    }

    /// Puts bills back in front of the queue after a failed thread.
    pub fn restore(&mut self, bills: Vec<BillRecord>) {
        let later = std::mem::replace(&mut self.pending, bills);
        for rec in later {
            if !self.pending.iter().any(|p| p.key == rec.key) {
                self.pending.push(rec);
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_post(&self) -> Option<DateTime<Utc>> {
        self.last_post_ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::{BillKey, ChamberType};
    use chrono::TimeZone;

    fn bill(n: u32) -> BillRecord {
        BillRecord {
            key: BillKey::new(119, ChamberType::HR, n).unwrap(),
            title: format!("bill {n}"),
            sponsor: None,
            summary: None,
            introduced_date: None,
            latest_action: None,
        }
    }

    #[test]
    fn first_post_passes() {
        let cd = PostCooldown::new(10_800);
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        assert!(cd.should_post(now));
    }

    #[test]
    fn inside_window_is_held_and_merged() {
        let mut cd = PostCooldown::new(10_800);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 10, 0).unwrap();
        assert_eq!(cd.admit(vec![bill(1)], t0).unwrap().len(), 1);
        cd.record_post(t0);

        let t1 = Utc.with_ymd_and_hms(2025, 9, 6, 11, 0, 0).unwrap();
        assert!(cd.admit(vec![bill(2)], t1).is_none());
        assert_eq!(cd.pending_len(), 1);

        // 12:00 starts the next 3h window.
        let t2 = Utc.with_ymd_and_hms(2025, 9, 6, 12, 0, 0).unwrap();
        let out = cd.admit(vec![bill(3), bill(2)], t2).unwrap();
        let numbers: Vec<u32> = out.iter().map(|b| b.key.number()).collect();
        assert_eq!(numbers, vec![3, 2]);
        assert_eq!(cd.pending_len(), 0);
    }

    #[test]
    fn restore_keeps_failed_bills_first() {
        let mut cd = PostCooldown::new(0);
        cd.pending = vec![bill(5)];
        cd.restore(vec![bill(7), bill(5)]);
        let numbers: Vec<u32> = cd.pending.iter().map(|b| b.key.number()).collect();
        assert_eq!(numbers, vec![7, 5]);
    }
}
