// MIT License - Copyright (c) 2026 Peter Wright
// Outbound rate limiting

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Maximum sends per sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuotas {
    pub per_second: usize,
    pub per_minute: usize,
    pub per_hour: usize,
}

impl Default for RateQuotas {
    fn default() -> Self {
        Self {
            per_second: 10,
            per_minute: 300,
            per_hour: 10_000,
        }
    }
}

/// Proof that a send was admitted. Hand it back with
/// [`RateLimiter::refund`] if the send never reached the broker.
#[derive(Debug)]
#[must_use]
pub struct Admission {
    at: Instant,
}

#[derive(Debug, Default)]
struct Windows {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl Windows {
    fn evict(&mut self, now: Instant) {
        for (window, span) in [
            (&mut self.second, SECOND),
            (&mut self.minute, MINUTE),
            (&mut self.hour, HOUR),
        ] {
            while window.front().is_some_and(|t| now.duration_since(*t) >= span) {
                window.pop_front();
            }
        }
    }

    fn fits(&self, q: &RateQuotas) -> bool {
        self.second.len() < q.per_second
            && self.minute.len() < q.per_minute
            && self.hour.len() < q.per_hour
    }
}

/// Sliding-window limiter over three horizons (1 s, 60 s, 3600 s).
///
/// Admission is check-and-record in one step: a send is only counted when
/// it fits all three windows.
#[derive(Debug)]
pub struct RateLimiter {
    quotas: RateQuotas,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(quotas: RateQuotas) -> Self {
        Self {
            quotas,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn quotas(&self) -> RateQuotas {
        self.quotas
    }

    pub fn try_admit(&self) -> Option<Admission> {
        self.try_admit_at(Instant::now())
    }

    pub fn try_admit_at(&self, now: Instant) -> Option<Admission> {
        let mut w = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        w.evict(now);
        if !w.fits(&self.quotas) {
            return None;
        }
        w.second.push_back(now);
        w.minute.push_back(now);
        w.hour.push_back(now);
        Some(Admission { at: now })
    }

    /// Whether a send would be admitted now, without recording one.
    pub fn can_send(&self) -> bool {
        let mut w = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        w.evict(Instant::now());
        w.fits(&self.quotas)
    }

    /// Forget an admitted send that did not go out.
    pub fn refund(&self, admission: Admission) {
        let mut guard = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let w = &mut *guard;
        for window in [&mut w.second, &mut w.minute, &mut w.hour] {
            if let Some(pos) = window.iter().rposition(|t| *t == admission.at) {
                window.remove(pos);
            }
        }
    }

    /// Sends currently counted in the (second, minute, hour) windows.
    pub fn usage(&self) -> (usize, usize, usize) {
        let mut w = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        w.evict(Instant::now());
        (w.second.len(), w.minute.len(), w.hour.len())
    }
}
