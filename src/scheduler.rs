use embassy_time::{Duration, Instant};

/// Which ticks are due on a given poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub fast: bool,
    pub sample: bool,
}

/// Cooperative tick gating. The fast tick runs on every poll; the sampling
/// tick runs when a full sample period has elapsed since the last one.
pub struct Scheduler {
    sample_period: Duration,
    last_sample: Option<Instant>,
}

impl Scheduler {
    pub fn new(sample_period: Duration) -> Self {
        Self {
            sample_period,
            last_sample: None,
        }
    }

    pub fn poll(&mut self, now: Instant) -> Tick {
        let sample = match self.last_sample {
            None => true,
            Some(last) => now < last || now - last >= self.sample_period,
        };
        if sample {
            self.last_sample = Some(now);
        }
        Tick { fast: true, sample }
    }

    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    pub fn set_sample_period(&mut self, sample_period: Duration) {
        self.sample_period = sample_period;
    }

    /// Time until the next sampling tick is due.
    pub fn until_next_sample(&self, now: Instant) -> Duration {
        match self.last_sample {
            Some(last) if now >= last && now - last < self.sample_period => {
                self.sample_period - (now - last)
            }
            _ => Duration::from_ticks(0),
        }
    }
}
