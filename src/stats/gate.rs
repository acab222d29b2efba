/// Decides whether enough time has passed to emit another report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateGate {
    /// `None` until the first check, which only primes the gate
    last_emit: Option<u64>,
}

impl RateGate {
    pub const fn new() -> Self {
        Self { last_emit: None }
    }

    /// `true` if a report should be emitted at `now`, in which case the gate
    /// restarts from `now`. The first call never passes.
    pub fn try_pass(&mut self, now: u64, period_secs: u64) -> bool {
        let Some(last) = self.last_emit else {
            self.last_emit = Some(now);
            return false;
        };
        if now.saturating_sub(last) < period_secs {
            return false;
        }
        self.last_emit = Some(now);
        true
    }

    pub fn last_emit(&self) -> Option<u64> {
        self.last_emit
    }
}
