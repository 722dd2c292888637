use std::time::{Duration, Instant};

/// Tracks the politeness state of a domain
///
/// One `DomainState` exists per host. It backs the single-flight token and the
/// minimum inter-request delay enforced by the politeness gate.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of requests started against this domain
    pub request_count: u32,

    /// When the last request to this domain started
    pub last_request_time: Option<Instant>,

    /// Whether a fetch to this domain is currently in flight
    pub in_flight: bool,

    /// Cool-down imposed after the site answered HTTP 429
    pub blocked_until: Option<Instant>,
}

impl DomainState {
    /// Creates a new DomainState with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a request can start now
    ///
    /// This method enforces:
    /// - Single flight (no other request in flight)
    /// - Site-imposed cool-down (HTTP 429)
    /// - Minimum time between requests to the same domain
    pub fn can_request(&self, min_delay: Duration, now: Instant) -> bool {
        !self.in_flight
            && !self.is_blocked(now)
            && self.time_until_next_request(min_delay, now).is_none()
    }

    /// Records that a request started; takes the single-flight token
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
        self.in_flight = true;
    }

    /// Releases the single-flight token
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    /// Puts the domain into a cool-down of `duration`
    pub fn block_for(&mut self, duration: Duration, now: Instant) {
        let until = now + duration;
        // Never shorten an existing cool-down
        self.blocked_until = Some(match self.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Returns the remaining cool-down, if the domain is blocked at `now`
    pub fn blocked_for(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_for(now).is_some()
    }

    /// Calculates the time until the minimum delay has elapsed
    ///
    /// Returns None if the delay has already elapsed.
    pub fn time_until_next_request(&self, min_delay: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < min_delay {
            Some(min_delay - elapsed)
        } else {
            None
        }
    }
}
