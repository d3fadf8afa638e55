//! Per-user request rate limiting

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { wait: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Decides whether a user may make another request now
pub trait RateLimiter: Send + Sync {
    fn check(&self, user_id: i64) -> RateDecision;

    /// Drop state of users whose quota has fully refilled
    fn prune(&self) {}
}

/// Keyed GCRA limiter: `max_requests` burst, refilled evenly over the window
pub struct GovernorRateLimiter {
    limiter: GovernorLimiter<i64, DefaultKeyedStateStore<i64>, DefaultClock>,
    clock: DefaultClock,
}

impl GovernorRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        let burst = NonZeroU32::new(config.max_requests)
            .ok_or_else(|| Error::Config("rate_limit.max_requests must be positive".into()))?;
        let period = Duration::from_secs(config.window_secs) / burst.get();
        let quota = Quota::with_period(period)
            .ok_or_else(|| Error::Config("rate_limit.window_secs must be positive".into()))?
            .allow_burst(burst);

        Ok(Self {
            limiter: GovernorLimiter::keyed(quota),
            clock: DefaultClock::default(),
        })
    }
}

impl RateLimiter for GovernorRateLimiter {
    fn check(&self, user_id: i64) -> RateDecision {
        match self.limiter.check_key(&user_id) {
            Ok(_) => RateDecision::Allowed,
            Err(not_until) => RateDecision::Limited {
                wait: not_until.wait_time_from(self.clock.now()),
            },
        }
    }

    fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

impl GovernorRateLimiter {
    /// Users currently tracked
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

/// Limiter that never limits, for tools and tests
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn check(&self, _user_id: i64) -> RateDecision {
        RateDecision::Allowed
    }
}
