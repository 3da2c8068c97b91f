//! Request admission controls.
//!
//! Everything that can refuse a request before payment enforcement runs:
//! tiered rate limiting, per-path deadlines, and the dev bypass gate.

pub mod dev_bypass;
pub mod rate_limit;
pub mod timeout;

pub use dev_bypass::dev_bypass_middleware;
pub use rate_limit::{RateLimiter, RateTier};
pub use timeout::timeout_middleware;
