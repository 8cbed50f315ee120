//! Abuse-resistant limiters in front of the authentication flows.

mod quota;
mod throttle;

pub use quota::QuotaGuard;
pub use throttle::ThrottleGuard;
