//! Per-connection IP filtering: the static CIDR blacklist first, then the
//! sliding-window rate limiter.
//!
//! This used to be an axum `from_fn` middleware, but a middleware only
//! ever sees a connection *after* a full HTTP request has already been
//! read off the socket — by then, answering with an HTTP error is the
//! best a denied peer can be given, which is weaker than refusing the
//! connection outright. `IpFilter::allow` is instead consulted by
//! `crate::accept::FilteringListener` at accept time, before axum is
//! involved at all, so a denied peer's connection is simply dropped.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use supernode_runtime::{Blacklist, Decision, RateLimiter};

#[derive(Clone)]
pub struct IpFilter {
    pub blacklist: Arc<Blacklist>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl IpFilter {
    /// `false` means the connection must be refused outright: a
    /// blacklisted IPv4 peer, or any peer currently over the rate limit.
    /// IPv6 peers bypass the IPv4-only CIDR blacklist but still pass
    /// through rate limiting, keyed on the full address.
    pub fn allow(&self, ip: IpAddr, now: Instant) -> bool {
        if let IpAddr::V4(ipv4) = ip {
            if !self.blacklist.is_allowed(ipv4) {
                return false;
            }
        }
        matches!(self.rate_limiter.check(ip, now), Decision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supernode_runtime::RateLimiterConfig;

    fn generous_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimiterConfig { requests_per_sec: 1000.0, window_size_sec: 1.0, ban_ip_sec: 60 }))
    }

    #[test]
    fn allowed_ip_is_allowed() {
        let filter = IpFilter { blacklist: Arc::new(Blacklist::new(true)), rate_limiter: generous_limiter() };
        assert!(filter.allow("203.0.113.1".parse().unwrap(), Instant::now()));
    }

    #[test]
    fn blacklisted_ip_is_refused() {
        let mut blacklist = Blacklist::new(true);
        blacklist.insert("203.0.113.0".parse().unwrap(), 24, false);
        let filter = IpFilter { blacklist: Arc::new(blacklist), rate_limiter: generous_limiter() };
        assert!(!filter.allow("203.0.113.5".parse().unwrap(), Instant::now()));
    }

    #[test]
    fn ipv6_peer_bypasses_the_blacklist_but_not_rate_limiting() {
        let mut blacklist = Blacklist::new(false); // default-deny everything
        blacklist.insert("0.0.0.0".parse().unwrap(), 0, false);
        let filter = IpFilter { blacklist: Arc::new(blacklist), rate_limiter: generous_limiter() };
        assert!(filter.allow("::1".parse().unwrap(), Instant::now()));
    }

    #[test]
    fn rate_limited_ip_is_refused_on_the_next_connection() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig { requests_per_sec: 1.0, window_size_sec: 1.0, ban_ip_sec: 60 }));
        let filter = IpFilter { blacklist: Arc::new(Blacklist::new(true)), rate_limiter: limiter };
        let ip = "203.0.113.9".parse().unwrap();
        let now = Instant::now();
        assert!(filter.allow(ip, now));
        assert!(!filter.allow(ip, now));
    }
}
