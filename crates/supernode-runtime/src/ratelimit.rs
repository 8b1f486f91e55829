//! Per-source-IP token-bucket rate limiter with a sliding window and a
//! ban table.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_sec: f64,
    pub window_size_sec: f64,
    pub ban_ip_sec: u64,
}

struct WindowState {
    window_start: Instant,
    count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<IpAddr, WindowState>>,
    bans: Mutex<HashMap<IpAddr, Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, windows: Mutex::new(HashMap::new()), bans: Mutex::new(HashMap::new()) }
    }

    /// Evaluate and update state for a connection from `ip` arriving at
    /// `now`. Steps follow exactly.
    pub fn check(&self, ip: IpAddr, now: Instant) -> Decision {
        {
            let mut bans = self.bans.lock().expect("rate limiter bans poisoned");
            if let Some(&deadline) = bans.get(&ip) {
                if now < deadline {
                    return Decision::Rejected;
                }
                bans.remove(&ip);
            }
        }

        let mut windows = self.windows.lock().expect("rate limiter windows poisoned");
        let state = windows.entry(ip).or_insert_with(|| WindowState { window_start: now, count: 0.0 });

        let elapsed = now.saturating_duration_since(state.window_start).as_secs_f64();
        if elapsed > 2.0 * self.config.window_size_sec {
            state.window_start = now;
            state.count = 1.0;
        } else {
            state.count = (state.count - elapsed * self.config.requests_per_sec).max(0.0);
            state.window_start = now;
            state.count += 1.0;
        }

        let threshold = self.config.window_size_sec * self.config.requests_per_sec;
        let triggered = state.count > threshold;
        drop(windows);

        if triggered {
            let deadline = now + Duration::from_secs(self.config.ban_ip_sec);
            self.bans.lock().expect("rate limiter bans poisoned").insert(ip, deadline);
            return Decision::Rejected;
        }
        Decision::Allowed
    }

    pub fn ban_count(&self) -> usize {
        self.bans.lock().expect("rate limiter bans poisoned").len()
    }
}
