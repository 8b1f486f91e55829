//! Task execution core: the reactor maintenance loop, the task state
//! machine, the worker pool and `Strand` serialization primitive, the
//! postpone/resume registry, the context store, the upstream manager, the
//! router, and the rate limiter / CIDR blacklist.
//!
//! `supernode-types` supplies the wire-shaped values everything here moves
//! around; `supernode-server` wires this crate's pieces to `axum` and
//! supplies the actual payment-domain `Handler3` triples.

pub mod blacklist;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod expiring;
pub mod handler;
pub mod postpone;
pub mod ratelimit;
pub mod reactor;
pub mod router;
pub mod state_machine;
pub mod task;
pub mod upstream;
pub mod worker_pool;

pub use blacklist::Blacklist;
pub use config::Config;
pub use context::{GlobalContext, LocalContext, TaskContext};
pub use crypto::{Crypto, CryptoHandle, NullCrypto};
pub use error::CoreError;
pub use expiring::{ExpiringMap, ExpiringSet};
pub use handler::{Handler3, Phase, PhaseOutcome};
pub use postpone::{ParkResult, PostponeRegistry};
pub use ratelimit::{Decision, RateLimiter, RateLimiterConfig};
pub use reactor::Reactor;
pub use router::{ArmedRouter, Method, MethodMask, Router, RouterError};
pub use state_machine::StateMachine;
pub use task::Task;
pub use upstream::{DestinationConfig, UpstreamManager};
pub use worker_pool::{Strand, WorkerPool};
