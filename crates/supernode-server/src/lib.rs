//! HTTP entrypoint crate: wires `supernode_runtime`'s task-execution core
//! to axum. The binary lives in `main.rs`; this module tree is exposed as a
//! library too so integration tests can build a router without spawning a
//! real process.

pub mod accept;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
