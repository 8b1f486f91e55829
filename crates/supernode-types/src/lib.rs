//! Wire-shaped value types shared across the supernode task-execution core.
//!
//! No I/O and no async here — this crate exists so `supernode-runtime` and
//! `supernode-server` agree on the same request/response/status shapes
//! without either depending on the other's internals.

mod context_value;
mod io;
mod rpc_error;
mod status;
mod vars;

pub use context_value::ContextValue;
pub use io::{Input, Output};
pub use rpc_error::{ErrorCode, RpcError};
pub use status::{Status, TaskKind, TaskState};
pub use vars::Vars;
