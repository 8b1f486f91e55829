//! `Handler3` triples for every HTTP route this server exposes.
//!
//! Payment business logic (verifying an auth sample, talking to the
//! stake wallet, RTA consensus) is explicitly out of scope here — these
//! are wiring stubs: each does just enough to prove the phase triple, the
//! router, and the state machine are correctly connected, and returns a
//! recognizable placeholder body.

use std::sync::Arc;

use serde_json::json;
use supernode_runtime::crypto::{self, CryptoHandle};
use supernode_runtime::Handler3;
use supernode_types::{Input, Output, Status, Vars};

fn json_body(value: serde_json::Value) -> Output {
    let mut output = Output::default();
    output.set_body_json(&value);
    output
}

/// A handler that answers directly out of `pre_action` with a fixed JSON
/// shape — most of the `/dapi` and `/cryptonode` surface, since their real
/// behavior lives in the payment business logic this crate doesn't own.
fn stub(name: &'static str, response: serde_json::Value) -> Handler3 {
    Handler3::new(name).with_pre(move |_vars: Vars, _input: Input, _ctx, _output: Output| {
        let response = response.clone();
        async move { (Status::Ok, json_body(response)) }
    })
}

pub fn sale() -> Handler3 {
    stub("sale", json!({"status": "accepted"}))
}

pub fn approve_payment() -> Handler3 {
    stub("approve_payment", json!({"status": "accepted"}))
}

pub fn reject_sale() -> Handler3 {
    stub("reject_sale", json!({"status": "accepted"}))
}

pub fn reject_pay() -> Handler3 {
    stub("reject_pay", json!({"status": "accepted"}))
}

pub fn presale() -> Handler3 {
    stub("presale", json!({"status": "accepted"}))
}

/// `GET /dapi/v3.0/sale_status`: the payment id travels in the JSON
/// request body (`payment_id`), not a path variable, matching how the
/// original request handler reads it off its JSON-RPC params.
pub fn sale_status() -> Handler3 {
    Handler3::new("sale_status").with_pre(|_vars: Vars, input: Input, _ctx, _output: Output| async move {
        let payment_id = serde_json::from_slice::<serde_json::Value>(&input.body)
            .ok()
            .and_then(|body| body.get("payment_id").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default();
        if payment_id.is_empty() {
            return (Status::Error, json_body(json!({"error": "missing payment_id"})));
        }
        (Status::Ok, json_body(json!({"payment_id": payment_id, "status": "ok"})))
    })
}

pub fn get_payment_data() -> Handler3 {
    stub("get_payment_data", json!({"status": "ok", "payment_data": null}))
}

pub fn get_payment_status() -> Handler3 {
    stub("get_payment_status", json!({"status": "ok", "payment_status": "unknown"}))
}

pub fn get_tx() -> Handler3 {
    stub("get_tx", json!({"status": "ok", "tx": null}))
}

pub fn store_payment_data() -> Handler3 {
    stub("cryptonode_store_payment_data", json!({"status": "ok"}))
}

pub fn update_sale_status() -> Handler3 {
    stub("cryptonode_update_sale_status", json!({"status": "ok"}))
}

/// A peer-broadcast callback, carrying `message`, `signature` (hex) and
/// `public_key` (hex) fields. The only place this crate exercises the
/// `Crypto` capability: a signature that fails to verify
/// is rejected with `Status::Drop`, never silently accepted.
pub fn update_payment_status_encrypted(crypto: CryptoHandle) -> Handler3 {
    Handler3::new("cryptonode_update_payment_status_encrypted").with_pre(
        move |_vars: Vars, input: Input, _ctx, _output: Output| {
            let crypto = crypto.clone();
            async move {
                let Ok(body) = serde_json::from_slice::<serde_json::Value>(&input.body) else {
                    return (Status::Drop, json_body(json!({"error": "malformed JSON body"})));
                };
                let (message, signature_hex, public_key_hex) = (
                    body.get("message").and_then(|v| v.as_str()).unwrap_or_default(),
                    body.get("signature").and_then(|v| v.as_str()).unwrap_or_default(),
                    body.get("public_key").and_then(|v| v.as_str()).unwrap_or_default(),
                );
                if !crypto::verify_broadcast_message(crypto.as_ref(), message.as_bytes(), signature_hex, public_key_hex) {
                    return (Status::Drop, json_body(json!({"error": "invalid signature"})));
                }
                (Status::Ok, json_body(json!({"status": "ok"})))
            }
        },
    )
}

pub fn payment_data_request() -> Handler3 {
    stub("cryptonode_payment_data_request", json!({"status": "ok"}))
}

pub fn payment_data_response() -> Handler3 {
    stub("cryptonode_payment_data_response", json!({"status": "ok"}))
}

pub fn authorize_rta_tx_response() -> Handler3 {
    stub("cryptonode_authorize_rta_tx_response", json!({"status": "ok"}))
}

/// `/callback/{uuid}`: sets this task's resume target to the matched
/// UUID and succeeds. Resumption itself isn't this handler's job — any
/// task that returns `Ok` while its `Context` carries a target id is
/// resumed by the state machine, the same general mechanism a non-HTTP
/// task could use by calling `Context.set_next_task_id` directly. This
/// route is just the one caller of it that happens to be a client
/// request.
pub fn callback() -> Handler3 {
    Handler3::new("callback").with_pre(|vars: Vars, _input: Input, ctx: Arc<supernode_runtime::TaskContext>, _output: Output| async move {
        let Some(id) = vars.get("id").and_then(|s| uuid::Uuid::parse_str(s).ok()) else {
            return (Status::Drop, json_body(json!({"error": "invalid callback id"})));
        };
        ctx.set_next_task_id(id);
        (Status::Ok, json_body(json!({"status": "ok"})))
    })
}

/// Forwarded-verbatim passthrough (`/getblocks.bin`, `/sendrawtransaction`,
/// `/json_rpc`, ...): hands the request body straight to the cryptonode
/// RPC endpoint via `Status::Forward` without inspecting it.
pub fn passthrough(name: &'static str) -> Handler3 {
    Handler3::new(name).with_pre(move |_vars: Vars, input: Input, _ctx, mut output: Output| async move {
        output.path = input.uri.clone();
        output.query = input.query.clone();
        if let Some(content_type) = input.header("content-type") {
            output.headers.insert("Content-Type".to_string(), content_type.to_string());
        }
        output.body = input.body;
        (Status::Forward, output)
    })
}

/// Periodic stake-wallet refresh task. The real wallet RPC poll is out of
/// scope here; this proves a
/// `TaskKind::Periodic` task round-trips through the same `Handler3` /
/// state machine plumbing as a client request.
pub fn stake_wallet_refresh() -> Handler3 {
    Handler3::new("stake_wallet_refresh").with_pre(|_vars: Vars, _input: Input, _ctx, output: Output| async move {
        tracing::debug!("stake wallet refresh tick");
        (Status::Ok, output)
    })
}

/// `GET /sys_info`: the running-info counters sourced from `Context.global`,
/// naming the fields the same way the original `/sys_info` handler's
/// `RunningInfo` struct does (`http_request_total/routed/unrouted`,
/// `http_resp_status_ok/error/drop/busy`) rather than the graftlet- and
/// byte-counter fields that handler also reports, which have no counterpart
/// here (graftlet loading is out of scope; this runtime doesn't track raw
/// byte counts).
pub fn sys_info(global: Arc<supernode_runtime::GlobalContext>, started_at: std::time::Instant) -> Handler3 {
    Handler3::new("sys_info").with_pre(move |_vars: Vars, _input: Input, _ctx, _output: Output| {
        let global = global.clone();
        async move {
            let count = |key: &str| global.get_int(key, 0);
            (
                Status::Ok,
                json_body(json!({
                    "uptime_secs": started_at.elapsed().as_secs(),
                    "http_request_total": count("sys_info.http_request_total"),
                    "http_request_routed": count("sys_info.http_request_routed"),
                    "http_request_unrouted": count("sys_info.http_request_unrouted"),
                    "http_resp_status_ok": count("sys_info.http_resp_status_ok"),
                    "http_resp_status_error": count("sys_info.http_resp_status_error"),
                    "http_resp_status_drop": count("sys_info.http_resp_status_drop"),
                    "http_resp_status_busy": count("sys_info.http_resp_status_busy"),
                })),
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use supernode_runtime::{GlobalContext, NullCrypto, TaskContext};

    fn ctx() -> StdArc<TaskContext> {
        StdArc::new(TaskContext::new(StdArc::new(GlobalContext::new())))
    }

    #[tokio::test]
    async fn rejects_a_malformed_body_without_consulting_crypto() {
        let h = update_payment_status_encrypted(StdArc::new(NullCrypto));
        let input = Input { body: b"not json".to_vec(), ..Default::default() };
        let (status, _) = h.pre_action.unwrap().call(Vars::new(), input, ctx(), Output::default()).await;
        assert_eq!(status, Status::Drop);
    }

    #[tokio::test]
    async fn rejects_a_well_formed_body_when_the_signature_does_not_verify() {
        let h = update_payment_status_encrypted(StdArc::new(NullCrypto));
        let body = json!({"message": "pay 10", "signature": "deadbeef", "public_key": "ab"});
        let input = Input { body: serde_json::to_vec(&body).unwrap(), ..Default::default() };
        let (status, _) = h.pre_action.unwrap().call(Vars::new(), input, ctx(), Output::default()).await;
        assert_eq!(status, Status::Drop);
    }

    #[tokio::test]
    async fn sys_info_reports_counters_written_through_the_global_context() {
        let global = StdArc::new(GlobalContext::new());
        global.apply("sys_info.http_request_total", supernode_types::ContextValue::Int(0), |_| {
            supernode_types::ContextValue::Int(7)
        });
        let h = sys_info(global, std::time::Instant::now());
        let (status, output) = h.pre_action.unwrap().call(Vars::new(), Input::default(), ctx(), Output::default()).await;
        assert_eq!(status, Status::Ok);
        let body: serde_json::Value = serde_json::from_slice(&output.body).unwrap();
        assert_eq!(body["http_request_total"], 7);
        assert_eq!(body["http_resp_status_ok"], 0);
    }

    #[tokio::test]
    async fn callback_rejects_a_non_uuid_path_variable() {
        let h = callback();
        let mut vars = Vars::new();
        vars.insert("id", "not-a-uuid");
        let c = ctx();
        let (status, _) = h.pre_action.unwrap().call(vars, Input::default(), c.clone(), Output::default()).await;
        assert_eq!(status, Status::Drop);
        assert_eq!(c.take_next_task_id(), None);
    }

    #[tokio::test]
    async fn callback_sets_the_resume_target_instead_of_touching_the_registry_directly() {
        let h = callback();
        let id = uuid::Uuid::new_v4();
        let mut vars = Vars::new();
        vars.insert("id", id.to_string());
        let c = ctx();
        let (status, output) = h.pre_action.unwrap().call(vars, Input::default(), c.clone(), Output::default()).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(output.body, br#"{"status":"ok"}"#);
        assert_eq!(c.take_next_task_id(), Some(id));
    }

    #[tokio::test]
    async fn sale_status_reads_the_payment_id_from_the_body() {
        let h = sale_status();
        let body = json!({"payment_id": "deadbeef-1234"});
        let input = Input { body: serde_json::to_vec(&body).unwrap(), ..Default::default() };
        let (status, output) = h.pre_action.unwrap().call(Vars::new(), input, ctx(), Output::default()).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(output.body, br#"{"payment_id":"deadbeef-1234","status":"ok"}"#);
    }

    #[tokio::test]
    async fn sale_status_errors_without_a_payment_id() {
        let h = sale_status();
        let (status, _) = h.pre_action.unwrap().call(Vars::new(), Input::default(), ctx(), Output::default()).await;
        assert_eq!(status, Status::Error);
    }
}
