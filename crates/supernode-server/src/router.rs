//! Builds the full `Handler3` route table for this server's HTTP surface.

use std::sync::Arc;
use std::time::Instant;

use supernode_runtime::crypto::CryptoHandle;
use supernode_runtime::{GlobalContext, Method, Router, RouterError};

use crate::handlers;

pub fn build_router(global: Arc<GlobalContext>, crypto: CryptoHandle, started_at: Instant) -> Result<Router, RouterError> {
    let mut router = Router::new();

    let dapi = Router::group("/dapi/v3.0")
        .route("/sale", &[Method::Post], handlers::sale())
        .route("/approve_payment", &[Method::Post], handlers::approve_payment())
        .route("/reject_sale", &[Method::Post], handlers::reject_sale())
        .route("/reject_pay", &[Method::Post], handlers::reject_pay())
        .route("/presale", &[Method::Post], handlers::presale())
        .route("/sale_status", &[Method::Get], handlers::sale_status());
    router.add_group(dapi)?;

    router.route("/get_payment_data", &[Method::Post], handlers::get_payment_data())?;
    router.route("/get_payment_status", &[Method::Post], handlers::get_payment_status())?;
    router.route("/get_tx", &[Method::Post], handlers::get_tx())?;

    let cryptonode = Router::group("/cryptonode")
        .route("/store_payment_data", &[Method::Post], handlers::store_payment_data())
        .route("/update_sale_status", &[Method::Post], handlers::update_sale_status())
        .route(
            "/update_payment_status_encrypted",
            &[Method::Post],
            handlers::update_payment_status_encrypted(crypto.clone()),
        )
        .route("/payment_data_request", &[Method::Post], handlers::payment_data_request())
        .route("/payment_data_response", &[Method::Post], handlers::payment_data_response())
        .route(
            "/authorize_rta_tx_response",
            &[Method::Post],
            handlers::authorize_rta_tx_response(),
        );
    router.add_group(cryptonode)?;

    router.route("/callback/{id:[0-9a-fA-F-]+}", &[Method::Post], handlers::callback())?;

    router.route("/sys_info", &[Method::Get], handlers::sys_info(global, started_at))?;

    let passthrough_methods = [Method::Get, Method::Post];
    router.route("/getblocks.bin", &passthrough_methods, handlers::passthrough("getblocks"))?;
    router.route("/sendrawtransaction", &passthrough_methods, handlers::passthrough("sendrawtransaction"))?;
    router.route("/json_rpc", &passthrough_methods, handlers::passthrough("json_rpc"))?;

    Ok(router)
}
