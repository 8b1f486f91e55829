//! supernode-server — HTTP entrypoint for the task-execution core.
//!
//! Reads config from a YAML file (default `config.yaml`, overridable via
//! `SUPERNODE_CONFIG`), then `SUPERNODE_<FIELD>` env vars.
//! Grounded on `sem_os_server::main`'s read-config / build-collaborators /
//! bind-and-serve shape, with graceful shutdown and `SIGHUP`-triggered
//! config reload added on top for this process's lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use supernode_runtime::{
    Blacklist, Config, DestinationConfig, GlobalContext, PostponeRegistry, RateLimiter, RateLimiterConfig, Reactor,
    StateMachine, UpstreamManager, WorkerPool,
};
use supernode_server::accept::FilteringListener;
use supernode_server::middleware::ratelimit::IpFilter;
use supernode_server::state::{self, AppState};
use supernode_server::{handlers, router as routes};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone, Copy)]
enum RunOutcome {
    Reload,
    Shutdown,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,supernode_server=debug,supernode_runtime=debug".into()),
        )
        .init();

    let config_path = std::env::var("SUPERNODE_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

    loop {
        let config = match Config::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, path = %config_path, "failed to load config");
                std::process::exit(-1);
            }
        };

        match run(config).await {
            RunOutcome::Reload => {
                tracing::info!("SIGHUP received, reloading config and restarting");
                continue;
            }
            RunOutcome::Shutdown => break,
        }
    }
}

fn build_blacklist(config: &Config) -> Blacklist {
    let ipf = &config.ipfilter;
    match &ipf.blacklist_rules_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match Blacklist::parse_rules(&text) {
                Ok(bl) => bl,
                Err(e) => {
                    tracing::error!(error = %e, %path, "invalid blacklist rule file, falling back to default-allow");
                    Blacklist::new(ipf.blacklist_default_allow)
                }
            },
            Err(e) => {
                tracing::error!(error = %e, %path, "could not read blacklist rule file, falling back to default-allow");
                Blacklist::new(ipf.blacklist_default_allow)
            }
        },
        None => Blacklist::new(ipf.blacklist_default_allow),
    }
}

fn build_upstream(config: &Config) -> Arc<UpstreamManager> {
    let default = DestinationConfig {
        base_uri: config.cryptonode_rpc_address.clone(),
        max_connections: 16,
        keep_alive: true,
        timeout: config.upstream_request_timeout(),
    };
    let substitutions: HashMap<String, DestinationConfig> = config
        .upstream
        .iter()
        .map(|(name, spec)| {
            (
                name.clone(),
                DestinationConfig {
                    base_uri: spec.uri.clone(),
                    max_connections: spec.max_connections,
                    keep_alive: spec.keep_alive,
                    timeout: config.upstream_request_timeout(),
                },
            )
        })
        .collect();

    match UpstreamManager::new(default, substitutions) {
        Ok(mgr) => Arc::new(mgr),
        Err(e) => {
            tracing::error!(error = %e, "invalid upstream configuration");
            std::process::exit(-2);
        }
    }
}

async fn run(config: Config) -> RunOutcome {
    let global = Arc::new(GlobalContext::new());
    let postpone = Arc::new(PostponeRegistry::new());
    let pool = WorkerPool::new(config.workers_count, config.worker_queue_len, config.workers_expelling_interval());
    let upstream = build_upstream(&config);
    let sm = Arc::new(StateMachine::new(
        pool,
        upstream,
        postpone.clone(),
        config.upstream_request_timeout(),
        config.lru_timeout(),
    ));

    let started_at = std::time::Instant::now();
    // Real signing/verification is an external collaborator;
    // nothing wires one in here, so broadcast callbacks are rejected.
    let crypto: supernode_runtime::CryptoHandle = Arc::new(supernode_runtime::NullCrypto);
    let armed_router = match routes::build_router(global.clone(), crypto, started_at) {
        Ok(r) => Arc::new(r.arm()),
        Err(e) => {
            tracing::error!(error = %e, "failed to build route table");
            std::process::exit(-1);
        }
    };

    let reactor = Arc::new(Reactor::new(global.clone(), postpone.clone(), sm.clone(), config.timer_poll_interval()));
    reactor.add_periodic(
        "stake_wallet_refresh",
        std::time::Duration::from_millis(config.stake_wallet_refresh_interval_ms),
        handlers::stake_wallet_refresh(),
    );
    let reactor_task = {
        let reactor = reactor.clone();
        tokio::spawn(async move { reactor.run().await })
    };

    let blacklist = Arc::new(build_blacklist(&config));
    let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        requests_per_sec: config.ipfilter.requests_per_sec,
        window_size_sec: config.ipfilter.window_size_sec,
        ban_ip_sec: config.ipfilter.ban_ip_sec,
    }));
    let ip_filter_state = IpFilter { blacklist, rate_limiter };

    let app_state = AppState { router: armed_router, sm, global: global.clone() };

    let app = Router::new()
        .fallback(any(state::dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let tcp_listener = match TcpListener::bind(&config.http_address).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, address = %config.http_address, "failed to bind listener");
            std::process::exit(-2);
        }
    };
    tracing::info!(address = %config.http_address, "supernode-server listening");
    // Refuses a rate-limited or blacklisted peer at accept time, before
    // axum ever reads an HTTP request off the socket.
    let listener = FilteringListener::new(tcp_listener, ip_filter_state);

    let outcome = Arc::new(std::sync::Mutex::new(RunOutcome::Shutdown));
    let shutdown_outcome = outcome.clone();
    let shutdown = async move {
        let signal = wait_for_signal().await;
        *shutdown_outcome.lock().expect("outcome mutex poisoned") = signal;
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .expect("server error");

    reactor.request_stop();
    let _ = reactor_task.await;

    let outcome = *outcome.lock().expect("outcome mutex poisoned");
    outcome
}

async fn wait_for_signal() -> RunOutcome {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => RunOutcome::Shutdown,
            _ = sigterm.recv() => RunOutcome::Shutdown,
            _ = sighup.recv() => RunOutcome::Reload,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        RunOutcome::Shutdown
    }
}
