//! Accept-time connection gate for the HTTP listener.
//!
//! A blacklisted or rate-limited peer is refused before axum ever reads an
//! HTTP request off the socket: the connection is accepted and dropped
//! immediately instead of being handed to the request-handling stack. This
//! is what makes the rejection a TCP-level refusal rather than an HTTP
//! response — by the time a `Response` could be built, the peer would
//! already have gotten further than it should have.

use std::net::SocketAddr;
use std::time::Instant;

use axum::serve::Listener;
use tokio::net::{TcpListener, TcpStream};

use crate::middleware::ratelimit::IpFilter;

pub struct FilteringListener {
    inner: TcpListener,
    filter: IpFilter,
}

impl FilteringListener {
    pub fn new(inner: TcpListener, filter: IpFilter) -> Self {
        Self { inner, filter }
    }
}

impl Listener for FilteringListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept() failed, retrying");
                    continue;
                }
            };
            if self.filter.allow(addr.ip(), Instant::now()) {
                return (stream, addr);
            }
            tracing::debug!(%addr, "refusing connection at accept time");
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}
