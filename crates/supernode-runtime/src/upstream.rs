//! Upstream Manager: forwards a task's `Output` to a named or default
//! upstream destination and writes the reply back into `Output`.
//!
//! Grounded on `OutboxDispatcher`'s claim/send/release loop, reworked from
//! a database-backed outbox into an in-process per-destination concurrency
//! cap. A `tokio::sync::Semaphore` stands in for a hand-rolled idle/active
//! connection set and FIFO queue — the semaphore's own fair wakeup order
//! gives the same per-destination FIFO guarantee, and `reqwest::Client`'s
//! internal `hyper` pool gives the same keep-alive reuse, without
//! reimplementing either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use supernode_types::Output;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::CoreError;
use crate::task::Task;

/// Static configuration for one upstream destination, as loaded from the
/// config file's `upstream` map entries.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub base_uri: String,
    pub max_connections: usize,
    pub keep_alive: bool,
    pub timeout: Duration,
}

struct ConnItem {
    config: DestinationConfig,
    semaphore: Arc<Semaphore>,
}

impl ConnItem {
    /// `max_connections == 0` means unbounded: hand out as many permits as
    /// the semaphore can hold rather than clamping to a single connection.
    fn new(config: DestinationConfig) -> Self {
        let permits = if config.max_connections == 0 { Semaphore::MAX_PERMITS } else { config.max_connections };
        let semaphore = Arc::new(Semaphore::new(permits));
        Self { config, semaphore }
    }
}

/// Resolve `output`'s destination selector against `default`/`substitutions`
/// and merge in `output.path`/`output.query`, returning the final URI.
/// `output.uri` is `""` for the default destination, `"$name"` for a named
/// substitution, or a literal URI overriding the host outright.
fn make_uri(output: &Output, default: &str, substitutions: &HashMap<String, String>) -> Result<Url, CoreError> {
    let base = if output.uri.is_empty() {
        default.to_string()
    } else if let Some(name) = output.uri.strip_prefix('$') {
        substitutions
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Upstream(format!("unknown upstream destination '${name}'")))?
    } else {
        output.uri.clone()
    };
    let mut url = Url::parse(&base).map_err(|e| CoreError::Upstream(format!("invalid upstream URI '{base}': {e}")))?;
    if !output.path.is_empty() {
        url.set_path(&output.path);
    }
    if !output.query.is_empty() {
        url.set_query(Some(&output.query));
    }
    Ok(url)
}

fn destination_key(output: &Output) -> String {
    if output.uri.is_empty() {
        "default".to_string()
    } else {
        output.uri.clone()
    }
}

/// Owns the default destination, every named `$substitution`, and per-
/// destination connection caps. One `UpstreamManager` is shared by every
/// task.
pub struct UpstreamManager {
    client: reqwest::Client,
    default_uri: String,
    default_item: ConnItem,
    substitution_uris: HashMap<String, String>,
    substitution_items: HashMap<String, ConnItem>,
}

impl UpstreamManager {
    pub fn new(default: DestinationConfig, substitutions: HashMap<String, DestinationConfig>) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build upstream HTTP client: {e}")))?;
        let default_uri = default.base_uri.clone();
        let default_item = ConnItem::new(default);
        let mut substitution_uris = HashMap::new();
        let mut substitution_items = HashMap::new();
        for (name, config) in substitutions {
            substitution_uris.insert(name.clone(), config.base_uri.clone());
            substitution_items.insert(name, ConnItem::new(config));
        }
        Ok(Self { client, default_uri, default_item, substitution_uris, substitution_items })
    }

    fn conn_item_for(&self, output: &Output) -> Result<&ConnItem, CoreError> {
        if !output.uri.is_empty() {
            if let Some(name) = output.uri.strip_prefix('$') {
                return self
                    .substitution_items
                    .get(name)
                    .ok_or_else(|| CoreError::Upstream(format!("unknown upstream destination '${name}'")));
            }
        }
        Ok(&self.default_item)
    }

    /// Forward `task`'s current `Output` upstream, queueing behind the
    /// destination's connection cap if it's saturated (the semaphore's
    /// FIFO wakeup order), and overwrite `Output` with the reply.
    pub async fn send(&self, task: &Arc<Task>) -> Result<(), CoreError> {
        let output = task.output();
        let uri = make_uri(&output, &self.default_uri, &self.substitution_uris)?;
        let entry = self.conn_item_for(&output)?;

        let _permit = entry
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Upstream("connection semaphore closed".to_string()))?;

        let method = if output.body.is_empty() { reqwest::Method::GET } else { reqwest::Method::POST };
        let content_type = output.headers.get("Content-Type").cloned().unwrap_or_else(|| "application/json".to_string());
        let mut builder = self.client.request(method, uri).timeout(entry.config.timeout).header("Content-Type", content_type);
        if !entry.config.keep_alive {
            builder = builder.header("Connection", "close");
        }
        for line in output.extra_headers_joined().lines() {
            if let Some((name, value)) = line.split_once(": ") {
                builder = builder.header(name, value);
            }
        }
        if !output.body.is_empty() {
            builder = builder.body(output.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::UpstreamTimeout
            } else {
                CoreError::Upstream(e.to_string())
            }
        })?;

        let resp_code = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| CoreError::Upstream(e.to_string()))?.to_vec();

        let mut reply = Output { resp_code, body, ..Output::default() };
        reply.headers.insert("Content-Type".to_string(), "application/json".to_string());
        task.set_output(reply);
        Ok(())
    }
}
