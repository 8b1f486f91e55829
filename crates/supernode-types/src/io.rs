//! HTTP-shaped `Input`/`Output` buffers a `Task` carries between phases.

use std::collections::HashMap;

/// The request side of a task, populated by the Reactor on accept and
/// re-populated on postpone-resumption.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Input {
    pub method: String,
    pub uri: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub resp_code: u16,
}

impl Input {
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The response side of a task, mutated by handler phases. `uri` additionally
/// names an Upstream Manager destination (`$name` or empty for default) when
/// the task transitions through `Forward`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Output {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub resp_code: u16,
    /// Upstream destination selector: `""` (default), `"$name"` (substitution),
    /// or a literal `scheme://host[:port]/path` to merge over the selected entry.
    pub uri: String,
    pub path: String,
    pub query: String,
}

impl Output {
    pub fn set_body_json(&mut self, value: &serde_json::Value) {
        self.body = serde_json::to_vec(value).expect("Value serialization is infallible");
        self.headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "application/json".to_string());
    }

    pub fn extra_headers_joined(&self) -> String {
        self.headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type"))
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_body_json_defaults_content_type() {
        let mut out = Output::default();
        out.set_body_json(&serde_json::json!({"s": "1"}));
        assert_eq!(out.headers.get("Content-Type").map(String::as_str), Some("application/json"));
        assert_eq!(out.body, br#"{"s":"1"}"#);
    }

    #[test]
    fn explicit_content_type_is_not_overwritten() {
        let mut out = Output::default();
        out.headers.insert("Content-Type".to_string(), "text/plain".to_string());
        out.set_body_json(&serde_json::json!({}));
        assert_eq!(out.headers.get("Content-Type").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn extra_headers_excludes_content_type() {
        let mut out = Output::default();
        out.headers.insert("Content-Type".to_string(), "application/json".to_string());
        out.headers.insert("X-Request-Id".to_string(), "abc".to_string());
        assert_eq!(out.extra_headers_joined(), "X-Request-Id: abc");
    }
}
