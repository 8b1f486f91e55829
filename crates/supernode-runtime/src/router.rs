//! Router: path/method matching to `Handler3` triples via a radix tree
//! keyed by pattern segment, with an integer method-mask per node.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use supernode_types::Vars;
use thiserror::Error;

use crate::handler::Handler3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }
}

/// Bitmask of allowed methods for a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodMask(u16);

impl MethodMask {
    pub fn of(methods: &[Method]) -> Self {
        methods.iter().fold(Self(0), |acc, &m| Self(acc.0 | m.bit()))
    }

    pub fn single(m: Method) -> Self {
        Self::of(&[m])
    }

    pub fn contains(self, m: Method) -> bool {
        self.0 & m.bit() != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("duplicate route registration for {method:?} {pattern}")]
    Duplicate { method: String, pattern: String },
    #[error("invalid variable constraint `{0}`: {1}")]
    InvalidRegex(String, String),
}

enum Segment {
    Literal(String),
    Var { name: String, constraint: Option<Regex> },
}

fn parse_segment(raw: &str) -> Segment {
    if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        match inner.split_once(':') {
            Some((name, pattern)) => {
                let anchored = format!("^(?:{pattern})$");
                let constraint = Regex::new(&anchored).ok();
                Segment::Var { name: name.to_string(), constraint }
            }
            None => Segment::Var { name: inner.to_string(), constraint: None },
        }
    } else {
        Segment::Literal(raw.to_string())
    }
}

fn split_pattern(pattern: &str) -> Vec<&str> {
    pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Default)]
struct Node {
    literal_children: HashMap<String, Node>,
    var_child: Option<(String, Option<Regex>, Box<Node>)>,
    terminal: Vec<(MethodMask, Handler3, String)>,
}

impl Node {
    fn child_for(&mut self, segment: &Segment) -> &mut Node {
        match segment {
            Segment::Literal(lit) => self.literal_children.entry(lit.clone()).or_default(),
            Segment::Var { name, constraint } => {
                if self.var_child.is_none() {
                    self.var_child = Some((name.clone(), constraint.clone(), Box::new(Node::default())));
                }
                &mut self.var_child.as_mut().unwrap().2
            }
        }
    }
}

/// Owns the full route table and the compiled radix tree.
pub struct Router {
    root: Node,
    seen: HashSet<(Method, String)>,
}

impl Router {
    pub fn new() -> Self {
        Self { root: Node::default(), seen: HashSet::new() }
    }

    /// Register a route group sharing a common prefix.
    pub fn group(prefix: impl Into<String>) -> RouteGroup {
        RouteGroup { prefix: prefix.into(), routes: Vec::new() }
    }

    pub fn route(
        &mut self,
        pattern: &str,
        methods: &[Method],
        handler: Handler3,
    ) -> Result<(), RouterError> {
        for &m in methods {
            let key = (m, pattern.to_string());
            if !self.seen.insert(key) {
                return Err(RouterError::Duplicate { method: format!("{m:?}"), pattern: pattern.to_string() });
            }
        }
        let segments: Vec<Segment> = split_pattern(pattern).into_iter().map(parse_segment).collect();
        let mut node = &mut self.root;
        for seg in &segments {
            node = node.child_for(seg);
        }
        node.terminal.push((MethodMask::of(methods), handler, pattern.to_string()));
        Ok(())
    }

    pub fn add_group(&mut self, group: RouteGroup) -> Result<(), RouterError> {
        for (pattern, methods, handler) in group.routes {
            self.route(&pattern, &methods, handler)?;
        }
        Ok(())
    }

    /// Finalize the route table. A no-op beyond signaling intent — the
    /// tree is already built incrementally by `route`/`add_group` — kept
    /// as an explicit call so a future persistent-compilation step has a
    /// seam to hook into.
    pub fn arm(self) -> ArmedRouter {
        ArmedRouter { root: self.root }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RouteGroup {
    prefix: String,
    routes: Vec<(String, Vec<Method>, Handler3)>,
}

impl RouteGroup {
    pub fn route(mut self, pattern: &str, methods: &[Method], handler: Handler3) -> Self {
        let joined = format!("{}/{}", self.prefix.trim_end_matches('/'), pattern.trim_start_matches('/'));
        self.routes.push((joined, methods.to_vec(), handler));
        self
    }
}

/// A compiled, immutable router ready to match requests.
pub struct ArmedRouter {
    root: Node,
}

pub struct Matched<'a> {
    pub vars: Vars,
    pub handler: &'a Handler3,
}

impl ArmedRouter {
    pub fn matches(&self, method: Method, path: &str) -> Option<Matched<'_>> {
        let segments = split_pattern(path);
        let mut vars = Vars::new();
        Self::match_node(&self.root, &segments, method, &mut vars)
    }

    fn match_node<'a>(
        node: &'a Node,
        remaining: &[&str],
        method: Method,
        vars: &mut Vars,
    ) -> Option<Matched<'a>> {
        if remaining.is_empty() {
            let (_, handler, _) = node.terminal.iter().find(|(mask, _, _)| mask.contains(method))?;
            return Some(Matched { vars: vars.clone(), handler });
        }
        let (head, tail) = (remaining[0], &remaining[1..]);

        if let Some(child) = node.literal_children.get(head) {
            if let Some(m) = Self::match_node(child, tail, method, vars) {
                return Some(m);
            }
        }

        if let Some((name, constraint, child)) = &node.var_child {
            if constraint.as_ref().map(|re| re.is_match(head)).unwrap_or(true) {
                vars.insert(name.clone(), head.to_string());
                if let Some(m) = Self::match_node(child, tail, method, vars) {
                    return Some(m);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler3;

    #[test]
    fn literal_and_variable_segments_match() {
        let mut r = Router::new();
        r.route("/dapi/v3.0/sale_status", &[Method::Get], Handler3::new("sale_status")).unwrap();
        r.route("/callback/{id:[0-9a-fA-F-]+}", &[Method::Post], Handler3::new("callback")).unwrap();
        let armed = r.arm();

        let m = armed.matches(Method::Get, "/dapi/v3.0/sale_status").unwrap();
        assert_eq!(m.handler.name, "sale_status");

        let m = armed.matches(Method::Post, "/callback/deadbeef-1234").unwrap();
        assert_eq!(m.handler.name, "callback");
        assert_eq!(m.vars.get("id"), Some("deadbeef-1234"));

        assert!(armed.matches(Method::Post, "/callback/not valid!").is_none());
    }

    #[test]
    fn method_mismatch_does_not_match() {
        let mut r = Router::new();
        r.route("/x", &[Method::Get], Handler3::new("x")).unwrap();
        let armed = r.arm();
        assert!(armed.matches(Method::Post, "/x").is_none());
    }

    #[test]
    fn duplicate_endpoint_method_is_rejected() {
        let mut r = Router::new();
        r.route("/x", &[Method::Get], Handler3::new("x1")).unwrap();
        let err = r.route("/x", &[Method::Get], Handler3::new("x2")).unwrap_err();
        assert!(matches!(err, RouterError::Duplicate { .. }));
    }

    #[test]
    fn group_prefix_is_prepended() {
        let mut r = Router::new();
        let group = Router::group("/dapi/v3.0").route("/sale", &[Method::Post], Handler3::new("sale"));
        r.add_group(group).unwrap();
        let armed = r.arm();
        assert!(armed.matches(Method::Post, "/dapi/v3.0/sale").is_some());
    }
}
