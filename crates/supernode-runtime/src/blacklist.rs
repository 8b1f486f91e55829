//! CIDR-rule radix tree: `allow`/`deny` over 32-bit IPv4 prefixes with
//! longest-prefix-match and a default policy.

use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },
}

#[derive(Default, Debug)]
struct Node {
    allow: Option<bool>,
    children: [Option<Box<Node>>; 2],
}

/// Longest-prefix-match allow/deny table over IPv4 addresses.
#[derive(Debug)]
pub struct Blacklist {
    root: Node,
    default_allow: bool,
}

impl Blacklist {
    pub fn new(default_allow: bool) -> Self {
        Self { root: Node::default(), default_allow }
    }

    pub fn insert(&mut self, prefix: Ipv4Addr, len: u8, allow: bool) {
        let bits = u32::from(prefix);
        let mut node = &mut self.root;
        for i in 0..len {
            let bit = ((bits >> (31 - i)) & 1) as usize;
            node = node.children[bit].get_or_insert_with(|| Box::new(Node::default()));
        }
        node.allow = Some(allow);
    }

    /// Longest-prefix match: walk the bits of `ip`, remembering the most
    /// specific node that carried an explicit `allow` flag.
    pub fn is_allowed(&self, ip: Ipv4Addr) -> bool {
        let bits = u32::from(ip);
        let mut node = &self.root;
        let mut result = self.default_allow;
        if let Some(a) = node.allow {
            result = a;
        }
        for i in 0..32u32 {
            let bit = ((bits >> (31 - i)) & 1) as usize;
            match &node.children[bit] {
                Some(child) => {
                    node = child;
                    if let Some(a) = node.allow {
                        result = a;
                    }
                }
                None => break,
            }
        }
        result
    }

    /// Parse a rule file: `(allow|deny) (all | A.B.C.D[/N])` per line;
    /// text after `;;` on a line is a comment; a terminator (`all`) rule
    /// supersedes — and truncates parsing of — anything after it.
    pub fn parse_rules(text: &str) -> Result<Self, RuleParseError> {
        let mut blacklist = Blacklist::new(true);
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.split(";;").next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let verb = parts.next().ok_or_else(|| RuleParseError::Invalid {
                line: line_no,
                message: "missing allow/deny".to_string(),
            })?;
            let allow = match verb {
                "allow" => true,
                "deny" => false,
                other => {
                    return Err(RuleParseError::Invalid {
                        line: line_no,
                        message: format!("expected 'allow' or 'deny', got '{other}'"),
                    })
                }
            };
            let target = parts.next().ok_or_else(|| RuleParseError::Invalid {
                line: line_no,
                message: "missing rule target".to_string(),
            })?;

            if target == "all" {
                blacklist.default_allow = allow;
                break;
            }

            let (addr_part, len_part) = target.split_once('/').unwrap_or((target, "32"));
            let addr: Ipv4Addr = addr_part.parse().map_err(|_| RuleParseError::Invalid {
                line: line_no,
                message: format!("invalid IPv4 address '{addr_part}'"),
            })?;
            let len: u8 = len_part.parse().map_err(|_| RuleParseError::Invalid {
                line: line_no,
                message: format!("invalid prefix length '{len_part}'"),
            })?;
            if len > 32 {
                return Err(RuleParseError::Invalid { line: line_no, message: "prefix length > 32".to_string() });
            }
            blacklist.insert(addr, len, allow);
        }
        Ok(blacklist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut bl = Blacklist::new(true);
        bl.insert("10.16.0.0".parse().unwrap(), 16, true);
        bl.insert("10.16.10.0".parse().unwrap(), 24, false);
        bl.insert("10.16.10.1".parse().unwrap(), 32, true);

        assert!(bl.is_allowed("10.16.10.1".parse().unwrap()));
        assert!(!bl.is_allowed("10.16.10.2".parse().unwrap()));
        assert!(bl.is_allowed("10.16.11.3".parse().unwrap()));
    }

    #[test]
    fn parses_rule_file_with_comments_and_terminator() {
        let text = "\
            ;; default deny, then carve out an allow\n\
            deny all\n\
            allow 10.0.0.0/8  ;; trusted range\n\
        ";
        let bl = Blacklist::parse_rules(text).unwrap();
        // terminator truncates parsing, so the carve-out after it never applies
        assert!(!bl.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(!bl.is_allowed("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn parses_rules_before_terminator() {
        let text = "allow 10.0.0.0/8\ndeny all\n";
        let bl = Blacklist::parse_rules(text).unwrap();
        assert!(bl.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(!bl.is_allowed("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_line() {
        let err = Blacklist::parse_rules("maybe 1.2.3.4").unwrap_err();
        assert!(matches!(err, RuleParseError::Invalid { line: 1, .. }));
    }
}
