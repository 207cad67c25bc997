//! OpenSSH known_hosts support.
//!
//! Parses, checks and persists host keys in the OpenSSH known_hosts format
//! used for trust-on-first-use host verification.
//!
//! # Format
//!
//! ```text
//! [marker] patterns keytype base64-key [comment]
//! ```
//!
//! Patterns can be:
//! - plain: `example.com`, or `[example.com]:2222` for non-default ports
//! - comma-separated lists: `host1,host2`
//! - wildcards: `*.example.com`, `host?`
//! - negations: `*.example.com,!bad.example.com`
//! - hashed: `|1|salt|hash` (HMAC-SHA1 of the hostname, keyed by the salt)
//!
//! A `@revoked` marker turns a matching entry into an explicit rejection.
//!
//! Checking is pure: [`KnownHosts::check`] inspects state and never mutates
//! the store or touches the session.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hawser_platform::{HawserError, HawserResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt::Write as _;
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha1 = Hmac<Sha1>;

/// Outcome of a host-key check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// An entry matches the host and carries the same key.
    Match,
    /// An entry matches the host but the key differs, or the key is
    /// revoked. A potential man-in-the-middle; never treat as unknown.
    Mismatch,
    /// No entry matches the host.
    NotFound,
}

/// One known_hosts line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    /// Leading `@marker`, e.g. `@revoked`, if present.
    marker: Option<String>,
    /// Raw pattern field (comma list, wildcards, hashed form).
    patterns: String,
    /// Key algorithm name, e.g. "ssh-ed25519".
    key_type: String,
    /// Public key blob in SSH wire format.
    key: Vec<u8>,
    /// Trailing comment.
    comment: String,
}

impl KnownHostEntry {
    /// Builds a plain entry for `host` and `port`.
    pub fn new(host: &str, port: u16, key_type: &str, key: &[u8]) -> Self {
        Self {
            marker: None,
            patterns: host_pattern(host, port),
            key_type: key_type.to_string(),
            key: key.to_vec(),
            comment: String::new(),
        }
    }

    /// Returns the raw pattern field.
    pub fn patterns(&self) -> &str {
        &self.patterns
    }

    /// Returns the key algorithm name.
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Returns the public key blob.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Returns the marker, if any.
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// True if the entry is marked `@revoked`.
    pub fn revoked(&self) -> bool {
        self.marker.as_deref() == Some("@revoked")
    }

    /// Parses one non-empty, non-comment line.
    fn parse(line: &str) -> HawserResult<Self> {
        let mut fields: Vec<&str> = line.split_whitespace().collect();
        let marker = if fields.first().is_some_and(|f| f.starts_with('@')) {
            Some(fields.remove(0).to_string())
        } else {
            None
        };
        if fields.len() < 3 {
            return Err(HawserError::resource(
                "known_hosts line has fewer than three fields",
            ));
        }
        let key = BASE64
            .decode(fields[2])
            .map_err(|e| HawserError::resource(format!("invalid base64 key data: {e}")))?;
        Ok(Self {
            marker,
            patterns: fields[0].to_string(),
            key_type: fields[1].to_string(),
            key,
            comment: fields[3..].join(" "),
        })
    }

    /// True if any positive pattern matches the host and no negated
    /// pattern does.
    fn matches(&self, host: &str, port: u16) -> bool {
        let target = host_pattern(host, port);
        let mut matched = false;
        for pattern in self.patterns.split(',') {
            let pattern = pattern.trim();
            if let Some(negated) = pattern.strip_prefix('!') {
                if pattern_matches(negated, &target) {
                    return false;
                }
            } else if pattern_matches(pattern, &target) {
                matched = true;
            }
        }
        matched
    }

    fn render(&self, out: &mut String) {
        if let Some(marker) = &self.marker {
            let _ = write!(out, "{marker} ");
        }
        let _ = write!(out, "{} {} {}", self.patterns, self.key_type, BASE64.encode(&self.key));
        if !self.comment.is_empty() {
            let _ = write!(out, " {}", self.comment);
        }
        out.push('\n');
    }
}

/// The canonical host spelling: bare for port 22, `[host]:port` otherwise.
fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern.starts_with("|1|") {
        return hashed_matches(pattern, target);
    }
    if pattern.contains('*') || pattern.contains('?') {
        return wildcard_matches(pattern, target);
    }
    pattern == target
}

/// `|1|base64(salt)|base64(HMAC-SHA1(salt, host))`, compared in constant
/// time. Malformed hashed patterns never match.
fn hashed_matches(pattern: &str, target: &str) -> bool {
    let parts: Vec<&str> = pattern.split('|').collect();
    if parts.len() != 4 || !parts[0].is_empty() || parts[1] != "1" {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (BASE64.decode(parts[2]), BASE64.decode(parts[3])) else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(&salt) else {
        return false;
    };
    mac.update(target.as_bytes());
    let computed = mac.finalize().into_bytes();
    computed.ct_eq(&expected[..]).into()
}

/// Glob match with `*` (any run) and `?` (one character). Iterative
/// two-pointer form with star backtracking.
fn wildcard_matches(pattern: &str, target: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = target.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// An in-memory known_hosts store.
///
/// Load, consult and edit the store, then persist with
/// [`save`](KnownHosts::save). Entry order is preserved across a
/// load/save cycle.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<KnownHostEntry>,
}

impl KnownHosts {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads entries from a file. A missing file yields an empty store;
    /// malformed lines are skipped with a warning rather than failing the
    /// whole load.
    pub fn load(path: impl AsRef<Path>) -> HawserResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| HawserError::resource(format!("cannot read {}: {e}", path.display())))?;
        Ok(Self::parse(&content))
    }

    /// Parses known_hosts content.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match KnownHostEntry::parse(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(line = lineno + 1, %err, "skipping malformed known_hosts line");
                }
            }
        }
        Self { entries }
    }

    /// Writes all entries to `path` in OpenSSH format, atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> HawserResult<()> {
        let path = path.as_ref();
        let mut content = String::new();
        for entry in &self.entries {
            entry.render(&mut content);
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content.as_bytes())
            .map_err(|e| HawserError::resource(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| HawserError::resource(format!("cannot rename to {}: {e}", path.display())))?;
        Ok(())
    }

    /// Checks `key` for `host:port` against the store. Pure.
    ///
    /// A matching entry with a different key of the same type, or a
    /// matching `@revoked` entry, is a [`CheckResult::Mismatch`] even if a
    /// later entry would match; a changed key must never look like an
    /// unknown host.
    pub fn check(&self, host: &str, port: u16, key_type: &str, key: &[u8]) -> CheckResult {
        let mut result = CheckResult::NotFound;
        for entry in &self.entries {
            if !entry.matches(host, port) || entry.key_type != key_type {
                continue;
            }
            let same_key = entry.key == key;
            if entry.revoked() {
                if same_key {
                    return CheckResult::Mismatch;
                }
                continue;
            }
            if same_key {
                result = CheckResult::Match;
            } else {
                return CheckResult::Mismatch;
            }
        }
        result
    }

    /// Adds an entry for `host:port`.
    pub fn add(&mut self, host: &str, port: u16, key_type: &str, key: &[u8]) {
        self.entries
            .push(KnownHostEntry::new(host, port, key_type, key));
    }

    /// Adds a pre-built entry, e.g. one carrying a marker or comment.
    pub fn add_entry(&mut self, entry: KnownHostEntry) {
        self.entries.push(entry);
    }

    /// Removes all entries matching `host:port`. Returns the count removed.
    pub fn remove(&mut self, host: &str, port: u16) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.matches(host, port));
        before - self.entries.len()
    }

    /// Returns all entries in file order.
    pub fn entries(&self) -> &[KnownHostEntry] {
        &self.entries
    }
}
