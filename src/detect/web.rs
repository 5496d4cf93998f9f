//! Web attack pattern matching
//!
//! Fixed case-insensitive pattern sets for SQL injection and cross-site
//! scripting, applied to URL-decoded HTTP request payloads, plus Host
//! header extraction for the malicious-domain check. All regexes are
//! compiled once at startup.

use anyhow::{Context, Result};
use regex::Regex;

const SQL_PATTERNS: &[&str] = &[
    r"(\%27)|(\')|(\-\-)|(\%23)|(#)",
    r"union\s+select",
    r"or\s+1=1",
    r"exec(\s|\+)+(s|x)p\w+",
];

const XSS_PATTERNS: &[&str] = &[
    r"<script[^>]*>.*?</script>",
    r"javascript:",
    r"onerror\s*=",
    r"onload\s*=",
    r"alert\s*\(",
];

/// Compiled pattern sets shared by the detection engine
pub struct WebPatterns {
    sqli: Vec<Regex>,
    xss: Vec<Regex>,
    host: Regex,
    request_line: Regex,
}

impl WebPatterns {
    pub fn new() -> Result<Self> {
        let compile = |patterns: &[&str]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("(?i){}", p))
                        .with_context(|| format!("Invalid pattern: {}", p))
                })
                .collect()
        };

        Ok(Self {
            sqli: compile(SQL_PATTERNS)?,
            xss: compile(XSS_PATTERNS)?,
            host: Regex::new(r"(?i)\bHost:\s*([^\r\n]+)")?,
            request_line: Regex::new(r"^([A-Z]+)\s+(\S+)\s+HTTP/\d")?,
        })
    }

    /// Number of SQLi patterns matching the payload; each match is one
    /// window hit.
    pub fn sqli_matches(&self, payload: &str) -> usize {
        self.sqli.iter().filter(|re| re.is_match(payload)).count()
    }

    /// Number of XSS patterns matching the payload
    pub fn xss_matches(&self, payload: &str) -> usize {
        self.xss.iter().filter(|re| re.is_match(payload)).count()
    }

    /// First `Host:` header value, trimmed and lowercased
    pub fn find_host(&self, payload: &str) -> Option<String> {
        self.host
            .captures(payload)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_lowercase())
            .filter(|h| !h.is_empty())
    }

    /// Method and path from the request line, when present
    pub fn request_line(&self, payload: &str) -> Option<(String, String)> {
        self.request_line
            .captures(payload)
            .map(|c| (c[1].to_string(), c[2].to_string()))
    }
}

/// Best-effort URL decode of raw payload bytes: `%XX` sequences become
/// bytes, invalid UTF-8 becomes replacement characters. Mirrors a plain
/// percent-unquote; `+` is left alone.
pub fn percent_decode(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            let hex = &raw[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(&String::from_utf8_lossy(hex), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
