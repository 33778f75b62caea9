//! Configuration parsing for the relay

use anyhow::{anyhow, bail, Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 53;
/// Upper bound on `pending_ttl`; moka rejects very long expirations.
pub const MAX_PENDING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub upstream: SocketAddr,
    pub store_path: PathBuf,
    pub forward_only: bool,
    pub pending_ttl: Duration,
    pub max_inflight: usize,
    pub metrics: Option<SocketAddr>,
    pub log_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            upstream: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), DEFAULT_PORT),
            store_path: PathBuf::from("hosts.db"),
            forward_only: false,
            pending_ttl: Duration::from_secs(5),
            max_inflight: 256,
            metrics: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Clone, Debug)]
struct Directive {
    name: String,
    args: Vec<String>,
}

#[derive(Debug, PartialEq)]
enum Token { Text(String), OpenBrace, CloseBrace, Newline }

impl RelayConfig {
    /// Load configuration from a file path
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content).with_context(|| format!("Invalid config file '{}'", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = Self::lex(content);
        let (header, directives) = Self::parse_tokens(&tokens)?;
        let mut cfg = RelayConfig::default();

        if let Some(listen) = header.first() {
            cfg.listen = parse_listen_addr(listen)?;
        }

        for d in &directives {
            match d.name.as_str() {
                "upstream" => cfg.upstream = parse_upstream_addr(single_arg(d)?)?,
                "store" => cfg.store_path = PathBuf::from(single_arg(d)?),
                "forward_only" => {
                    cfg.forward_only = match d.args.first().map(String::as_str) {
                        None | Some("on") | Some("true") => true,
                        Some("off") | Some("false") => false,
                        Some(other) => bail!("forward_only: expected on/off, got '{}'", other),
                    };
                }
                "pending_ttl" => {
                    let ttl = parse_duration(single_arg(d)?)?;
                    if ttl.is_zero() { bail!("pending_ttl must be greater than zero"); }
                    if ttl > MAX_PENDING_TTL { bail!("pending_ttl must not exceed {:?}", MAX_PENDING_TTL); }
                    cfg.pending_ttl = ttl;
                }
                "max_inflight" => {
                    let n: usize = single_arg(d)?.parse().context("max_inflight")?;
                    if n == 0 { bail!("max_inflight must be at least 1"); }
                    cfg.max_inflight = n;
                }
                "metrics" => cfg.metrics = Some(parse_listen_addr(single_arg(d)?)?),
                "log_dir" => cfg.log_dir = PathBuf::from(single_arg(d)?),
                other => bail!("Unknown directive: {}", other),
            }
        }
        Ok(cfg)
    }

    fn lex(input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c == '\n' { tokens.push(Token::Newline); chars.next(); }
            else if c.is_whitespace() { chars.next(); }
            else if c == '#' { while let Some(&c) = chars.peek() { if c == '\n' { break; } chars.next(); } }
            else if c == '{' { tokens.push(Token::OpenBrace); chars.next(); }
            else if c == '}' { tokens.push(Token::CloseBrace); chars.next(); }
            else if c == '"' {
                chars.next();
                let mut s = String::new();
                while let Some(&c) = chars.peek() { if c == '"' { chars.next(); break; } s.push(c); chars.next(); }
                tokens.push(Token::Text(s));
            } else {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' || c == '{' || c == '}' || c == '"' { break; }
                    s.push(c); chars.next();
                }
                tokens.push(Token::Text(s));
            }
        }
        tokens
    }

    /// Finds the single `relay [listen] { ... }` block. Returns the header
    /// arguments after `relay` and the directives inside the braces.
    fn parse_tokens(tokens: &[Token]) -> Result<(Vec<String>, Vec<Directive>)> {
        let mut i = 0;
        let mut header: Vec<String> = Vec::new();
        let mut found: Option<(Vec<String>, Vec<Directive>)> = None;
        while i < tokens.len() {
            match &tokens[i] {
                Token::Text(s) => { header.push(s.clone()); i += 1; }
                Token::OpenBrace => {
                    i += 1;
                    let (directives, next_i) = Self::parse_block(tokens, i)?;
                    i = next_i;
                    match header.first().map(String::as_str) {
                        Some("relay") => {}
                        Some(other) => bail!("Unknown block '{}', expected 'relay'", other),
                        None => bail!("Block without a name, expected 'relay'"),
                    }
                    if found.is_some() { bail!("Only one relay block is supported"); }
                    found = Some((header.drain(1..).collect(), directives));
                    header.clear();
                }
                Token::Newline => {
                    if !header.is_empty() { bail!("Expected '{{' after '{}'", header.join(" ")); }
                    i += 1;
                }
                Token::CloseBrace => bail!("Unexpected '}}'"),
            }
        }
        if !header.is_empty() { bail!("Expected '{{' after '{}'", header.join(" ")); }
        found.ok_or_else(|| anyhow!("No relay block found"))
    }

    /// Parse a directive block starting at position i
    fn parse_block(tokens: &[Token], mut i: usize) -> Result<(Vec<Directive>, usize)> {
        let mut directives = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Newline => { i += 1; }
                Token::CloseBrace => { i += 1; return Ok((directives, i)); }
                Token::Text(name) => {
                    let name = name.clone(); i += 1;
                    let mut args = Vec::new();
                    while i < tokens.len() {
                        match &tokens[i] {
                            Token::Text(arg) => { args.push(arg.clone()); i += 1; }
                            Token::OpenBrace => bail!("Directive '{}' does not take a block", name),
                            Token::Newline | Token::CloseBrace => { break; }
                        }
                    }
                    directives.push(Directive { name, args });
                }
                Token::OpenBrace => bail!("Unexpected '{{'"),
            }
        }
        bail!("Unterminated block, missing '}}'")
    }
}

fn single_arg(d: &Directive) -> Result<&str> {
    match d.args.as_slice() {
        [arg] => Ok(arg),
        _ => bail!("{} expects exactly one argument, got {}", d.name, d.args.len()),
    }
}

/// Accepts `:port`, `ip:port` or a bare `ip` (port 53).
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr> {
    if let Some(port) = s.strip_prefix(':') {
        let port = port.parse().map_err(|_| anyhow!("invalid port in '{}'", s))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    parse_upstream_addr(s)
}

/// Accepts `ip:port` or a bare `ip` (port 53).
pub fn parse_upstream_addr(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() { return Ok(addr); }
    if let Ok(ip) = s.parse::<IpAddr>() { return Ok(SocketAddr::new(ip, DEFAULT_PORT)); }
    bail!("invalid address '{}'", s)
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') {
        let minutes: u64 = stripped.parse()?;
        let secs = minutes.checked_mul(60).ok_or_else(|| anyhow!("duration '{}' too large", s))?;
        Ok(Duration::from_secs(secs))
    }
    else { bail!("invalid duration '{}'", s) }
}
