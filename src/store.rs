//! File-backed record store mapping domain names to IPv4 addresses.
//!
//! One mapping per line: `<domain> <ipv4> [<ipv4> ...]`. Lines are only
//! ever appended, so entries are never reordered or removed.

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store {path} unavailable: {source}")]
    StoreUnavailable { path: PathBuf, source: std::io::Error },
}

pub struct RecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Addresses known for `name`, in file order. Empty when unknown or
    /// when the backing file cannot be read.
    pub async fn lookup(&self, name: &str) -> Vec<Ipv4Addr> {
        match self.try_lookup(name).await {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::warn!("{}, treating '{}' as a miss", e, name);
                Vec::new()
            }
        }
    }

    /// Appends `addr` for `name` unless already present. Returns whether a
    /// line was written.
    pub async fn record(&self, name: &str, addr: Ipv4Addr) -> bool {
        self.record_all(name, &[addr]).await > 0
    }

    /// Records every address not yet known for `name` under one lock.
    /// Returns how many were appended.
    pub async fn record_all(&self, name: &str, addrs: &[Ipv4Addr]) -> usize {
        let _guard = self.write_lock.lock().await;
        match self.try_record_all(name, addrs).await {
            Ok(added) => added,
            Err(e) => {
                tracing::warn!("{}, dropping {} address(es) for '{}'", e, addrs.len(), name);
                0
            }
        }
    }

    async fn try_lookup(&self, name: &str) -> Result<Vec<Ipv4Addr>, StoreError> {
        if !storable(name) { return Ok(Vec::new()); }
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(e)),
        };
        let mut addrs = Vec::new();
        for (domain, line_addrs) in content.lines().filter_map(parse_line) {
            if !names_equal(domain, name) { continue; }
            for addr in line_addrs {
                if !addrs.contains(&addr) { addrs.push(addr); }
            }
        }
        Ok(addrs)
    }

    async fn try_record_all(&self, name: &str, addrs: &[Ipv4Addr]) -> Result<usize, StoreError> {
        if !storable(name) {
            tracing::warn!("[store] Refusing to record {:?}: not a single presentation-form token", name);
            return Ok(0);
        }
        let known = self.try_lookup(name).await?;
        let mut fresh: Vec<Ipv4Addr> = Vec::new();
        for addr in addrs {
            if !known.contains(addr) && !fresh.contains(addr) { fresh.push(*addr); }
        }
        if fresh.is_empty() { return Ok(0); }

        let mut lines = String::new();
        for addr in &fresh {
            lines.push_str(&format!("{} {}\n", name, addr));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.unavailable(e))?;
        file.write_all(lines.as_bytes()).await.map_err(|e| self.unavailable(e))?;
        file.flush().await.map_err(|e| self.unavailable(e))?;

        tracing::info!("[store] Learned {} new address(es) for '{}'", fresh.len(), name);
        Ok(fresh.len())
    }

    fn unavailable(&self, source: std::io::Error) -> StoreError {
        StoreError::StoreUnavailable { path: self.path.clone(), source }
    }
}

fn parse_line(line: &str) -> Option<(&str, Vec<Ipv4Addr>)> {
    let line = line.split('#').next().unwrap_or("").trim();
    let mut tokens = line.split_whitespace();
    let domain = tokens.next()?;
    let addrs = tokens.filter_map(|t| t.parse().ok()).collect();
    Some((domain.trim_end_matches('.'), addrs))
}

/// A name survives the line format only as one token without a comment marker.
fn storable(name: &str) -> bool {
    !name.is_empty() && !name.contains('#') && !name.contains(char::is_whitespace)
}

fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b.trim_end_matches('.'))
}
