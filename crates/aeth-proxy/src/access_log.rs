//! Access-log tailing for blocked-request enumeration and stats (§4.8).
//! Squid's native log format puts the result/status code as the second
//! whitespace-separated field, e.g. `1690000000.123 234 172.16.0.2
//! TCP_DENIED/403 0 GET http://example.com/ - HIER_NONE/- -`.

use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BlockedRequest {
    pub timestamp: String,
    pub client_ip: String,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    pub total_requests: u64,
    pub blocked_count: u64,
    pub cache_hit_ratio: f64,
}

/// Scans the whole access log. Good enough for the bounded logs this
/// manages; a rotating/streaming tail is a natural follow-up once log
/// volume warrants it.
pub async fn read_access_log(path: &std::path::Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// `GetBlockedRequests(limit)`: the most recent `TCP_DENIED` / `/403 `
/// entries, newest first.
pub fn blocked_requests(lines: &[String], limit: usize) -> Vec<BlockedRequest> {
    lines
        .iter()
        .rev()
        .filter(|line| line.contains("TCP_DENIED") || line.contains("/403 "))
        .take(limit)
        .filter_map(|line| parse_line(line))
        .collect()
}

pub fn stats(lines: &[String]) -> ProxyStats {
    let total_requests = lines.len() as u64;
    let blocked_count = lines
        .iter()
        .filter(|line| line.contains("TCP_DENIED") || line.contains("/403 "))
        .count() as u64;
    let hits = lines.iter().filter(|line| line.contains("TCP_HIT")).count() as u64;
    let cache_hit_ratio = if total_requests == 0 {
        0.0
    } else {
        hits as f64 / total_requests as f64
    };
    ProxyStats {
        total_requests,
        blocked_count,
        cache_hit_ratio,
    }
}

pub fn uptime(started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - started_at).to_std().unwrap_or_default()
}

fn parse_line(line: &str) -> Option<BlockedRequest> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 7 {
        return None;
    }
    Some(BlockedRequest {
        timestamp: fields[0].to_string(),
        client_ip: fields[2].to_string(),
        url: fields[6].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lines() -> Vec<String> {
        vec![
            "1690000000.100 50 172.16.0.2 TCP_HIT/200 1024 GET http://github.com/ - HIER_NONE/- text/html".to_string(),
            "1690000000.200 30 172.16.0.2 TCP_DENIED/403 0 GET http://example.com/ - HIER_NONE/- -".to_string(),
            "1690000000.300 20 172.16.0.3 TCP_MISS/200 512 GET http://registry.npmjs.org/ - HIER_DIRECT/1.2.3.4 application/json".to_string(),
        ]
    }

    #[test]
    fn blocked_requests_picks_out_only_denied_entries() {
        let lines = sample_lines();
        let blocked = blocked_requests(&lines, 10);
        assert_eq!(blocked.len(), 1);
        assert!(blocked[0].url.contains("example.com"));
    }

    #[test]
    fn stats_counts_totals_and_hit_ratio() {
        let lines = sample_lines();
        let s = stats(&lines);
        assert_eq!(s.total_requests, 3);
        assert_eq!(s.blocked_count, 1);
        assert!((s.cache_hit_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_log_has_a_zero_hit_ratio_not_a_division_panic() {
        let s = stats(&[]);
        assert_eq!(s.total_requests, 0);
        assert_eq!(s.cache_hit_ratio, 0.0);
    }
}
