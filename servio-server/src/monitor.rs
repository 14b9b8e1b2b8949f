//! Best-effort host and per-unit resource sampling.
//!
//! Host CPU is a derivative of the kernel's aggregate counters sampled
//! 500 ms apart. Per-unit CPU is a derivative of systemd's cumulative
//! `CPUUsageNSec` between calls, tracked in a per-unit sample cache that
//! is owned by the monitor (not a hidden global) so tests can drive it
//! deterministically.

use serde::Serialize;
use servio_utils::process;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Host-wide and per-unit statistics returned by `GET /api/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    /// GB
    pub memory_total: f64,
    /// GB
    pub memory_used: f64,
    pub disk_usage: f64,
    /// GB
    pub disk_total: f64,
    /// GB
    pub disk_used: f64,
    pub uptime: String,
    pub os_name: String,
    pub os_version: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub services: HashMap<String, ServiceStat>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStat {
    /// MB
    pub memory_usage: f64,
    /// Percent; 100 means one core saturated.
    pub cpu_usage: f64,
    pub active_state: String,
}

struct CpuSample {
    ns: u64,
    at: Instant,
}

pub struct Monitor {
    systemctl_bin: String,
    cpu_samples: Mutex<HashMap<String, CpuSample>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            systemctl_bin: "systemctl".to_string(),
            cpu_samples: Mutex::new(HashMap::new()),
        }
    }

    /// Collects a full sample. Per-unit stats are gathered only when
    /// unit names are supplied. Every probe is best-effort: missing
    /// kernel files or commands degrade to zeroes, never to errors.
    pub async fn get_stats(&self, unit_names: &[String]) -> Stats {
        let (disk_usage, disk_total, disk_used) = disk().await;
        let (memory_usage, memory_total, memory_used) =
            parse_meminfo(&read_or_empty("/proc/meminfo").await);
        let (os_name, os_version) = parse_os_release(&read_or_empty("/etc/os-release").await);

        let mut stats = Stats {
            cpu_usage: host_cpu().await,
            memory_usage,
            memory_total,
            memory_used,
            disk_usage,
            disk_total,
            disk_used,
            uptime: parse_uptime(&read_or_empty("/proc/uptime").await),
            os_name,
            os_version,
            services: HashMap::new(),
        };

        for unit in unit_names {
            stats
                .services
                .insert(unit.clone(), self.unit_stat(unit).await);
        }

        stats
    }

    async fn unit_stat(&self, unit: &str) -> ServiceStat {
        let out = process::run(
            &self.systemctl_bin,
            &[
                "show",
                unit,
                "-p",
                "CPUUsageNSec,MemoryCurrent,ActiveState",
            ],
        )
        .await;

        let mut stat = ServiceStat::default();
        let mut cpu_ns: u64 = 0;

        for line in out.stdout.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "ActiveState" => stat.active_state = value.to_string(),
                "MemoryCurrent" if value != "[not set]" => {
                    let bytes: u64 = value.parse().unwrap_or(0);
                    stat.memory_usage = bytes as f64 / 1024.0 / 1024.0;
                }
                "CPUUsageNSec" if value != "[not set]" => {
                    cpu_ns = value.parse().unwrap_or(0);
                }
                _ => {}
            }
        }

        stat.cpu_usage = self.cpu_percent(unit, cpu_ns, Instant::now());
        stat
    }

    /// The per-unit CPU derivative: percent of one core used between the
    /// previous observation and this one. The first observation of a
    /// unit (or a counter that went backwards) yields 0 and primes the
    /// cache.
    fn cpu_percent(&self, unit: &str, ns_now: u64, now: Instant) -> f64 {
        let mut cache = self.cpu_samples.lock().unwrap();

        let percent = match cache.get(unit) {
            Some(prev) => {
                let elapsed_ns = now.duration_since(prev.at).as_nanos();
                if elapsed_ns > 0 && ns_now >= prev.ns {
                    (ns_now - prev.ns) as f64 / elapsed_ns as f64 * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        cache.insert(unit.to_string(), CpuSample { ns: ns_now, at: now });
        percent
    }
}

async fn read_or_empty(path: &str) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

/// Busy-delta over total-delta of `/proc/stat`, sampled 500 ms apart.
async fn host_cpu() -> f64 {
    let first = parse_cpu_line(&read_or_empty("/proc/stat").await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let second = parse_cpu_line(&read_or_empty("/proc/stat").await);

    match (first, second) {
        (Some((t1, i1)), Some((t2, i2))) => cpu_usage_between(t1, i1, t2, i2),
        _ => 0.0,
    }
}

/// Parses the aggregate `cpu` line into (total, idle+iowait) jiffies.
fn parse_cpu_line(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().next()?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 || fields[0] != "cpu" {
        return None;
    }

    let total: u64 = fields[1..]
        .iter()
        .filter_map(|f| f.parse::<u64>().ok())
        .sum();
    let idle: u64 = fields[4].parse().ok()?;
    let iowait: u64 = fields[5].parse().ok()?;

    Some((total, idle + iowait))
}

fn cpu_usage_between(t1: u64, i1: u64, t2: u64, i2: u64) -> f64 {
    if t2 <= t1 {
        return 0.0;
    }
    let total = (t2 - t1) as f64;
    let idle = i2.saturating_sub(i1) as f64;
    ((total - idle) / total * 100.0).max(0.0)
}

/// Parses `/proc/meminfo` into (usage %, total GB, used GB). Prefers
/// `MemAvailable`, falling back to `MemFree` on old kernels.
fn parse_meminfo(meminfo: &str) -> (f64, f64, f64) {
    let mut total: u64 = 0;
    let mut available: u64 = 0;
    let mut free: u64 = 0;

    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("MemTotal:") => total = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            Some("MemAvailable:") => {
                available = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            Some("MemFree:") => free = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
            _ => {}
        }
    }

    if total == 0 {
        return (0.0, 0.0, 0.0);
    }
    let available = if available > 0 { available } else { free };
    let used = total - available;

    (
        used as f64 / total as f64 * 100.0,
        total as f64 / 1024.0 / 1024.0,
        used as f64 / 1024.0 / 1024.0,
    )
}

/// Root filesystem usage via `df -k /`: (usage %, total GB, used GB).
async fn disk() -> (f64, f64, f64) {
    let out = process::run("df", &["-k", "/"]).await;
    if !out.success {
        return (0.0, 0.0, 0.0);
    }
    parse_df(&out.stdout)
}

fn parse_df(df: &str) -> (f64, f64, f64) {
    let Some(line) = df.lines().nth(1) else {
        return (0.0, 0.0, 0.0);
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return (0.0, 0.0, 0.0);
    }

    let total_kb: f64 = fields[1].parse().unwrap_or(0.0);
    let used_kb: f64 = fields[2].parse().unwrap_or(0.0);
    let usage: f64 = fields[4].trim_end_matches('%').parse().unwrap_or(0.0);

    (usage, total_kb / 1024.0 / 1024.0, used_kb / 1024.0 / 1024.0)
}

fn parse_uptime(uptime: &str) -> String {
    let seconds: f64 = uptime
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    if seconds == 0.0 {
        return "unknown".to_string();
    }
    format_uptime(seconds)
}

fn format_uptime(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let days = hours / 24;
    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else {
        format!("{hours}h")
    }
}

fn parse_os_release(contents: &str) -> (String, String) {
    let mut name = String::new();
    let mut version = String::new();

    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("NAME=") {
            name = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            version = value.trim_matches('"').to_string();
        }
    }

    if name.is_empty() {
        name = "Linux".to_string();
    }
    (name, version)
}
