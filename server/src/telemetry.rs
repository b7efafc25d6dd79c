//! Request statistics and memory metrics

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessesToUpdate, System};

/// Counters for a single route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub request_count: u64,
    pub request_bytes: u64,
}

/// Gateway request statistics since startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub start_time: DateTime<Utc>,
    pub request_count: u64,
    pub request_bytes: u64,
    pub routes: BTreeMap<String, RouteStats>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            request_count: 0,
            request_bytes: 0,
            routes: BTreeMap::new(),
        }
    }

    /// Count one request in the totals
    pub fn record_request(&mut self, bytes: u64) {
        self.request_count += 1;
        self.request_bytes += bytes;
    }

    /// Count one request against its route template
    pub fn record_route(&mut self, route: &str, bytes: u64) {
        let route = self.routes.entry(route.to_string()).or_default();
        route.request_count += 1;
        route.request_bytes += bytes;
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory usage in bytes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Resident memory of this process
    pub process_resident: u64,

    /// Virtual memory of this process
    pub process_virtual: u64,

    pub system_used: u64,
    pub system_total: u64,
}

/// Collect memory metrics
pub fn collect_memory_stats() -> MemoryStats {
    let mut sys = System::new();
    sys.refresh_memory();

    let mut stats = MemoryStats {
        system_used: sys.used_memory(),
        system_total: sys.total_memory(),
        ..Default::default()
    };

    if let Ok(pid) = sysinfo::get_current_pid() {
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = sys.process(pid) {
            stats.process_resident = process.memory();
            stats.process_virtual = process.virtual_memory();
        }
    }

    stats
}
