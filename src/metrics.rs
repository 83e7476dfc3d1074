//! Bridge metrics for monitoring and observability.
//!
//! [`BridgeMetrics`] is a lock-free collector shared by both thread-world
//! contexts, the operation adapter and the wrapped-handle base. It can be
//! snapshotted into a serializable [`BridgeStats`] or exported in Prometheus
//! text format.

use crate::context::World;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the bridge counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// When the collector was created
    pub started_at: DateTime<Utc>,

    /// Milliseconds since `started_at`
    pub uptime_ms: i64,

    /// Work items accepted by the script context
    pub script_scheduled: u64,

    /// Work items executed by the script context
    pub script_processed: u64,

    /// Work items accepted by the native context
    pub native_scheduled: u64,

    /// Work items executed by the native context
    pub native_processed: u64,

    /// Blocking `perform` calls that completed
    pub performs: u64,

    /// Asynchronous operations started
    pub operations_started: u64,

    /// Asynchronous operations whose promise was resolved
    pub operations_resolved: u64,

    /// Asynchronous operations whose promise was rejected
    pub operations_rejected: u64,

    /// Wrappers constructed around native handles
    pub wrappers_created: u64,

    /// Handle releases posted to the native thread
    pub releases_deferred: u64,

    /// Handle releases performed inline
    pub releases_inline: u64,

    /// Usage counter 0→1 transitions
    pub usage_refs: u64,

    /// Usage counter 1→0 transitions
    pub usage_unrefs: u64,

    /// Rejections by native error domain
    pub errors_by_domain: HashMap<String, u64>,
}

/// Metrics collector shared across the runtime
#[derive(Debug)]
pub struct BridgeMetrics {
    started_at: DateTime<Utc>,
    script_scheduled: AtomicU64,
    script_processed: AtomicU64,
    native_scheduled: AtomicU64,
    native_processed: AtomicU64,
    performs: AtomicU64,
    operations_started: AtomicU64,
    operations_resolved: AtomicU64,
    operations_rejected: AtomicU64,
    wrappers_created: AtomicU64,
    releases_deferred: AtomicU64,
    releases_inline: AtomicU64,
    usage_refs: AtomicU64,
    usage_unrefs: AtomicU64,
    errors_by_domain: parking_lot::Mutex<HashMap<String, u64>>,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            script_scheduled: AtomicU64::new(0),
            script_processed: AtomicU64::new(0),
            native_scheduled: AtomicU64::new(0),
            native_processed: AtomicU64::new(0),
            performs: AtomicU64::new(0),
            operations_started: AtomicU64::new(0),
            operations_resolved: AtomicU64::new(0),
            operations_rejected: AtomicU64::new(0),
            wrappers_created: AtomicU64::new(0),
            releases_deferred: AtomicU64::new(0),
            releases_inline: AtomicU64::new(0),
            usage_refs: AtomicU64::new(0),
            usage_unrefs: AtomicU64::new(0),
            errors_by_domain: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn scheduled_counter(&self, world: World) -> &AtomicU64 {
        match world {
            World::Script => &self.script_scheduled,
            World::Native => &self.native_scheduled,
        }
    }

    fn processed_counter(&self, world: World) -> &AtomicU64 {
        match world {
            World::Script => &self.script_processed,
            World::Native => &self.native_processed,
        }
    }

    /// Record a work item accepted by a context
    pub fn record_scheduled(&self, world: World) {
        self.scheduled_counter(world).fetch_add(1, Ordering::Relaxed);
    }

    /// Record work items executed by a context
    pub fn record_processed(&self, world: World, count: u64) {
        self.processed_counter(world)
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record a completed `perform`
    pub fn record_perform(&self) {
        self.performs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation start
    pub fn record_operation_started(&self) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation resolved
    pub fn record_operation_resolved(&self) {
        self.operations_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation rejected, optionally with its native error domain
    pub fn record_operation_rejected(&self, domain: Option<&str>) {
        self.operations_rejected.fetch_add(1, Ordering::Relaxed);
        if let Some(domain) = domain {
            let mut counts = self.errors_by_domain.lock();
            *counts.entry(domain.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a wrapper construction
    pub fn record_wrapper_created(&self) {
        self.wrappers_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handle release, either posted to the native thread or inline
    pub fn record_release(&self, deferred: bool) {
        if deferred {
            self.releases_deferred.fetch_add(1, Ordering::Relaxed);
        } else {
            self.releases_inline.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a usage counter transition (`true` for 0→1)
    pub fn record_usage_transition(&self, referenced: bool) {
        if referenced {
            self.usage_refs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.usage_unrefs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Work items accepted by a context
    pub fn scheduled(&self, world: World) -> u64 {
        self.scheduled_counter(world).load(Ordering::Relaxed)
    }

    /// Work items executed by a context
    pub fn processed(&self, world: World) -> u64 {
        self.processed_counter(world).load(Ordering::Relaxed)
    }

    /// Completed `perform` calls
    pub fn performs(&self) -> u64 {
        self.performs.load(Ordering::Relaxed)
    }

    /// Operations started
    pub fn operations_started(&self) -> u64 {
        self.operations_started.load(Ordering::Relaxed)
    }

    /// Operations resolved
    pub fn operations_resolved(&self) -> u64 {
        self.operations_resolved.load(Ordering::Relaxed)
    }

    /// Operations rejected
    pub fn operations_rejected(&self) -> u64 {
        self.operations_rejected.load(Ordering::Relaxed)
    }

    /// Operations that have started but not settled
    pub fn operations_in_flight(&self) -> u64 {
        self.operations_started()
            .saturating_sub(self.operations_resolved() + self.operations_rejected())
    }

    /// Rejection counts by native error domain
    pub fn errors_by_domain(&self) -> HashMap<String, u64> {
        self.errors_by_domain.lock().clone()
    }

    /// Take a serializable snapshot
    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            started_at: self.started_at,
            uptime_ms: (Utc::now() - self.started_at).num_milliseconds(),
            script_scheduled: self.scheduled(World::Script),
            script_processed: self.processed(World::Script),
            native_scheduled: self.scheduled(World::Native),
            native_processed: self.processed(World::Native),
            performs: self.performs(),
            operations_started: self.operations_started(),
            operations_resolved: self.operations_resolved(),
            operations_rejected: self.operations_rejected(),
            wrappers_created: self.wrappers_created.load(Ordering::Relaxed),
            releases_deferred: self.releases_deferred.load(Ordering::Relaxed),
            releases_inline: self.releases_inline.load(Ordering::Relaxed),
            usage_refs: self.usage_refs.load(Ordering::Relaxed),
            usage_unrefs: self.usage_unrefs.load(Ordering::Relaxed),
            errors_by_domain: self.errors_by_domain(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.script_scheduled,
            &self.script_processed,
            &self.native_scheduled,
            &self.native_processed,
            &self.performs,
            &self.operations_started,
            &self.operations_resolved,
            &self.operations_rejected,
            &self.wrappers_created,
            &self.releases_deferred,
            &self.releases_inline,
            &self.usage_refs,
            &self.usage_unrefs,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.errors_by_domain.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let stats = self.snapshot();
        let mut output = String::new();

        output.push_str("# HELP worldbridge_work_items_total Work items by context and stage\n");
        output.push_str("# TYPE worldbridge_work_items_total counter\n");
        for (world, stage, value) in [
            ("script", "scheduled", stats.script_scheduled),
            ("script", "processed", stats.script_processed),
            ("native", "scheduled", stats.native_scheduled),
            ("native", "processed", stats.native_processed),
        ] {
            output.push_str(&format!(
                "worldbridge_work_items_total{{world=\"{}\",stage=\"{}\"}} {}\n",
                world, stage, value
            ));
        }

        output.push_str("\n# HELP worldbridge_performs_total Completed blocking performs\n");
        output.push_str("# TYPE worldbridge_performs_total counter\n");
        output.push_str(&format!("worldbridge_performs_total {}\n", stats.performs));

        output.push_str("\n# HELP worldbridge_operations_total Asynchronous operations by outcome\n");
        output.push_str("# TYPE worldbridge_operations_total counter\n");
        for (status, value) in [
            ("started", stats.operations_started),
            ("resolved", stats.operations_resolved),
            ("rejected", stats.operations_rejected),
        ] {
            output.push_str(&format!(
                "worldbridge_operations_total{{status=\"{}\"}} {}\n",
                status, value
            ));
        }

        output.push_str("\n# HELP worldbridge_wrappers_created_total Wrapped handles constructed\n");
        output.push_str("# TYPE worldbridge_wrappers_created_total counter\n");
        output.push_str(&format!(
            "worldbridge_wrappers_created_total {}\n",
            stats.wrappers_created
        ));

        output.push_str("\n# HELP worldbridge_handle_releases_total Handle releases by route\n");
        output.push_str("# TYPE worldbridge_handle_releases_total counter\n");
        output.push_str(&format!(
            "worldbridge_handle_releases_total{{route=\"deferred\"}} {}\n",
            stats.releases_deferred
        ));
        output.push_str(&format!(
            "worldbridge_handle_releases_total{{route=\"inline\"}} {}\n",
            stats.releases_inline
        ));

        output.push_str("\n# HELP worldbridge_usage_transitions_total Script loop ref/unref transitions\n");
        output.push_str("# TYPE worldbridge_usage_transitions_total counter\n");
        output.push_str(&format!(
            "worldbridge_usage_transitions_total{{direction=\"ref\"}} {}\n",
            stats.usage_refs
        ));
        output.push_str(&format!(
            "worldbridge_usage_transitions_total{{direction=\"unref\"}} {}\n",
            stats.usage_unrefs
        ));

        // Errors
        output.push_str("\n# HELP worldbridge_errors_total Rejections by native error domain\n");
        output.push_str("# TYPE worldbridge_errors_total counter\n");
        for (domain, count) in stats.errors_by_domain {
            output.push_str(&format!(
                "worldbridge_errors_total{{domain=\"{}\"}} {}\n",
                domain, count
            ));
        }

        output
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
