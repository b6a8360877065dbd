use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide operational counters. Every field is an independently
/// incrementable counter so no lock is ever needed to update one; the
/// Prometheus endpoint (`threads::prometheus`) takes an immutable snapshot
/// to render the exposition text.
#[derive(Default)]
pub struct Metrics {
    pub datagrams_received: AtomicU64,
    pub datagrams_dropped_malformed: AtomicU64,
    pub flowsets_dropped_missing_template: AtomicU64,
    pub records_decoded: AtomicU64,
    pub records_dropped_length_mismatch: AtomicU64,
    pub lines_emitted: AtomicU64,
    pub output_queue_full_drops: AtomicU64,
    pub ptr_deadline_misses: AtomicU64,
    pub ptr_cache_hits: AtomicU64,
    pub ptr_cache_misses: AtomicU64,
    pub reload_failures: AtomicU64,
    pub template_dump_writes: AtomicU64,
    pub template_dump_restores: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the current values as Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut push = |name: &str, value: u64| {
            out.push_str("# TYPE ");
            out.push_str(name);
            out.push_str(" counter\n");
            out.push_str(name);
            out.push(' ');
            out.push_str(&value.to_string());
            out.push('\n');
        };

        push("flowcollector_datagrams_received_total", self.datagrams_received.load(Ordering::Relaxed));
        push("flowcollector_datagrams_dropped_malformed_total", self.datagrams_dropped_malformed.load(Ordering::Relaxed));
        push("flowcollector_flowsets_dropped_missing_template_total", self.flowsets_dropped_missing_template.load(Ordering::Relaxed));
        push("flowcollector_records_decoded_total", self.records_decoded.load(Ordering::Relaxed));
        push("flowcollector_records_dropped_length_mismatch_total", self.records_dropped_length_mismatch.load(Ordering::Relaxed));
        push("flowcollector_lines_emitted_total", self.lines_emitted.load(Ordering::Relaxed));
        push("flowcollector_output_queue_full_drops_total", self.output_queue_full_drops.load(Ordering::Relaxed));
        push("flowcollector_ptr_deadline_misses_total", self.ptr_deadline_misses.load(Ordering::Relaxed));
        push("flowcollector_ptr_cache_hits_total", self.ptr_cache_hits.load(Ordering::Relaxed));
        push("flowcollector_ptr_cache_misses_total", self.ptr_cache_misses.load(Ordering::Relaxed));
        push("flowcollector_reload_failures_total", self.reload_failures.load(Ordering::Relaxed));
        push("flowcollector_template_dump_writes_total", self.template_dump_writes.load(Ordering::Relaxed));
        push("flowcollector_template_dump_restores_total", self.template_dump_restores.load(Ordering::Relaxed));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_all_counters() {
        let m = Metrics::default();
        Metrics::incr(&m.datagrams_received);
        Metrics::incr(&m.datagrams_received);

        let text = m.render();
        assert!(text.contains("flowcollector_datagrams_received_total 2"));
        assert!(text.contains("flowcollector_lines_emitted_total 0"));
    }
}
