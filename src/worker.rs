//! The worker pool (C8): each worker owns one template queue and one data
//! queue for a shard of sensors, and always drains every pending template
//! before touching a data item. A flowset update and the next record that
//! depends on it always land on the same worker (hashed by sensor identity
//! + observation id), so "drain templates first" is enough to guarantee a
//! freshly-learned template is visible before any record that uses it is
//! decoded — no cross-worker synchronization needed.
//!
//! Grounded on the teacher's `threads::listener`/`threads::exporter` split
//! (one thread per concern, `crossbeam_channel`/`std::sync::mpsc` queues
//! between them); generalized from "one listener, one exporter" to "one
//! dispatcher, N decoding workers" per SPEC_FULL.md §4.2's "flows for a
//! given (sensor, observation domain) are processed in arrival order".

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::assembler;
use crate::context::Context;
use crate::metrics::Metrics;
use crate::sensors::{Observation, Sensor};
use crate::wire::template::Template;

/// Work handed to a worker thread. Template items carry an already-parsed
/// `Template`; data items carry the raw record bytes plus the template
/// they must be decoded against, resolved by the dispatcher (C1) before
/// handoff so a worker never has to look templates up itself.
pub enum WorkItem {
    Template { observation: Arc<Observation>, template: Arc<Template> },
    OptionTemplate { observation: Arc<Observation>, template: Arc<Template> },
    DataRecord {
        sensor: Arc<Sensor>,
        observation: Arc<Observation>,
        template: Arc<Template>,
        version: u16,
        export_time_secs: u32,
        bytes: Vec<u8>,
    },
    OptionRecord { observation: Arc<Observation>, template: Arc<Template>, bytes: Vec<u8> },
}

struct Worker {
    template_rx: Receiver<WorkItem>,
    data_rx: Receiver<WorkItem>,
    ctx: Arc<Context>,
    processed: Arc<AtomicU64>,
}

impl Worker {
    fn run(self) {
        loop {
            while let Ok(item) = self.template_rx.try_recv() {
                self.handle(item);
            }

            match self.data_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(item) => self.handle(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if self.template_rx.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    fn handle(&self, item: WorkItem) {
        match item {
            WorkItem::Template { observation, template } => {
                debug!("Learned template {} for observation {}", template.id, observation.id);
                observation.upsert_template(template.id, template);
            }
            WorkItem::OptionTemplate { observation, template } => {
                debug!("Learned option template {} for observation {}", template.id, observation.id);
                observation.upsert_template(template.id, template);
            }
            WorkItem::DataRecord { sensor, observation, template, version, export_time_secs, bytes } => {
                match assembler::assemble_data_record(version, export_time_secs, &template, &bytes, &sensor, &observation, &self.ctx) {
                    Ok((line, _consumed)) => {
                        Metrics::incr(&self.ctx.metrics.records_decoded);
                        if self.ctx.output.send_line(line, Duration::from_millis(50)) {
                            Metrics::incr(&self.ctx.metrics.lines_emitted);
                        }
                    }
                    Err(e) => {
                        warn!("Dropping malformed record for observation {}: {}", observation.id, e);
                        Metrics::incr(&self.ctx.metrics.records_dropped_length_mismatch);
                    }
                }
            }
            WorkItem::OptionRecord { observation, template, bytes } => {
                if let Err(e) = assembler::process_option_record(&template, &bytes, &observation) {
                    warn!("Dropping malformed option record for observation {}: {}", observation.id, e);
                    Metrics::incr(&self.ctx.metrics.records_dropped_length_mismatch);
                }
            }
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

struct WorkerHandle {
    template_tx: Sender<WorkItem>,
    data_tx: Sender<WorkItem>,
    processed: Arc<AtomicU64>,
}

/// Fans template/data items out across a fixed set of worker threads, one
/// per CPU-ish shard, keyed so the same (sensor, observation) pair always
/// lands on the same worker.
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn start(count: usize, queue_capacity: usize, ctx: Arc<Context>) -> Self {
        let count = count.max(1);
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let (template_tx, template_rx) = unbounded();
            let (data_tx, data_rx) = bounded(queue_capacity);
            let processed = Arc::new(AtomicU64::new(0));
            let worker = Worker { template_rx, data_rx, ctx: ctx.clone(), processed: processed.clone() };

            thread::Builder::new()
                .name(format!("Worker-{}", index))
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread");

            handles.push(WorkerHandle { template_tx, data_tx, processed });
        }

        WorkerPool { handles }
    }

    fn shard_for(&self, sensor: &Sensor, observation_id: u32) -> usize {
        let mut hasher = DefaultHasher::new();
        (sensor as *const Sensor as usize).hash(&mut hasher);
        observation_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.handles.len()
    }

    pub fn dispatch_template(&self, sensor: &Sensor, item: WorkItem) {
        let observation_id = match &item {
            WorkItem::Template { observation, .. } | WorkItem::OptionTemplate { observation, .. } => observation.id,
            _ => unreachable!("dispatch_template called with a non-template WorkItem"),
        };
        let shard = self.shard_for(sensor, observation_id);
        if self.handles[shard].template_tx.send(item).is_err() {
            warn!("Worker {} template queue is gone, dropping template", shard);
        }
    }

    pub fn dispatch_data(&self, sensor: &Sensor, item: WorkItem) -> bool {
        let observation_id = match &item {
            WorkItem::DataRecord { observation, .. } | WorkItem::OptionRecord { observation, .. } => observation.id,
            _ => unreachable!("dispatch_data called with a non-data WorkItem"),
        };
        let shard = self.shard_for(sensor, observation_id);
        match self.handles[shard].data_tx.try_send(item) {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    /// Sum of each worker's processed-item counter; used by tests to wait
    /// until an in-flight dispatch has actually been handled instead of
    /// sleeping a fixed duration.
    pub fn total_processed(&self) -> u64 {
        self.handles.iter().map(|h| h.processed.load(Ordering::Relaxed)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::geoip::NullGeoIp;
    use crate::enrichment::mac_db::{MacNameDb, MacVendorDb};
    use crate::enrichment::ptr_cache::PtrCache;
    use crate::enrichment::ptr_resolver;
    use crate::output::ChannelOutputSink;
    use crate::wire::template::TemplateField;
    use std::time::Instant;

    fn test_ctx() -> Arc<Context> {
        Arc::new(Context {
            mac_vendor_db: Arc::new(MacVendorDb::new()),
            mac_name_db: Arc::new(MacNameDb::new()),
            geoip: Arc::new(NullGeoIp),
            ptr_cache: Arc::new(PtrCache::new(Duration::from_secs(1), Duration::from_secs(1))),
            ptr_requester: ptr_resolver::spawn(Arc::new(PtrCache::new(Duration::from_secs(1), Duration::from_secs(1))), None),
            ptr_deadline: Duration::from_millis(1),
            output: Arc::new(ChannelOutputSink::stdout(16)),
            metrics: Arc::new(Metrics::default()),
        })
    }

    fn wait_for(pool: &WorkerPool, target: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.total_processed() < target {
            if Instant::now() > deadline {
                panic!("worker pool did not process expected items in time");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn template_learned_before_dependent_data_record_is_decoded() {
        let ctx = test_ctx();
        let pool = WorkerPool::start(2, 16, ctx);
        let sensor = Arc::new(Sensor::new("10.0.0.0/24".parse().unwrap()));
        let observation = sensor.get_or_create_observation(256);

        let fields = vec![TemplateField { enterprise: 0, field_id: 8, length: 4 }, TemplateField { enterprise: 0, field_id: 12, length: 4 }];
        let template = Arc::new(Template { id: 260, scope_field_count: 0, fields, fixed_length: 8 });

        pool.dispatch_template(&sensor, WorkItem::Template { observation: observation.clone(), template: template.clone() });

        let record = vec![1, 1, 1, 1, 2, 2, 2, 2];
        let dispatched = pool.dispatch_data(
            &sensor,
            WorkItem::DataRecord {
                sensor: sensor.clone(),
                observation: observation.clone(),
                template,
                version: 9,
                export_time_secs: 0,
                bytes: record,
            },
        );
        assert!(dispatched);

        wait_for(&pool, 2);
        assert!(observation.lookup_template(260).is_some());
    }
}
