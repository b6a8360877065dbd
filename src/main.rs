use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

mod assembler;
mod context;
mod enrichment;
mod errors;
mod flow_cache;
mod logger;
mod metrics;
mod sensors;
mod settings;
mod threads;
mod wire;
mod worker;

use context::Context;
use enrichment::geoip::NullGeoIp;
use enrichment::mac_db::{MacNameDb, MacVendorDb};
use enrichment::ptr_cache::PtrCache;
use enrichment::ptr_resolver::{self, PtrRequester};
use metrics::Metrics;
use output::{ChannelOutputSink, MeteredOutputSink, OutputSink};
use sensors::SensorsDb;
use wire::template::{self, TemplateScope};
use worker::WorkerPool;

mod output;

#[derive(Debug, StructOpt)]
struct Opts {
    /// Path to a config file (toml/yaml/json, anything the `config` crate reads); falls back to built-in defaults plus APP__ env vars
    #[structopt(short = "-c", long = "--config")]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[structopt(long = "--log")]
    log_level: Option<String>,

    /// Overrides the configured UDP listener address
    #[structopt(short = "-l", long = "--listener")]
    listener: Option<SocketAddr>,

    /// Overrides the configured Prometheus listener address and enables it
    #[structopt(short = "-e", long = "--exporter")]
    exporter: Option<SocketAddr>,
}

fn main() {
    let opts = Opts::from_args();

    let settings = match settings::Settings::init(opts.config.clone()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    logger::init(opts.log_level.as_deref().unwrap_or(&settings.log.level));
    info!("Starting flow collector");

    let metrics = Arc::new(Metrics::default());

    let sensors_db = Arc::new(load_sensors(&settings.sensors_file));
    restore_templates(&sensors_db, &settings.persistence.template_dump_path, &metrics);

    let ptr_cache = Arc::new(PtrCache::new(Duration::from_secs(settings.ptr.positive_ttl_secs), Duration::from_secs(settings.ptr.negative_ttl_secs)));
    let ptr_requester: PtrRequester = if settings.ptr.enable {
        ptr_resolver::spawn(ptr_cache.clone(), settings.ptr.resolver_host.clone())
    } else {
        PtrRequester::disabled()
    };

    let output: Arc<dyn OutputSink> = Arc::new(MeteredOutputSink::new(ChannelOutputSink::stdout(settings.workers.queue_capacity), metrics.clone()));

    let ctx = Arc::new(Context {
        mac_vendor_db: Arc::new(MacVendorDb::new()),
        mac_name_db: Arc::new(MacNameDb::new()),
        geoip: Arc::new(NullGeoIp),
        ptr_cache,
        ptr_requester,
        ptr_deadline: Duration::from_millis(settings.ptr.deadline_ms),
        output,
        metrics: metrics.clone(),
    });

    let pool = Arc::new(WorkerPool::start(settings.workers.count, settings.workers.queue_capacity, ctx.clone()));
    let running = Arc::new(AtomicBool::new(true));

    let mut threads = Vec::new();

    let listener_addr = opts.listener.unwrap_or_else(|| settings.listener.host.parse().expect("configured listener.host is not a valid socket address"));
    {
        let sensors_db = sensors_db.clone();
        let pool = pool.clone();
        let metrics = metrics.clone();
        let running = running.clone();
        threads.push(
            thread::Builder::new()
                .name("Listener".to_string())
                .spawn(move || threads::listener::listen(listener_addr, sensors_db, pool, metrics, running))
                .expect("failed to spawn Listener thread"),
        );
    }

    let prometheus_addr = opts.exporter.or_else(|| if settings.prometheus.enable { settings.prometheus.host.parse().ok() } else { None });
    if let Some(addr) = prometheus_addr {
        let metrics = metrics.clone();
        threads.push(
            thread::Builder::new()
                .name("Prometheus".to_string())
                .spawn(move || threads::prometheus::listen(addr, metrics))
                .expect("failed to spawn Prometheus thread"),
        );
    }

    {
        let sensors_db = sensors_db.clone();
        let metrics = metrics.clone();
        let dump_path = settings.persistence.template_dump_path.clone();
        let interval = Duration::from_secs(settings.persistence.dump_interval_secs.max(1));
        threads.push(
            thread::Builder::new()
                .name("TemplateDump".to_string())
                .spawn(move || template_dump_loop(sensors_db, dump_path, interval, metrics))
                .expect("failed to spawn TemplateDump thread"),
        );
    }

    for t in threads {
        let _ = t.join();
    }

    info!("Flow collector shutting down");
}

fn load_sensors(path: &str) -> SensorsDb {
    match sensors::config::load_from_file(Path::new(path)) {
        Ok(db) => {
            info!("Loaded {} sensors from {}", db.len(), path);
            db
        }
        Err(e) => {
            error!("Failed to load sensors file {}: {}; starting with no sensors configured", path, e);
            SensorsDb::new()
        }
    }
}

fn restore_templates(sensors_db: &SensorsDb, dump_path: &str, metrics: &Metrics) {
    let path = Path::new(dump_path);
    if !path.exists() {
        return;
    }

    match template::read_dump_file(path) {
        Ok(entries) => {
            let mut restored = 0usize;
            for (scope, tmpl) in entries {
                match sensors_db.get(scope.sensor_ip) {
                    Some(sensor) => {
                        sensor.get_or_create_observation(scope.observation_id).upsert_template(tmpl.id, Arc::new(tmpl));
                        restored += 1;
                    }
                    None => warn!("Dropping restored template {} for unknown sensor {}", tmpl.id, scope.sensor_ip),
                }
            }
            Metrics::incr(&metrics.template_dump_restores);
            info!("Restored {} templates from {}", restored, dump_path);
        }
        Err(e) => {
            warn!("Failed to restore template dump {}: {}, starting with no prior templates", dump_path, e);
            Metrics::incr(&metrics.reload_failures);
        }
    }
}

fn template_dump_loop(sensors_db: Arc<SensorsDb>, dump_path: String, interval: Duration, metrics: Arc<Metrics>) {
    loop {
        thread::sleep(interval);

        let mut entries = Vec::new();
        for sensor in sensors_db.all() {
            let sensor_ip = sensor.cidr.network();
            for obs_id in sensor.observation_ids() {
                if let Some(obs) = sensor.get_observation(obs_id) {
                    for (_, tmpl) in obs.templates_snapshot() {
                        entries.push((TemplateScope { sensor_ip, observation_id: obs_id }, tmpl));
                    }
                }
            }
        }

        let refs = entries.iter().map(|(scope, tmpl)| (*scope, tmpl.as_ref()));
        match template::write_dump_file(Path::new(&dump_path), refs) {
            Ok(count) => {
                Metrics::incr(&metrics.template_dump_writes);
                info!("Dumped {} templates to {}", count, dump_path);
            }
            Err(e) => error!("Failed to write template dump {}: {}", dump_path, e),
        }
    }
}
