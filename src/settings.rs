use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Listener {
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Prometheus {
    pub enable: bool,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Workers {
    /// Number of worker threads; each owns its own template/data queue pair.
    pub count: usize,
    /// Bound on the data-flowset queue before the dispatcher applies backpressure.
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Ptr {
    pub enable: bool,
    pub resolver_host: Option<String>,
    pub deadline_ms: u64,
    pub positive_ttl_secs: u64,
    pub negative_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Persistence {
    pub template_dump_path: String,
    pub dump_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log: Log,
    pub listener: Listener,
    pub prometheus: Prometheus,
    pub workers: Workers,
    pub ptr: Ptr,
    pub persistence: Persistence,
    pub sensors_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log: Log { level: "info".to_string() },
            listener: Listener { host: "0.0.0.0:9995".to_string() },
            prometheus: Prometheus { enable: false, host: "0.0.0.0:9091".to_string() },
            workers: Workers { count: 4, queue_capacity: 4096 },
            ptr: Ptr {
                enable: true,
                resolver_host: None,
                deadline_ms: 50,
                positive_ttl_secs: 3600,
                negative_ttl_secs: 60,
            },
            persistence: Persistence {
                template_dump_path: "./templates.dump".to_string(),
                dump_interval_secs: 60,
            },
            sensors_file: "./config/sensors.json".to_string(),
        }
    }
}

impl Settings {
    pub fn init(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = Config::new();

        // the defaults are expressed as a struct (not an on-disk file) so the
        // app can run without any configuration at all
        let defaults = Settings::default();
        s.set_default("log.level", defaults.log.level)?;
        s.set_default("listener.host", defaults.listener.host)?;
        s.set_default("prometheus.enable", defaults.prometheus.enable)?;
        s.set_default("prometheus.host", defaults.prometheus.host)?;
        s.set_default("workers.count", defaults.workers.count as i64)?;
        s.set_default("workers.queue_capacity", defaults.workers.queue_capacity as i64)?;
        s.set_default("ptr.enable", defaults.ptr.enable)?;
        s.set_default("ptr.deadline_ms", defaults.ptr.deadline_ms as i64)?;
        s.set_default("ptr.positive_ttl_secs", defaults.ptr.positive_ttl_secs as i64)?;
        s.set_default("ptr.negative_ttl_secs", defaults.ptr.negative_ttl_secs as i64)?;
        s.set_default("persistence.template_dump_path", defaults.persistence.template_dump_path)?;
        s.set_default("persistence.dump_interval_secs", defaults.persistence.dump_interval_secs as i64)?;
        s.set_default("sensors_file", defaults.sensors_file)?;

        // surcharge the default config with the user config, then env vars
        if let Some(path) = config_file {
            s.merge(File::from(path))?;
        } else {
            println!("No config provided, launching the app with the default configuration");
        }
        s.merge(Environment::with_prefix("APP").separator("__"))?;

        s.try_into()
    }
}
