//! UDP datagram reader and flowset dispatcher (C1). Reads one datagram at a
//! time, classifies its flowsets, and hands each template or data record off
//! to the worker pool. Never decodes a data record itself — that stays with
//! `assembler`/`worker`, run on the sensor's assigned worker thread.
//!
//! Grounded on the teacher's `threads::listener::listen`: one `UdpSocket`,
//! one receive loop, fixed 1500-byte buffer reused across iterations.

use log::{debug, error, trace, warn};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::sensors::{Observation, Sensor, SensorsDb};
use crate::wire::template::Template;
use crate::wire::{self, DatagramHeader, FlowSetHeader, FlowSetKind, VERSION_V5};
use crate::worker::{WorkItem, WorkerPool};

/// Runs the receive loop until `running` is cleared. A short read timeout
/// keeps the socket call from blocking forever so a shutdown request is
/// noticed promptly.
pub fn listen(addr: SocketAddr, sensors: Arc<SensorsDb>, pool: Arc<WorkerPool>, metrics: Arc<Metrics>, running: Arc<AtomicBool>) {
    let socket = UdpSocket::bind(addr).unwrap_or_else(|e| panic!("failed to bind UDP socket to {}: {}", addr, e));
    socket.set_read_timeout(Some(Duration::from_millis(500))).expect("failed to set socket read timeout");

    log::info!("Listening for NetFlow/IPFIX datagrams on {}", addr);

    let mut buf = [0u8; 1500];
    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                error!("Failed to read from UDP socket: {}", e);
                continue;
            }
        };
        trace!("Received {} bytes from {}", len, from);
        Metrics::incr(&metrics.datagrams_received);

        let sensor = match sensors.get(from.ip()) {
            Some(sensor) => sensor,
            None => {
                warn!("Dropping datagram from unconfigured sensor {}", from.ip());
                Metrics::incr(&metrics.datagrams_dropped_malformed);
                continue;
            }
        };

        if let Err(e) = dispatch_datagram(&buf[..len], &sensor, &pool, &metrics) {
            warn!("Dropping malformed datagram from {}: {}", from, e);
            Metrics::incr(&metrics.datagrams_dropped_malformed);
        }
    }

    log::info!("Listener on {} shutting down", addr);
}

fn dispatch_datagram(buf: &[u8], sensor: &Arc<Sensor>, pool: &Arc<WorkerPool>, metrics: &Arc<Metrics>) -> Result<(), String> {
    let (header, consumed) = DatagramHeader::read(buf)?;

    if header.version == VERSION_V5 {
        return dispatch_v5(buf, consumed, &header, sensor, pool);
    }

    let observation = sensor.get_or_create_observation(header.observation_id);
    let mut offset = consumed;

    while offset + FlowSetHeader::SIZE <= buf.len() {
        let set = FlowSetHeader::read(&buf[offset..])?;
        let content_start = offset + FlowSetHeader::SIZE;
        let content_end = offset + set.length as usize;
        if content_end > buf.len() {
            return Err(format!("flowset declares length {} extending past the datagram", set.length));
        }

        match wire::classify(header.version, set.id) {
            FlowSetKind::Template => dispatch_templates(&buf[content_start..content_end], &observation, sensor, pool, false)?,
            FlowSetKind::OptionTemplate => dispatch_templates(&buf[content_start..content_end], &observation, sensor, pool, true)?,
            FlowSetKind::Data(set_id) => dispatch_data(&buf[content_start..content_end], set_id, &header, &observation, sensor, pool, metrics),
        }

        offset = content_end;
    }

    Ok(())
}

fn dispatch_templates(mut buf: &[u8], observation: &Arc<Observation>, sensor: &Arc<Sensor>, pool: &Arc<WorkerPool>, is_option: bool) -> Result<(), String> {
    // Set content is padded out to a 4-byte boundary; stop once fewer bytes
    // remain than the smallest possible template record.
    const MIN_TEMPLATE_RECORD: usize = 4;
    while buf.len() >= MIN_TEMPLATE_RECORD {
        let (template, consumed) = if is_option { Template::read_option(buf)? } else { Template::read_data(buf)? };
        debug!(
            "Received {} template {} from {:?} observation {}",
            if is_option { "option" } else { "regular" },
            template.id,
            sensor.cidr,
            observation.id
        );

        let template = Arc::new(template);

        // Applied synchronously, right here on the listener thread, rather
        // than left for the worker to apply off `WorkItem::Template`: a
        // datagram carrying both a template and data depending on it needs
        // that template visible to `lookup_template` below *in this same
        // dispatch pass*, before the data flowset a few bytes later in the
        // same buffer is ever looked up. The worker's template queue still
        // gets the item too, for its own template-dump/logging bookkeeping;
        // `upsert_template` is idempotent so applying it twice is harmless.
        observation.upsert_template(template.id, template.clone());

        let item = if is_option {
            WorkItem::OptionTemplate { observation: observation.clone(), template }
        } else {
            WorkItem::Template { observation: observation.clone(), template }
        };
        pool.dispatch_template(sensor, item);

        buf = &buf[consumed..];
    }
    Ok(())
}

fn dispatch_data(mut buf: &[u8], set_id: u16, header: &DatagramHeader, observation: &Arc<Observation>, sensor: &Arc<Sensor>, pool: &Arc<WorkerPool>, metrics: &Arc<Metrics>) {
    let template = match observation.lookup_template(set_id) {
        Some(t) => t,
        None => {
            warn!("No template {} known yet for observation {}, dropping data flowset", set_id, observation.id);
            Metrics::incr(&metrics.flowsets_dropped_missing_template);
            return;
        }
    };

    while !buf.is_empty() {
        let record_len = match template.record_length(buf) {
            Ok(len) => len,
            Err(e) => {
                warn!("Malformed record against template {}: {}", set_id, e);
                Metrics::incr(&metrics.records_dropped_length_mismatch);
                return;
            }
        };
        if record_len == 0 {
            return;
        }

        let record_bytes = buf[..record_len].to_vec();
        let item = if template.is_option() {
            WorkItem::OptionRecord { observation: observation.clone(), template: template.clone(), bytes: record_bytes }
        } else {
            WorkItem::DataRecord {
                sensor: sensor.clone(),
                observation: observation.clone(),
                template: template.clone(),
                version: header.version,
                export_time_secs: header.export_time_secs,
                bytes: record_bytes,
            }
        };

        if !pool.dispatch_data(sensor, item) {
            warn!("Worker queue full, dropping record for observation {}", observation.id);
            Metrics::incr(&metrics.records_dropped_length_mismatch);
        }

        buf = &buf[record_len..];
    }
}

fn dispatch_v5(buf: &[u8], consumed: usize, header: &DatagramHeader, sensor: &Arc<Sensor>, pool: &Arc<WorkerPool>) -> Result<(), String> {
    let observation = sensor.get_or_create_observation(0);
    let template = Arc::new(wire::v5::synthetic_template());

    let mut offset = consumed;
    while offset + wire::v5::RECORD_SIZE <= buf.len() {
        let record_bytes = buf[offset..offset + wire::v5::RECORD_SIZE].to_vec();
        let item = WorkItem::DataRecord {
            sensor: sensor.clone(),
            observation: observation.clone(),
            template: template.clone(),
            version: header.version,
            export_time_secs: header.export_time_secs,
            bytes: record_bytes,
        };
        if !pool.dispatch_data(sensor, item) {
            warn!("Worker queue full, dropping NetFlow v5 record");
        }
        offset += wire::v5::RECORD_SIZE;
    }

    Ok(())
}
