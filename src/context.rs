//! The explicit `Context` bundle (§9 "Global mutable state"): every lookup
//! interface a field handler or the record assembler needs, passed in
//! instead of reached for through process-wide statics. Built once in
//! `main` and handed to every worker as a single `Arc<Context>`.

use std::sync::Arc;
use std::time::Duration;

use crate::enrichment::geoip::GeoIpSource;
use crate::enrichment::mac_db::{MacNameDb, MacVendorDb};
use crate::enrichment::ptr_cache::PtrCache;
use crate::enrichment::ptr_resolver::PtrRequester;
use crate::metrics::Metrics;
use crate::output::OutputSink;

pub struct Context {
    pub mac_vendor_db: Arc<MacVendorDb>,
    pub mac_name_db: Arc<MacNameDb>,
    pub geoip: Arc<dyn GeoIpSource>,
    pub ptr_cache: Arc<PtrCache>,
    pub ptr_requester: PtrRequester,
    pub ptr_deadline: Duration,
    pub output: Arc<dyn OutputSink>,
    pub metrics: Arc<Metrics>,
}
