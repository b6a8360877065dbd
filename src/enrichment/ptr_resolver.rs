//! PTR resolution actor (C6/§4.6). A single dedicated OS thread runs a
//! minimal current-thread `tokio` runtime — the smallest runtime that can
//! drive `hickory-resolver`'s async API — and owns the resolver handle.
//! Workers never touch async themselves: they submit a request through a
//! plain (synchronous) channel send and block on a one-shot reply channel
//! up to the record's deadline, or give up and move on.
//!
//! The request queue is a `tokio::sync::mpsc::unbounded_channel`: its
//! `send` is a plain synchronous method, so worker threads can push into it
//! without ever entering async code themselves, while the resolver thread
//! awaits it and `tokio::spawn`s one task per in-flight lookup so a slow
//! answer for one IP never blocks the others.
//!
//! Grounded on `ScriptSmith-hadrian` / `npolshakova-agentgateway`'s use of
//! `hickory-resolver` from a bounded worker topology.

use crossbeam_channel::{bounded, Sender as ReplySender};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use log::{error, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::enrichment::ptr_cache::PtrCache;

struct PtrRequest {
    ip: IpAddr,
    reply: ReplySender<Option<Arc<str>>>,
}

#[derive(Clone)]
pub struct PtrRequester {
    tx: UnboundedSender<PtrRequest>,
}

impl PtrRequester {
    /// Submits a request and blocks the calling worker thread up to
    /// `deadline` for an answer. Returns `None` on cache miss, negative
    /// cache hit, or deadline expiry — the caller can't tell these apart,
    /// which matches SPEC_FULL.md §7's "PTR deadline exceeded ⇒ suppress
    /// DNS key" (a negative answer also just suppresses the key).
    pub fn resolve(&self, ip: IpAddr, deadline: Duration) -> Option<Arc<str>> {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(PtrRequest { ip, reply: reply_tx }).is_err() {
            return None;
        }
        reply_rx.recv_timeout(deadline).ok().flatten()
    }

    /// A requester whose every `resolve` call returns `None` immediately:
    /// no thread, no runtime, for when `ptr.enable` is off in configuration.
    /// Built by creating a channel and dropping its receiver right away, so
    /// every `send` fails exactly like a dead resolver thread would.
    pub fn disabled() -> PtrRequester {
        let (tx, rx) = unbounded_channel::<PtrRequest>();
        drop(rx);
        PtrRequester { tx }
    }
}

/// Spawns the resolver thread and returns a cheaply-cloneable handle to
/// submit requests to it. `cache` is shared with callers so a resolution
/// completed here is immediately visible to the next record that hits the
/// same IP.
pub fn spawn(cache: Arc<PtrCache>, resolver_host: Option<String>) -> PtrRequester {
    let (tx, rx) = unbounded_channel::<PtrRequest>();

    thread::Builder::new()
        .name("PtrResolver".to_string())
        .spawn(move || run(rx, cache, resolver_host))
        .expect("failed to spawn PtrResolver thread");

    PtrRequester { tx }
}

async fn build_resolver(resolver_host: Option<String>) -> TokioAsyncResolver {
    if let Some(host) = resolver_host {
        if let Ok(ip) = host.parse::<IpAddr>() {
            let mut cfg = ResolverConfig::new();
            cfg.add_name_server(NameServerConfig::new(std::net::SocketAddr::new(ip, 53), Protocol::Udp));
            return TokioAsyncResolver::tokio(cfg, ResolverOpts::default());
        }
        warn!("invalid ptr.resolver_host {:?}, falling back to system config", host);
    }

    TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()))
}

fn run(mut rx: UnboundedReceiver<PtrRequest>, cache: Arc<PtrCache>, resolver_host: Option<String>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("PtrResolver could not start its runtime, DNS lookups disabled: {}", e);
            while rx.blocking_recv().is_some() {}
            return;
        }
    };

    runtime.block_on(async move {
        let resolver = build_resolver(resolver_host).await;

        while let Some(request) = rx.recv().await {
            if let Some(cached) = cache.get(request.ip) {
                let _ = request.reply.send(cached);
                continue;
            }

            let cache = cache.clone();
            let resolver = resolver.clone();
            tokio::spawn(async move {
                match resolver.reverse_lookup(request.ip).await {
                    Ok(lookup) => match lookup.iter().next() {
                        Some(name) => {
                            let name: Arc<str> = Arc::from(name.to_string().trim_end_matches('.'));
                            cache.insert_positive(request.ip, name.clone());
                            let _ = request.reply.send(Some(name));
                        }
                        None => {
                            cache.insert_negative(request.ip);
                            let _ = request.reply.send(None);
                        }
                    },
                    Err(_) => {
                        cache.insert_negative(request.ip);
                        let _ = request.reply.send(None);
                    }
                }
            });
        }
    });
}
