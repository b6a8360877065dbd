//! Reverse-DNS (PTR) result cache, shared across workers. Grounded on
//! `ScriptSmith-hadrian`'s use of `dashmap` for a sharded concurrent cache —
//! "internally thread-safe (e.g., striped locks)" in SPEC_FULL.md §5 is
//! exactly what `DashMap` gives for free.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
enum Entry {
    Positive { name: Arc<str>, expires_at: Instant },
    Negative { expires_at: Instant },
}

/// A cloned `Arc<str>` handed out of the cache stays valid even if the
/// entry is later replaced: replacement never mutates the `Arc` in place,
/// it swaps the map slot for a new one, so existing clones keep reading the
/// text that was current when they were taken. This is the "weak
/// reference" semantics SPEC_FULL.md §4.4 describes, without unsafe.
pub struct PtrCache {
    entries: DashMap<IpAddr, Entry>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl PtrCache {
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        PtrCache { entries: DashMap::new(), positive_ttl, negative_ttl }
    }

    /// `None` means "no cached answer, caller must resolve"; `Some(None)`
    /// means "cached negative answer, don't bother resolving again".
    pub fn get(&self, ip: IpAddr) -> Option<Option<Arc<str>>> {
        match self.entries.get(&ip) {
            Some(entry) => match &*entry {
                Entry::Positive { name, expires_at } if *expires_at > Instant::now() => Some(Some(name.clone())),
                Entry::Negative { expires_at } if *expires_at > Instant::now() => Some(None),
                _ => None,
            },
            None => None,
        }
    }

    pub fn insert_positive(&self, ip: IpAddr, name: Arc<str>) {
        self.entries.insert(ip, Entry::Positive { name, expires_at: Instant::now() + self.positive_ttl });
    }

    pub fn insert_negative(&self, ip: IpAddr) {
        self.entries.insert(ip, Entry::Negative { expires_at: Instant::now() + self.negative_ttl });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread::sleep;

    #[test]
    fn positive_entry_hits_until_ttl() {
        let cache = PtrCache::new(Duration::from_millis(20), Duration::from_millis(5));
        let ip = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        cache.insert_positive(ip, Arc::from("one.one.one.one"));

        assert_eq!(cache.get(ip).unwrap().as_deref(), Some("one.one.one.one"));
        sleep(Duration::from_millis(30));
        assert!(cache.get(ip).is_none());
    }

    #[test]
    fn negative_entry_suppresses_retry_until_ttl() {
        let cache = PtrCache::new(Duration::from_millis(50), Duration::from_millis(10));
        let ip = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        cache.insert_negative(ip);

        assert_eq!(cache.get(ip), Some(None));
        sleep(Duration::from_millis(20));
        assert!(cache.get(ip).is_none());
    }

    #[test]
    fn miss_is_none() {
        let cache = PtrCache::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(cache.get(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))).is_none());
    }
}
