//! Time-bucketed state (spec §3). Expiry is whole-bucket: a bucket is
//! dropped in one step rather than walking individual entry timers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
pub struct Bucket {
    pub keys: HashMap<String, DateTime<Utc>>,
    pub fingerprints: HashMap<String, DateTime<Utc>>,
}

impl Bucket {
    pub fn contains_fresh(&self, key: &str, fingerprint: Option<&str>, now: DateTime<Utc>, bucket_size: chrono::Duration) -> bool {
        if let Some(seen) = self.keys.get(key) {
            if now - *seen < bucket_size {
                return true;
            }
        }
        if let Some(fp) = fingerprint {
            if let Some(seen) = self.fingerprints.get(fp) {
                if now - *seen < bucket_size {
                    return true;
                }
            }
        }
        false
    }

    pub fn insert(&mut self, key: &str, fingerprint: Option<&str>, now: DateTime<Utc>) {
        self.keys.insert(key.to_string(), now);
        if let Some(fp) = fingerprint {
            self.fingerprints.insert(fp.to_string(), now);
        }
    }
}

/// `⌊wall_clock / bucket_size⌋`.
pub fn bucket_index(now: DateTime<Utc>, bucket_size: chrono::Duration) -> i64 {
    let secs = bucket_size.num_seconds().max(1);
    now.timestamp().div_euclid(secs)
}
