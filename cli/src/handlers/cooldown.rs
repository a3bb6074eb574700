// Echo suppression for content received from the relay

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long received content is suppressed from being sent back.
pub const COOLDOWN: Duration = Duration::from_secs(10);

pub type ContentDigest = [u8; 32];

pub fn digest(parts: &[&[u8]]) -> ContentDigest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Set of content digests that expire after a fixed time.
#[derive(Debug)]
pub struct Cooldown {
    ttl: Duration,
    entries: Mutex<HashMap<ContentDigest, Instant>>,
}

impl Cooldown {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Remember `key` for the next `ttl`, restarting its window if present.
    pub fn insert(&self, key: ContentDigest) {
        self.entries.lock().insert(key, Instant::now() + self.ttl);
    }

    /// Whether `key` is still cooling down. An expired entry is removed.
    pub fn contains(&self, key: &ContentDigest) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(deadline) if Instant::now() < *deadline => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, deadline| now < *deadline);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_separates_parts() {
        assert_ne!(digest(&[b"ab", b"c"]), digest(&[b"a", b"bc"]));
        assert_eq!(digest(&[b"text", b"hi"]), digest(&[b"text", b"hi"]));
    }

    #[test]
    fn test_contains_within_window() {
        let cooldown = Cooldown::default();
        let key = digest(&[b"text", b"hello"]);

        assert!(!cooldown.contains(&key));
        cooldown.insert(key);
        assert!(cooldown.contains(&key));
        assert!(!cooldown.contains(&digest(&[b"text", b"other"])));
    }

    #[test]
    fn test_expired_entry_removed_on_lookup() {
        let cooldown = Cooldown::new(Duration::from_millis(20));
        let key = digest(&[b"x"]);
        cooldown.insert(key);

        std::thread::sleep(Duration::from_millis(40));
        assert!(!cooldown.contains(&key));
        assert_eq!(cooldown.len(), 0);
    }

    #[test]
    fn test_purge_expired_keeps_live_entries() {
        let cooldown = Cooldown::new(Duration::from_millis(30));
        cooldown.insert(digest(&[b"old"]));
        std::thread::sleep(Duration::from_millis(60));
        cooldown.insert(digest(&[b"new"]));

        assert_eq!(cooldown.purge_expired(), 1);
        assert_eq!(cooldown.len(), 1);
        assert!(cooldown.contains(&digest(&[b"new"])));
    }
}
