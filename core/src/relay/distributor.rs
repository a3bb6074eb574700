//! Distributor — name → outbound channel registry with sender-excluding broadcast

use super::protocol::Frame;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Outbound channel capacity per registered client.
pub const CLIENT_CHANNEL_CAPACITY: usize = 800;

/// Statistics about relay operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Number of registered clients
    pub clients_active: usize,
    /// Frames accepted for broadcast
    pub frames_relayed: u64,
    /// Bytes accepted for broadcast
    pub bytes_relayed: u64,
    /// Per-recipient deliveries dropped because the recipient was full
    pub frames_dropped: u64,
}

/// Tracks connected clients and fans frames out to them.
///
/// The map is guarded by a read-write lock: `register`/`deregister` take it
/// exclusively, concurrent `broadcast` calls share it. Broadcast never waits
/// on a recipient; a full channel drops that one delivery. Counters are
/// plain atomics so broadcasts never contend on them.
pub struct Distributor {
    clients: RwLock<HashMap<String, mpsc::Sender<Frame>>>,
    capacity: usize,
    frames_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Distributor {
    pub fn new() -> Self {
        Self::with_capacity(CLIENT_CHANNEL_CAPACITY)
    }

    /// Create a distributor whose per-client channels hold `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            frames_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Register a client under `requested`, or `requested` + the lowest free
    /// numeric suffix (`name1`, `name2`, …) when the name is taken.
    ///
    /// Returns the assigned name, which the caller must use for `broadcast`
    /// and `deregister`, and the receiving end of the client's channel.
    pub fn register(&self, requested: &str) -> (String, mpsc::Receiver<Frame>) {
        let mut clients = self.clients.write();

        let mut name = requested.to_string();
        let mut idx = 1u64;
        while clients.contains_key(&name) {
            name = format!("{}{}", requested, idx);
            idx += 1;
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        clients.insert(name.clone(), tx);

        (name, rx)
    }

    /// Remove a client and close its channel. Unknown names are ignored.
    pub fn deregister(&self, name: &str) {
        self.clients.write().remove(name);
    }

    /// Deliver `frame` to every registered client except `sender`.
    ///
    /// Returns the number of clients the frame was queued for.
    pub fn broadcast(&self, sender: &str, frame: Frame) -> usize {
        let clients = self.clients.read();

        let mut delivered = 0usize;
        let mut dropped = 0u64;
        for (target, tx) in clients.iter() {
            if target == sender {
                continue;
            }
            match tx.try_send(Frame::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(client = %target, "outbound channel full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(client = %target, "outbound channel closed, frame skipped");
                }
            }
        }
        drop(clients);

        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(frame.len() as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.frames_dropped.fetch_add(dropped, Ordering::Relaxed);
        }

        delivered
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.clients.read().contains_key(name)
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Registered names, sorted.
    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the counters. Fields are read independently, so a
    /// snapshot taken mid-broadcast may be off by that one frame.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            clients_active: self.client_count(),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn frame(bytes: &[u8]) -> Frame {
        Frame::from(bytes)
    }

    #[test]
    fn test_name_collision_suffixes() {
        let distributor = Distributor::new();

        let (a, _rx_a) = distributor.register("a");
        let (a1, _rx_a1) = distributor.register("a");
        let (a2, _rx_a2) = distributor.register("a");

        assert_eq!(a, "a");
        assert_eq!(a1, "a1");
        assert_eq!(a2, "a2");
        assert_eq!(distributor.client_count(), 3);
    }

    #[test]
    fn test_suffix_reuses_freed_slot() {
        let distributor = Distributor::new();
        let (_, _r0) = distributor.register("a");
        let (a1, _r1) = distributor.register("a");
        let (_, _r2) = distributor.register("a");

        distributor.deregister(&a1);
        let (again, _r3) = distributor.register("a");
        assert_eq!(again, "a1");
    }

    #[test]
    fn test_suffix_skips_literal_collisions() {
        let distributor = Distributor::new();
        let (_, _r0) = distributor.register("a1");
        let (_, _r1) = distributor.register("a");
        let (second, _r2) = distributor.register("a");
        assert_eq!(second, "a2");
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let distributor = Distributor::new();
        let mut receivers: Vec<(String, mpsc::Receiver<Frame>)> = ["alice", "bob", "carol", "dave"]
            .iter()
            .map(|n| distributor.register(n))
            .collect();

        let delivered = distributor.broadcast("bob", frame(b"payload"));
        assert_eq!(delivered, 3);

        for (name, rx) in receivers.iter_mut() {
            if name == "bob" {
                assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
            } else {
                assert_eq!(&rx.try_recv().unwrap()[..], b"payload");
                assert!(rx.try_recv().is_err());
            }
        }
    }

    #[test]
    fn test_broadcast_from_unregistered_sender_reaches_all() {
        let distributor = Distributor::new();
        let (_, mut rx) = distributor.register("alice");
        assert_eq!(distributor.broadcast("ghost", frame(b"x")), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let distributor = Distributor::new();
        let (name, mut rx) = distributor.register("alice");

        distributor.deregister(&name);
        distributor.deregister(&name);
        distributor.deregister("never-registered");

        assert!(!distributor.is_registered(&name));
        assert_eq!(distributor.client_count(), 0);
        // Channel is closed once the sender is gone.
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let distributor = Distributor::with_capacity(2);
        let (_, _rx_sender) = distributor.register("sender");
        let (_, mut rx_slow) = distributor.register("slow");

        assert_eq!(distributor.broadcast("sender", frame(b"1")), 1);
        assert_eq!(distributor.broadcast("sender", frame(b"2")), 1);
        assert_eq!(distributor.broadcast("sender", frame(b"3")), 0);

        let stats = distributor.stats();
        assert_eq!(stats.frames_relayed, 3);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.bytes_relayed, 3);

        assert_eq!(&rx_slow.try_recv().unwrap()[..], b"1");
        assert_eq!(&rx_slow.try_recv().unwrap()[..], b"2");
        assert!(rx_slow.try_recv().is_err());
    }

    #[test]
    fn test_stats_track_clients() {
        let distributor = Distributor::new();
        assert_eq!(distributor.stats(), RelayStats::default());

        let (a, _ra) = distributor.register("a");
        let (_b, _rb) = distributor.register("b");
        assert_eq!(distributor.stats().clients_active, 2);
        assert_eq!(distributor.client_names(), vec!["a", "b"]);

        distributor.deregister(&a);
        assert_eq!(distributor.stats().clients_active, 1);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_broadcast() {
        let distributor = std::sync::Arc::new(Distributor::new());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let distributor = std::sync::Arc::clone(&distributor);
            tasks.push(tokio::spawn(async move {
                let (name, _rx) = distributor.register("peer");
                distributor.broadcast(&name, frame(&[i as u8]));
                name
            }));
        }

        let mut names = Vec::new();
        for task in tasks {
            names.push(task.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 16);
    }

    #[test]
    fn test_counters_add_up_across_threads() {
        let distributor = Distributor::with_capacity(100);
        let (_, mut rx) = distributor.register("sink");

        let delivered: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| {
                    (0..250)
                        .map(|_| distributor.broadcast("src", frame(b"abcd")))
                        .sum::<usize>()
                }))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });

        let stats = distributor.stats();
        assert_eq!(stats.frames_relayed, 2000);
        assert_eq!(stats.bytes_relayed, 8000);
        assert_eq!(delivered, 100);
        assert_eq!(stats.frames_dropped, 1900);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 100);
    }
}
