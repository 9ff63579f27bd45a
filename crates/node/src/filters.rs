//! Small in-memory filters feeding the block processor.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ferrite_primitives::BlockHash;
use parking_lot::Mutex;

const ARRIVAL_WINDOW: Duration = Duration::from_secs(300);
const ARRIVAL_MAX: usize = 64 * 1024;

/// Tracks recently arrived block hashes so only live traffic triggers
/// vote generation and election starts.
#[derive(Debug, Default)]
pub struct BlockArrival {
    entries: Mutex<VecDeque<(Instant, BlockHash)>>,
}

impl BlockArrival {
    /// Records an arrival; returns false when the hash was already recent.
    pub fn add(&self, hash: BlockHash) -> bool {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        while entries.len() >= ARRIVAL_MAX {
            entries.pop_front();
        }
        let known = entries
            .iter()
            .any(|(when, h)| *h == hash && now.duration_since(*when) < ARRIVAL_WINDOW);
        entries.push_back((now, hash));
        !known
    }

    pub fn recent(&self, hash: &BlockHash) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .any(|(when, h)| h == hash && now.duration_since(*when) < ARRIVAL_WINDOW)
    }
}

const GAP_CACHE_MAX: usize = 256;

/// Blocks whose dependency is missing, remembered until it arrives.
#[derive(Debug, Default)]
pub struct GapCache {
    entries: Mutex<HashMap<BlockHash, Instant>>,
}

impl GapCache {
    pub fn add(&self, hash: BlockHash) {
        let mut entries = self.entries.lock();
        if entries.len() >= GAP_CACHE_MAX && !entries.contains_key(&hash) {
            // Drop the oldest entry.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, when)| **when)
                .map(|(hash, _)| *hash)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(hash, Instant::now());
    }

    pub fn erase(&self, hash: &BlockHash) {
        self.entries.lock().remove(hash);
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.entries.lock().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_recent_window() {
        let arrival = BlockArrival::default();
        let hash = BlockHash::from_bytes([1u8; 32]);
        assert!(!arrival.recent(&hash));
        assert!(arrival.add(hash));
        assert!(arrival.recent(&hash));
        assert!(!arrival.add(hash));
    }

    #[test]
    fn gap_cache_add_erase() {
        let cache = GapCache::default();
        let hash = BlockHash::from_bytes([2u8; 32]);
        cache.add(hash);
        assert!(cache.contains(&hash));
        cache.erase(&hash);
        assert!(cache.is_empty());
    }
}
