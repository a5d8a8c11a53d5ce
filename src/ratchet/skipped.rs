use crate::Error;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use zeroize::Zeroize;

/// Position of a message key: receiving chain generation and index.
pub(crate) type ChainPosition = (u32, u32);

#[derive(Clone)]
struct SkippedKey {
    message_key: [u8; 32],
    stored_at: DateTime<Utc>,
}

impl Drop for SkippedKey {
    fn drop(&mut self) {
        self.message_key.zeroize();
    }
}

/// Bounded store of message keys derived ahead of an out-of-order message.
///
/// Keys are evicted oldest first, either when the store is full or when an
/// explicit sweep finds them older than the retention window. The most
/// recently evicted positions are remembered so that a late message can be
/// reported as expired instead of replayed.
#[derive(Clone)]
pub(crate) struct SkippedKeys {
    keys: HashMap<ChainPosition, SkippedKey>,
    // Insertion order; may still hold positions that were already consumed.
    order: VecDeque<ChainPosition>,
    evicted: VecDeque<ChainPosition>,
    capacity: usize,
}

impl SkippedKeys {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            keys: HashMap::new(),
            order: VecDeque::new(),
            evicted: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    fn insert(&mut self, position: ChainPosition, message_key: [u8; 32], now: DateTime<Utc>) {
        while self.keys.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }

        self.keys.insert(
            position,
            SkippedKey {
                message_key,
                stored_at: now,
            },
        );
        self.order.push_back(position);

        if self.order.len() > 2 * self.capacity {
            let keys = &self.keys;
            self.order.retain(|position| keys.contains_key(position));
        }
    }

    /// Copy of the key stored for `position`. The key stays in the store until
    /// a [`StagedKeys`] that consumes it is applied.
    pub(crate) fn get(&self, position: ChainPosition) -> Result<[u8; 32], Error> {
        let (generation, index) = position;
        match self.keys.get(&position) {
            Some(entry) => Ok(entry.message_key),
            None if self.evicted.contains(&position) => Err(Error::Expired { generation, index }),
            None => Err(Error::MessageReplayed { generation, index }),
        }
    }

    /// Applies the edits of a successful operation, in the order they were made.
    pub(crate) fn apply(&mut self, staged: StagedKeys, now: DateTime<Utc>) {
        for (position, message_key) in &staged.inserted {
            self.insert(*position, *message_key, now);
        }
        for generation in &staged.evicted_generations {
            self.evict_generation(*generation);
        }
        if let Some(position) = staged.consumed {
            self.keys.remove(&position);
        }
    }

    /// Evicts every key belonging to `generation`.
    fn evict_generation(&mut self, generation: u32) {
        let positions: Vec<ChainPosition> = self
            .keys
            .keys()
            .filter(|(g, _)| *g == generation)
            .copied()
            .collect();
        for position in positions {
            self.evict(position);
        }
    }

    /// Evicts keys stored more than `ttl` before `now`. Returns how many were dropped.
    pub(crate) fn sweep(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let mut swept = 0;
        while let Some(position) = self.order.front().copied() {
            let expired = match self.keys.get(&position) {
                // Already consumed.
                None => true,
                Some(entry) => now
                    .signed_duration_since(entry.stored_at)
                    .to_std()
                    .map(|age| age > ttl)
                    .unwrap_or(false),
            };
            if !expired {
                break;
            }

            self.order.pop_front();
            if self.keys.contains_key(&position) {
                self.evict(position);
                swept += 1;
            }
        }
        swept
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some(position) = self.order.pop_front() {
            if self.keys.contains_key(&position) {
                self.evict(position);
                return true;
            }
        }
        false
    }

    fn evict(&mut self, position: ChainPosition) {
        if self.keys.remove(&position).is_some() {
            if self.evicted.len() >= self.capacity {
                self.evicted.pop_front();
            }
            self.evicted.push_back(position);
        }
    }
}

/// Store edits recorded by an operation that has not committed yet.
#[derive(Default)]
pub(crate) struct StagedKeys {
    inserted: Vec<(ChainPosition, [u8; 32])>,
    evicted_generations: Vec<u32>,
    consumed: Option<ChainPosition>,
}

impl StagedKeys {
    pub(crate) fn insert(&mut self, position: ChainPosition, message_key: [u8; 32]) {
        self.inserted.push((position, message_key));
    }

    pub(crate) fn evict_generation(&mut self, generation: u32) {
        self.evicted_generations.push(generation);
    }

    pub(crate) fn consume(&mut self, position: ChainPosition) {
        self.consumed = Some(position);
    }
}

impl Drop for StagedKeys {
    fn drop(&mut self) {
        for (_, message_key) in &mut self.inserted {
            message_key.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consume(store: &mut SkippedKeys, position: ChainPosition) -> Result<[u8; 32], Error> {
        let message_key = store.get(position)?;
        let mut staged = StagedKeys::default();
        staged.consume(position);
        store.apply(staged, Utc::now());
        Ok(message_key)
    }

    #[test]
    fn test_take_once() {
        let mut store = SkippedKeys::new(4);
        store.insert((1, 0), [9u8; 32], Utc::now());

        assert_eq!(consume(&mut store, (1, 0)).unwrap(), [9u8; 32]);
        assert_eq!(
            store.get((1, 0)),
            Err(Error::MessageReplayed {
                generation: 1,
                index: 0
            })
        );
    }

    #[test]
    fn test_get_does_not_consume() {
        let mut store = SkippedKeys::new(4);
        store.insert((1, 0), [9u8; 32], Utc::now());

        assert!(store.get((1, 0)).is_ok());
        assert_eq!(store.len(), 1);
        assert!(consume(&mut store, (1, 0)).is_ok());
    }

    #[test]
    fn test_staged_edits_apply_in_order() {
        let mut store = SkippedKeys::new(8);
        store.insert((1, 0), [0u8; 32], Utc::now());

        let mut staged = StagedKeys::default();
        staged.insert((2, 0), [2u8; 32]);
        staged.insert((2, 1), [3u8; 32]);
        staged.evict_generation(1);
        assert_eq!(store.len(), 1);

        store.apply(staged, Utc::now());
        assert_eq!(store.len(), 2);
        assert!(matches!(store.get((1, 0)), Err(Error::Expired { .. })));
        assert_eq!(store.get((2, 1)).unwrap(), [3u8; 32]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = SkippedKeys::new(2);
        let now = Utc::now();
        store.insert((1, 0), [0u8; 32], now);
        store.insert((1, 1), [1u8; 32], now);
        store.insert((1, 2), [2u8; 32], now);

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get((1, 0)),
            Err(Error::Expired {
                generation: 1,
                index: 0
            })
        );
        assert!(store.get((1, 1)).is_ok());
        assert!(store.get((1, 2)).is_ok());
    }

    #[test]
    fn test_sweep_by_age() {
        let mut store = SkippedKeys::new(8);
        let start = Utc::now();
        store.insert((1, 0), [0u8; 32], start);
        store.insert((1, 1), [1u8; 32], start);
        store.insert((1, 2), [2u8; 32], start + chrono::Duration::hours(2));
        assert!(consume(&mut store, (1, 1)).is_ok());

        let swept = store.sweep(start + chrono::Duration::hours(3), Duration::from_secs(3600));
        assert_eq!(swept, 1);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.get((1, 0)), Err(Error::Expired { .. })));
        assert!(store.get((1, 2)).is_ok());
    }

    #[test]
    fn test_evict_generation() {
        let mut store = SkippedKeys::new(8);
        let now = Utc::now();
        store.insert((1, 0), [0u8; 32], now);
        store.insert((2, 0), [1u8; 32], now);

        store.evict_generation(1);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.get((1, 0)), Err(Error::Expired { .. })));
        assert!(store.get((2, 0)).is_ok());
    }
}
