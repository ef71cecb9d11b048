//! Handle table for byte values passed host-to-guest.
//!
//! The guest cannot see host memory, so results larger than a scalar are
//! parked here under a dense integer handle. The guest then runs the
//! two-step fetch: `prepareBytes` to learn the length, `loadBytes` to copy
//! the value out, which consumes the entry.

/// Stored values are read once. Consuming an entry leaves an empty vector
/// behind so handles stay dense; entries the guest never fetches are kept
/// for the lifetime of the instance.
#[derive(Debug, Default)]
pub struct RefTable {
    values: Vec<Vec<u8>>,
}

impl RefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `bytes` and returns the handle the guest will fetch it by.
    pub fn store(&mut self, bytes: Vec<u8>) -> i32 {
        self.values.push(bytes);
        (self.values.len() - 1) as i32
    }

    /// Length of the stored value, so the guest can size its buffer.
    pub fn prepare(&self, handle: i32) -> i64 {
        self.entry(handle).len() as i64
    }

    /// Takes the stored value out. A second take yields empty bytes.
    pub fn consume(&mut self, handle: i32) -> Vec<u8> {
        let len = self.values.len();
        match self.values.get_mut(handle as usize) {
            Some(slot) => std::mem::take(slot),
            None => panic!("ref handle {handle} out of range (table holds {len})"),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn entry(&self, handle: i32) -> &[u8] {
        match self.values.get(handle as usize) {
            Some(slot) => slot,
            None => panic!(
                "ref handle {handle} out of range (table holds {})",
                self.values.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_dense_from_zero() {
        let mut refs = RefTable::new();
        assert_eq!(refs.store(b"a".to_vec()), 0);
        assert_eq!(refs.store(b"bb".to_vec()), 1);
        assert_eq!(refs.store(Vec::new()), 2);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs.prepare(1), 2);
        assert_eq!(refs.prepare(2), 0);
    }

    #[test]
    fn consume_is_one_shot() {
        let mut refs = RefTable::new();
        let h = refs.store(b"once".to_vec());
        assert_eq!(refs.prepare(h), 4);
        assert_eq!(refs.consume(h), b"once");
        assert_eq!(refs.prepare(h), 0);
        assert!(refs.consume(h).is_empty());
        // the slot is spent, not freed
        assert_eq!(refs.len(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn unknown_handle_panics() {
        let refs = RefTable::new();
        refs.prepare(5);
    }
}
