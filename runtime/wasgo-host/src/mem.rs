//! Typed access to guest linear memory.
//!
//! Host calls receive a stack pointer and read their arguments at fixed
//! little-endian offsets from it. [`MemoryView`] is the seam between those
//! calls and whichever engine owns the bytes; [`Mem`] wraps a plain byte
//! slice, which is all the tests and the embedding API need.

/// Byte-level view of guest memory with typed accessors layered on top.
///
/// Out-of-range accesses panic: the guest handed us a bad pointer and no
/// recovery is possible at this layer.
pub trait MemoryView {
    fn mem_slice(&self, start: usize, end: usize) -> &[u8];
    fn mut_mem_slice(&mut self, start: usize, end: usize) -> &mut [u8];
    fn mem_len(&self) -> usize;

    fn get_bool(&self, addr: i32) -> bool {
        self.mem_slice(addr as usize, addr as usize + 1)[0] != 0
    }

    fn get_i32(&self, addr: i32) -> i32 {
        let a = addr as usize;
        i32::from_le_bytes(self.mem_slice(a, a + 4).try_into().unwrap())
    }

    fn get_u32(&self, addr: i32) -> u32 {
        let a = addr as usize;
        u32::from_le_bytes(self.mem_slice(a, a + 4).try_into().unwrap())
    }

    fn get_i64(&self, addr: i32) -> i64 {
        let a = addr as usize;
        i64::from_le_bytes(self.mem_slice(a, a + 8).try_into().unwrap())
    }

    fn get_u64(&self, addr: i32) -> u64 {
        self.get_i64(addr) as u64
    }

    fn set_bool(&mut self, addr: i32, value: bool) {
        self.mut_mem_slice(addr as usize, addr as usize + 1)[0] = u8::from(value);
    }

    fn set_i32(&mut self, addr: i32, value: i32) {
        let a = addr as usize;
        self.mut_mem_slice(a, a + 4).copy_from_slice(&value.to_le_bytes());
    }

    fn set_i64(&mut self, addr: i32, value: i64) {
        let a = addr as usize;
        self.mut_mem_slice(a, a + 8).copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the 16-byte slice descriptor at `addr` (8-byte pointer, 8-byte
    /// length) and returns a copy of the bytes it points at.
    fn get_bytes(&self, addr: i32) -> Vec<u8> {
        let ptr = self.get_i64(addr);
        let len = self.get_i64(addr + 8);
        self.mem_slice(ptr as usize, (ptr + len) as usize).to_vec()
    }

    /// Like [`get_bytes`](Self::get_bytes) but decoded as a string. Guest
    /// strings are not validated; invalid UTF-8 is replaced, not rejected.
    fn get_string(&self, addr: i32) -> String {
        String::from_utf8_lossy(&self.get_bytes(addr)).into_owned()
    }

    fn set_bytes_at(&mut self, ptr: i64, bytes: &[u8]) {
        let p = ptr as usize;
        self.mut_mem_slice(p, p + bytes.len()).copy_from_slice(bytes);
    }
}

/// [`MemoryView`] over a borrowed byte slice.
pub struct Mem<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Mem<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }
}

impl MemoryView for Mem<'_> {
    fn mem_slice(&self, start: usize, end: usize) -> &[u8] {
        match self.bytes.get(start..end) {
            Some(s) => s,
            None => panic!(
                "guest memory read out of bounds: {start}..{end} (len {})",
                self.bytes.len()
            ),
        }
    }

    fn mut_mem_slice(&mut self, start: usize, end: usize) -> &mut [u8] {
        let len = self.bytes.len();
        match self.bytes.get_mut(start..end) {
            Some(s) => s,
            None => panic!("guest memory write out of bounds: {start}..{end} (len {len})"),
        }
    }

    fn mem_len(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips_are_little_endian() {
        let mut bytes = vec![0u8; 64];
        let mut mem = Mem::new(&mut bytes);
        mem.set_i32(8, -2);
        assert_eq!(mem.get_i32(8), -2);
        assert_eq!(mem.mem_slice(8, 12), [0xfe, 0xff, 0xff, 0xff]);
        mem.set_i64(16, 0x0102_0304_0506_0708);
        assert_eq!(mem.get_i64(16), 0x0102_0304_0506_0708);
        assert_eq!(mem.mem_slice(16, 17), [0x08]);
        assert_eq!(mem.get_u32(16), 0x0506_0708);
        mem.set_bool(24, true);
        assert!(mem.get_bool(24));
    }

    #[test]
    fn slice_descriptor_copies_referenced_bytes() {
        let mut bytes = vec![0u8; 128];
        bytes[100..104].copy_from_slice(b"ping");
        let mut mem = Mem::new(&mut bytes);
        mem.set_i64(8, 100);
        mem.set_i64(16, 4);
        assert_eq!(mem.get_bytes(8), b"ping");
        assert_eq!(mem.get_string(8), "ping");
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn read_past_end_panics() {
        let mut bytes = vec![0u8; 16];
        let mem = Mem::new(&mut bytes);
        mem.get_i64(12);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn descriptor_past_end_panics() {
        let mut bytes = vec![0u8; 32];
        let mut mem = Mem::new(&mut bytes);
        mem.set_i64(0, 1 << 20);
        mem.set_i64(8, 4);
        mem.get_bytes(0);
    }
}
