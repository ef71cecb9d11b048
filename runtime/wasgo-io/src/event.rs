use std::io;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Readiness bit layout shared with the poller and the guest ABI.
pub const READABLE: i32 = 1;
pub const WRITABLE: i32 = 1 << 1;
pub const HANGUP: i32 = 1 << 2;
pub const ERROR: i32 = 1 << 3;

/// Outcome of a successful wait. `Errored` means the caller must fetch the
/// concrete error from the socket (the bitset only carries one bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Hangup,
    Errored,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct Inner {
    bits: i32,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

/// Per-connection readiness state. The poller thread overwrites the bits and
/// wakes everyone; blocked calls consume one readiness bit per successful
/// wait, so the underlying syscall retry has to re-arm the next edge.
#[derive(Debug, Default)]
pub struct EventState {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl EventState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored bits with a fresh readiness snapshot and wakes
    /// all waiters. Updates for one handle are applied in delivery order.
    pub fn update(&self, bits: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.bits = bits;
        self.cond.notify_all();
    }

    pub fn bits(&self) -> i32 {
        self.inner.lock().unwrap().bits
    }

    /// Blocks until the connection is readable, hung up, errored, or the
    /// read deadline expires. Consumes the readable bit on success.
    pub fn wait_read(&self) -> io::Result<Readiness> {
        self.wait_ready(READABLE, Direction::Read)
    }

    /// Write-side counterpart of [`wait_read`](Self::wait_read).
    pub fn wait_write(&self) -> io::Result<Readiness> {
        self.wait_ready(WRITABLE, Direction::Write)
    }

    /// A deadline in the past fails pending and future waits immediately;
    /// waiters are woken so they can observe the change.
    pub fn set_read_deadline(&self, at: Option<Instant>) {
        let mut inner = self.inner.lock().unwrap();
        inner.read_deadline = at;
        self.cond.notify_all();
    }

    pub fn set_write_deadline(&self, at: Option<Instant>) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_deadline = at;
        self.cond.notify_all();
    }

    fn wait_ready(&self, bit: i32, dir: Direction) -> io::Result<Readiness> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.bits & ERROR != 0 {
                return Ok(Readiness::Errored);
            }
            if inner.bits & HANGUP != 0 {
                return Ok(Readiness::Hangup);
            }
            if inner.bits & bit != 0 {
                inner.bits &= !bit;
                return Ok(Readiness::Ready);
            }
            let deadline = match dir {
                Direction::Read => inner.read_deadline,
                Direction::Write => inner.write_deadline,
            };
            match deadline {
                Some(when) => {
                    let now = Instant::now();
                    if when <= now {
                        return Err(timed_out());
                    }
                    let (guard, _) = self.cond.wait_timeout(inner, when - now).unwrap();
                    inner = guard;
                }
                None => {
                    inner = self.cond.wait(inner).unwrap();
                }
            }
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}
