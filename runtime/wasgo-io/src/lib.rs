//! Virtual asynchronous socket layer for the wasgo host runtime.
//!
//! A guest makes synchronous network calls; the host sockets underneath are
//! non-blocking. Each connection handle carries an [`EventState`] readiness
//! bitset fed by a background mio poller, and the blocking operations in
//! [`NetStack`] retry through it whenever a syscall would block.

mod addr;
mod event;
mod net;
mod poller;

pub use addr::addr_to_bytes;
pub use event::{ERROR, EventState, HANGUP, READABLE, Readiness, WRITABLE};
pub use net::{ConnStatus, NetStack};
pub use poller::ReadyTable;
