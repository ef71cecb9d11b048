use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};

use crate::event::{ERROR, EventState, HANGUP, READABLE, WRITABLE};

/// Map of connection handles to their Event States. Entries are added when a
/// listener or connection registers and are never evicted, so a closed
/// handle keeps its final bits (see the design notes).
#[derive(Debug, Default)]
pub struct ReadyTable {
    states: Mutex<HashMap<i32, Arc<EventState>>>,
}

impl ReadyTable {
    /// External readiness-notification entry point: each `(handle, bits)`
    /// pair overwrites that handle's bits and wakes its waiters. Unknown
    /// handles are ignored; the source may outlive a connection briefly.
    pub fn push_events(&self, batch: &[(i32, i32)]) {
        let states = self.states.lock().unwrap();
        for &(handle, bits) in batch {
            if let Some(state) = states.get(&handle) {
                state.update(bits);
            }
        }
    }

    pub fn register(&self, handle: i32) -> Arc<EventState> {
        let state = Arc::new(EventState::new());
        self.states
            .lock()
            .unwrap()
            .insert(handle, Arc::clone(&state));
        state
    }

    pub fn get(&self, handle: i32) -> Option<Arc<EventState>> {
        self.states.lock().unwrap().get(&handle).cloned()
    }
}

fn event_to_bits(event: &mio::event::Event) -> i32 {
    let mut bits = 0;
    if event.is_readable() {
        bits |= READABLE;
    }
    if event.is_writable() {
        bits |= WRITABLE;
    }
    // both halves gone is the epoll HUP condition
    if event.is_read_closed() && event.is_write_closed() {
        bits |= HANGUP;
    }
    if event.is_error() {
        bits |= ERROR;
    }
    bits
}

/// Owns the registry half of a `mio::Poll`; the poll half lives on a
/// background thread that translates OS events into `push_events` batches.
#[derive(Debug)]
pub(crate) struct Poller {
    registry: Registry,
}

impl Poller {
    pub(crate) fn spawn(table: Arc<ReadyTable>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        thread::Builder::new()
            .name("wasgo-io-poller".to_string())
            .spawn(move || run(poll, table))?;
        Ok(Self { registry })
    }

    pub(crate) fn register(&self, source: &mut impl Source, handle: i32) -> io::Result<()> {
        self.registry.register(
            source,
            Token(handle as usize),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    pub(crate) fn deregister(&self, source: &mut impl Source) -> io::Result<()> {
        self.registry.deregister(source)
    }
}

fn run(mut poll: Poll, table: Arc<ReadyTable>) {
    let mut events = Events::with_capacity(1024);
    let mut batch = Vec::new();
    loop {
        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            // the poll fd is gone, the process is tearing down
            Err(_) => return,
        }
        batch.clear();
        for event in events.iter() {
            batch.push((event.token().0 as i32, event_to_bits(event)));
        }
        table.push_events(&batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Readiness;

    #[test]
    fn push_events_updates_registered_handles() {
        let table = ReadyTable::default();
        let state = table.register(3);
        table.push_events(&[(3, READABLE | WRITABLE), (99, ERROR)]);
        assert_eq!(state.bits(), READABLE | WRITABLE);
        assert_eq!(state.wait_read().unwrap(), Readiness::Ready);
    }

    #[test]
    fn batches_apply_in_delivery_order() {
        let table = ReadyTable::default();
        let state = table.register(1);
        table.push_events(&[(1, READABLE), (1, WRITABLE)]);
        assert_eq!(state.bits(), WRITABLE);
    }
}
