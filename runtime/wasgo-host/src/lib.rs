//! Host side of a Go-flavored wasm guest ABI.
//!
//! The guest imports every host capability through two modules, `go` and
//! `env`. [`resolve`] turns an import name into a handler; each handler
//! reads its arguments out of guest linear memory relative to the stack
//! pointer and writes results back into the same frame. Values too big for
//! the frame travel through the [`RefTable`]; sockets and name resolution
//! are provided by [`wasgo_io`] and the [`dns` bridge](lookup_ip).

mod dns;
mod mem;
mod refs;
mod resolver;
mod util;

pub use dns::{lookup_addr, lookup_ip, lookup_port};
pub use mem::{Mem, MemoryView};
pub use refs::RefTable;
pub use resolver::{HandlerFn, HostCall, HostFn, HostState, resolve};
