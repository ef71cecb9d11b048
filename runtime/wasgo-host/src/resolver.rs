//! Import resolution and the host-call handlers behind it.
//!
//! The guest compiler emits every import with the same shape: the handler
//! receives a stack pointer and reads its arguments at fixed little-endian
//! offsets from `sp+8`, writing results back into the same frame. Those
//! offsets are a versioned contract with the guest toolchain; changing one
//! here breaks every compiled guest.
//!
//! Handlers return `anyhow::Result`. An `Err` is fatal to the instance
//! (clock failure, broken stdout, exhausted randomness); errors the guest
//! can act on are reported through the `(ref, ok)` frame convention
//! instead.

use std::io::{self, Write};
use std::process;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use wasgo_io::{NetStack, addr_to_bytes};

use crate::dns;
use crate::mem::MemoryView;
use crate::refs::RefTable;
use crate::util::debug_log;

/// Everything a guest instance can reach through its imports.
pub struct HostState {
    pub refs: RefTable,
    pub env_vars: std::collections::HashMap<String, String>,
    pub net: NetStack,
}

impl HostState {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            refs: RefTable::new(),
            env_vars: std::collections::HashMap::new(),
            net: NetStack::new()?,
        })
    }
}

/// One invocation of a host import: the guest's memory, the shared host
/// state, and the stack pointer the argument offsets hang off.
pub struct HostCall<'a, M: MemoryView> {
    pub mem: &'a mut M,
    pub state: &'a mut HostState,
    pub sp: i32,
}

impl<M: MemoryView> HostCall<'_, M> {
    /// Parks `bytes` in the ref table and writes the 4-byte handle at `addr`.
    fn set_string(&mut self, addr: i32, bytes: Vec<u8>) {
        let handle = self.state.refs.store(bytes);
        self.mem.set_i32(addr, handle);
    }

    /// Stores each element, then one more entry holding the 4-byte handles
    /// in order, and writes that outer entry's handle at `addr`.
    fn set_string_array(&mut self, addr: i32, values: Vec<Vec<u8>>) {
        let mut handles = Vec::with_capacity(values.len() * 4);
        for value in values {
            handles.extend_from_slice(&self.state.refs.store(value).to_le_bytes());
        }
        let outer = self.state.refs.store(handles);
        self.mem.set_i32(addr, outer);
    }

    fn set_error(&mut self, addr: i32, err: &io::Error) {
        self.set_string(addr, err.to_string().into_bytes());
    }

    /// `(ref, ok)` frame convention for calls with no value to return.
    fn set_unit_result(&mut self, addr: i32, result: io::Result<()>) {
        match result {
            Ok(()) => self.mem.set_bool(addr + 4, true),
            Err(err) => {
                self.set_error(addr, &err);
                self.mem.set_bool(addr + 4, false);
            }
        }
    }

    fn set_i32_result(&mut self, addr: i32, result: io::Result<i32>) {
        match result {
            Ok(value) => {
                self.mem.set_i32(addr, value);
                self.mem.set_bool(addr + 4, true);
            }
            Err(err) => {
                self.set_error(addr, &err);
                self.mem.set_bool(addr + 4, false);
            }
        }
    }

    fn set_usize_result(&mut self, addr: i32, result: io::Result<usize>) {
        self.set_i32_result(addr, result.map(|n| n as i32));
    }
}

pub type HandlerFn<M> = fn(&mut HostCall<'_, M>) -> Result<()>;

/// A resolved import. Unknown fields in a known module resolve to
/// [`HostFn::Missing`], which logs and succeeds when called so a guest
/// built against a slightly newer ABI still limps along.
pub enum HostFn<M: MemoryView> {
    Func(HandlerFn<M>),
    Missing { module: &'static str, field: String },
}

impl<M: MemoryView> HostFn<M> {
    fn missing(module: &'static str, field: &str) -> Self {
        Self::Missing {
            module,
            field: field.to_string(),
        }
    }

    pub fn call(&self, call: &mut HostCall<'_, M>) -> Result<()> {
        match self {
            Self::Func(func) => func(call),
            Self::Missing { module, field } => {
                eprintln!(
                    "[wasgo-host] unresolved import {module}.{field} called (sp={}), ignoring",
                    call.sp
                );
                Ok(())
            }
        }
    }
}

/// Resolves one import. The module set is closed: anything outside `go`
/// and `env` is an error and the caller must refuse to instantiate.
pub fn resolve<M: MemoryView>(module: &str, field: &str) -> Result<HostFn<M>> {
    match module {
        "go" => Ok(go_import(field)),
        "env" => Ok(env_import(field)),
        other => bail!("unknown import module {other:?}; the guest cannot run without it"),
    }
}

fn go_import<M: MemoryView>(field: &str) -> HostFn<M> {
    let func: HandlerFn<M> = match field {
        "debug" => debug,
        "runtime.wasmExit" => wasm_exit,
        "runtime.wasmWrite" | "syscall.wasmWrite" => wasm_write,
        "runtime.walltime" => walltime,
        "runtime.nanotime" => nanotime,
        "runtime.getRandomData" => get_random_data,
        "runtime.scheduleCallback" | "runtime.clearScheduledCallback" | "syscall.Syscall" => noop,
        "syscall/js.valueGet" => value_get,
        "wasm.prepareBytes" => prepare_bytes,
        "wasm.loadBytes" => load_bytes,
        "wasm.getenv" => getenv,
        "wasm.setenv" => setenv,
        "net.listenTCP" => listen_tcp,
        "net.dialTcp" => dial_tcp,
        "net.acceptTcp" => accept_tcp,
        "net.closeConn" | "net.closeListener" => close_handle,
        "net.getError" => get_error,
        "net.shutdownConn" => shutdown_conn,
        "net.readConn" => read_conn,
        "net.writeConn" => write_conn,
        "net.localAddr" => local_addr,
        "net.remoteAddr" => remote_addr,
        "net.setReadDeadline" => set_read_deadline,
        "net.setWriteDeadline" => set_write_deadline,
        "net.lookupIP" => lookup_ip,
        "net.lookupAddr" => lookup_addr,
        "net.lookupPort" => lookup_port,
        _ => return HostFn::missing("go", field),
    };
    HostFn::Func(func)
}

fn env_import<M: MemoryView>(field: &str) -> HostFn<M> {
    match field {
        "println" => HostFn::Func(env_println),
        _ => HostFn::missing("env", field),
    }
}

fn debug<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let sp = call.sp;
    debug_log(|| {
        let mut slots = Vec::new();
        let mut addr = sp + 8;
        while slots.len() < 8 && addr as usize + 8 <= call.mem.mem_len() {
            slots.push(call.mem.get_i64(addr).to_string());
            addr += 8;
        }
        format!("debug: sp={sp} frame=[{}]", slots.join(", "))
    });
    Ok(())
}

fn wasm_exit<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let code = call.mem.get_u32(call.sp + 8) as i32;
    if code != 0 {
        eprintln!("[wasgo-host] guest exited with code {code}");
        process::exit(code);
    }
    Ok(())
}

fn wasm_write<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    // the fd is part of the frame but every stream goes to our stdout
    let _fd = call.mem.get_i64(call.sp + 8);
    let bytes = call.mem.get_bytes(call.sp + 16);
    let mut out = io::stdout().lock();
    out.write_all(&bytes).context("writing guest output")?;
    out.flush().context("flushing guest output")?;
    Ok(())
}

fn walltime<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?;
    call.mem.set_i64(call.sp + 8, now.as_secs() as i64);
    call.mem.set_i32(call.sp + 16, now.subsec_nanos() as i32);
    Ok(())
}

fn nanotime<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?;
    call.mem.set_i64(call.sp + 8, now.as_nanos() as i64);
    Ok(())
}

fn get_random_data<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let ptr = call.mem.get_i64(call.sp + 8) as usize;
    let len = call.mem.get_i32(call.sp + 16) as usize;
    let buf = call.mem.mut_mem_slice(ptr, ptr + len);
    getrandom::fill(buf).map_err(|err| anyhow::anyhow!("randomness source failed: {err}"))?;
    Ok(())
}

fn noop<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let sp = call.sp;
    debug_log(|| format!("noop host call (sp={sp})"));
    Ok(())
}

fn value_get<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let key = call.mem.get_string(call.sp + 16);
    debug_log(|| format!("valueGet: {key}"));
    Ok(())
}

fn env_println<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let sp = call.sp;
    debug_log(|| format!("env.println (sp={sp})"));
    Ok(())
}

fn prepare_bytes<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let len = call.state.refs.prepare(handle);
    call.mem.set_i64(call.sp + 16, len);
    Ok(())
}

fn load_bytes<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_u32(call.sp + 8) as i32;
    let ptr = call.mem.get_i64(call.sp + 16);
    let cap = call.mem.get_i32(call.sp + 24) as usize;
    let bytes = call.state.refs.consume(handle);
    assert!(
        bytes.len() <= cap,
        "guest buffer too small for ref {handle}: need {}, have {cap}",
        bytes.len()
    );
    call.mem.set_bytes_at(ptr, &bytes);
    Ok(())
}

fn getenv<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let key = call.mem.get_string(call.sp + 8);
    let value = call.state.env_vars.get(&key).cloned();
    call.mem.set_bool(call.sp + 24, value.is_some());
    if let Some(value) = value {
        call.set_string(call.sp + 28, value.into_bytes());
    }
    Ok(())
}

fn setenv<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let key = call.mem.get_string(call.sp + 8);
    let value = call.mem.get_string(call.sp + 24);
    call.state.env_vars.insert(key, value);
    Ok(())
}

fn listen_tcp<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let addr = call.mem.get_string(call.sp + 8);
    let result = parse_addr(&addr).and_then(|addr| call.state.net.listen(addr));
    call.set_i32_result(call.sp + 24, result);
    Ok(())
}

fn dial_tcp<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let addr = call.mem.get_string(call.sp + 8);
    let result = parse_addr(&addr).and_then(|addr| call.state.net.dial(addr));
    call.set_i32_result(call.sp + 24, result);
    Ok(())
}

fn accept_tcp<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let result = call.state.net.accept(handle);
    call.set_i32_result(call.sp + 16, result);
    Ok(())
}

fn close_handle<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let result = call.state.net.close(handle);
    call.set_unit_result(call.sp + 16, result);
    Ok(())
}

fn get_error<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    match call.state.net.pending_error(handle) {
        Ok(Some(err)) => {
            call.set_error(call.sp + 16, &err);
            call.mem.set_bool(call.sp + 20, true);
        }
        Ok(None) => call.mem.set_bool(call.sp + 20, false),
        Err(err) => {
            call.set_error(call.sp + 16, &err);
            call.mem.set_bool(call.sp + 20, true);
        }
    }
    Ok(())
}

fn shutdown_conn<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let how = call.mem.get_i32(call.sp + 12);
    let result = call.state.net.shutdown(handle, how);
    call.set_unit_result(call.sp + 16, result);
    Ok(())
}

fn read_conn<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let ptr = call.mem.get_i64(call.sp + 16);
    let len = call.mem.get_i64(call.sp + 24) as usize;
    let mut buf = vec![0u8; len];
    let result = call.state.net.read(handle, &mut buf);
    if let Ok(n) = result {
        call.mem.set_bytes_at(ptr, &buf[..n]);
    }
    call.set_usize_result(call.sp + 40, result);
    Ok(())
}

fn write_conn<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let data = call.mem.get_bytes(call.sp + 16);
    let result = call.state.net.write(handle, &data);
    call.set_usize_result(call.sp + 40, result);
    Ok(())
}

fn local_addr<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let addr = call.state.net.local_addr(handle)?;
    write_addr(call, addr)
}

fn remote_addr<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let addr = call.state.net.peer_addr(handle)?;
    write_addr(call, addr)
}

fn write_addr<M: MemoryView>(call: &mut HostCall<'_, M>, addr: std::net::SocketAddr) -> Result<()> {
    let ptr = call.mem.get_i64(call.sp + 16) as usize;
    let len = call.mem.get_i64(call.sp + 24) as usize;
    addr_to_bytes(addr, call.mem.mut_mem_slice(ptr, ptr + len))?;
    Ok(())
}

fn set_read_deadline<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let at = deadline_from_unix_nanos(call.mem.get_i64(call.sp + 16));
    let result = call.state.net.set_read_deadline(handle, at);
    call.set_unit_result(call.sp + 24, result);
    Ok(())
}

fn set_write_deadline<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let handle = call.mem.get_i32(call.sp + 8);
    let at = deadline_from_unix_nanos(call.mem.get_i64(call.sp + 16));
    let result = call.state.net.set_write_deadline(handle, at);
    call.set_unit_result(call.sp + 24, result);
    Ok(())
}

fn lookup_ip<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let host = call.mem.get_string(call.sp + 8);
    match dns::lookup_ip(&host) {
        Ok(addrs) => {
            let octets = addrs.into_iter().map(|ip| ip.octets().to_vec()).collect();
            call.set_string_array(call.sp + 24, octets);
            call.mem.set_bool(call.sp + 28, true);
        }
        Err(err) => {
            call.set_error(call.sp + 24, &err);
            call.mem.set_bool(call.sp + 28, false);
        }
    }
    Ok(())
}

fn lookup_addr<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let addr = call.mem.get_string(call.sp + 8);
    match dns::lookup_addr(&addr) {
        Ok(names) => {
            let names = names.into_iter().map(String::into_bytes).collect();
            call.set_string_array(call.sp + 24, names);
            call.mem.set_bool(call.sp + 28, true);
        }
        Err(err) => {
            call.set_error(call.sp + 24, &err);
            call.mem.set_bool(call.sp + 28, false);
        }
    }
    Ok(())
}

fn lookup_port<M: MemoryView>(call: &mut HostCall<'_, M>) -> Result<()> {
    let network = call.mem.get_string(call.sp + 8);
    let service = call.mem.get_string(call.sp + 24);
    match dns::lookup_port(&network, &service) {
        Ok(port) => {
            call.mem.set_i32(call.sp + 40, i32::from(port));
            call.mem.set_bool(call.sp + 44, true);
        }
        Err(err) => {
            call.mem.set_bool(call.sp + 44, false);
            call.set_string(call.sp + 48, err.to_string().into_bytes());
        }
    }
    Ok(())
}

fn parse_addr(addr: &str) -> io::Result<std::net::SocketAddr> {
    addr.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid socket address: {addr}"),
        )
    })
}

/// Guest deadlines arrive as absolute unix nanos; 0 clears. A deadline
/// already in the past maps to "now" so pending waits fail immediately.
fn deadline_from_unix_nanos(nanos: i64) -> Option<Instant> {
    if nanos == 0 {
        return None;
    }
    let target = UNIX_EPOCH + Duration::from_nanos(nanos.max(0) as u64);
    let at = match target.duration_since(SystemTime::now()) {
        Ok(ahead) => Instant::now() + ahead,
        Err(_) => Instant::now(),
    };
    Some(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Mem;

    const SP: i32 = 4096;
    const DATA: i64 = 8192;

    fn new_mem() -> Vec<u8> {
        vec![0u8; 1 << 16]
    }

    fn dispatch(mem: &mut Mem<'_>, state: &mut HostState, field: &str) {
        let func = resolve("go", field).unwrap();
        let mut call = HostCall { mem, state, sp: SP };
        func.call(&mut call).unwrap();
    }

    fn put_string(mem: &mut Mem<'_>, addr: i32, ptr: i64, s: &str) {
        mem.set_bytes_at(ptr, s.as_bytes());
        mem.set_i64(addr, ptr);
        mem.set_i64(addr + 8, s.len() as i64);
    }

    fn take_string(state: &mut HostState, handle: i32) -> String {
        String::from_utf8(state.refs.consume(handle)).unwrap()
    }

    #[test]
    fn getenv_and_setenv_round_trip() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        put_string(&mut mem, SP + 8, DATA, "HOME");
        dispatch(&mut mem, &mut state, "wasm.getenv");
        assert!(!mem.get_bool(SP + 24));

        put_string(&mut mem, SP + 8, DATA, "HOME");
        put_string(&mut mem, SP + 24, DATA + 64, "/tmp/guest");
        dispatch(&mut mem, &mut state, "wasm.setenv");

        put_string(&mut mem, SP + 8, DATA, "HOME");
        dispatch(&mut mem, &mut state, "wasm.getenv");
        assert!(mem.get_bool(SP + 24));
        let handle = mem.get_i32(SP + 28);
        assert_eq!(take_string(&mut state, handle), "/tmp/guest");
    }

    #[test]
    fn get_random_data_fills_buffers() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        for ptr in [DATA, DATA + 64] {
            mem.set_i64(SP + 8, ptr);
            mem.set_i32(SP + 16, 16);
            dispatch(&mut mem, &mut state, "runtime.getRandomData");
            let buf = mem.mem_slice(ptr as usize, ptr as usize + 16);
            assert!(buf.iter().any(|&b| b != 0));
        }
    }

    #[test]
    fn walltime_and_nanotime_are_current() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        dispatch(&mut mem, &mut state, "runtime.walltime");
        let secs = mem.get_i64(SP + 8);
        let nanos = mem.get_i32(SP + 16);
        assert!(secs > 1_600_000_000);
        assert!((0..1_000_000_000).contains(&nanos));

        dispatch(&mut mem, &mut state, "runtime.nanotime");
        assert!(mem.get_i64(SP + 8) >= secs * 1_000_000_000);
    }

    #[test]
    fn wasm_write_accepts_any_fd() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        for fd in [1i64, 99] {
            mem.set_i64(SP + 8, fd);
            put_string(&mut mem, SP + 16, DATA, "");
            dispatch(&mut mem, &mut state, "runtime.wasmWrite");
        }
    }

    #[test]
    fn prepare_and_load_bytes_protocol() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        let handle = state.refs.store(b"payload".to_vec());
        mem.set_i32(SP + 8, handle);
        dispatch(&mut mem, &mut state, "wasm.prepareBytes");
        assert_eq!(mem.get_i64(SP + 16), 7);

        mem.set_i32(SP + 8, handle);
        mem.set_i64(SP + 16, DATA);
        mem.set_i32(SP + 24, 7);
        dispatch(&mut mem, &mut state, "wasm.loadBytes");
        assert_eq!(mem.mem_slice(DATA as usize, DATA as usize + 7), b"payload");

        // the entry is spent, a second fetch sees zero length
        mem.set_i32(SP + 8, handle);
        dispatch(&mut mem, &mut state, "wasm.prepareBytes");
        assert_eq!(mem.get_i64(SP + 16), 0);
    }

    #[test]
    fn string_array_encoding_decodes_in_order() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        {
            let mut call = HostCall {
                mem: &mut mem,
                state: &mut state,
                sp: SP,
            };
            call.set_string_array(
                SP + 24,
                vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()],
            );
        }
        let outer = mem.get_i32(SP + 24);
        let handles = state.refs.consume(outer);
        assert_eq!(handles.len(), 12);
        let decoded: Vec<Vec<u8>> = handles
            .chunks(4)
            .map(|chunk| {
                let h = i32::from_le_bytes(chunk.try_into().unwrap());
                state.refs.consume(h)
            })
            .collect();
        assert_eq!(decoded, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn unknown_module_is_fatal_unknown_field_is_not() {
        assert!(resolve::<Mem<'_>>("wasi_snapshot_preview1", "fd_write").is_err());

        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();
        let func: HostFn<Mem<'_>> = resolve("go", "runtime.notYetInvented").unwrap();
        let mut call = HostCall {
            mem: &mut mem,
            state: &mut state,
            sp: SP,
        };
        func.call(&mut call).unwrap();
        assert!(state.refs.is_empty());
    }

    #[test]
    fn scenario_a_over_the_abi() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        put_string(&mut mem, SP + 8, DATA, "127.0.0.1:0");
        dispatch(&mut mem, &mut state, "net.listenTCP");
        assert!(mem.get_bool(SP + 28));
        let listener = mem.get_i32(SP + 24);

        mem.set_i32(SP + 8, listener);
        mem.set_i64(SP + 16, DATA + 128);
        mem.set_i64(SP + 24, 6);
        dispatch(&mut mem, &mut state, "net.localAddr");
        let encoded = mem.mem_slice(DATA as usize + 128, DATA as usize + 134);
        let port = u16::from(encoded[4]) | (u16::from(encoded[5]) << 8);
        assert_ne!(port, 0);

        put_string(&mut mem, SP + 8, DATA + 192, &format!("127.0.0.1:{port}"));
        dispatch(&mut mem, &mut state, "net.dialTcp");
        assert!(mem.get_bool(SP + 28), "dial failed");
        let client = mem.get_i32(SP + 24);

        mem.set_i32(SP + 8, client);
        put_string(&mut mem, SP + 16, DATA + 256, "ping");
        mem.set_i64(SP + 32, 4);
        dispatch(&mut mem, &mut state, "net.writeConn");
        assert!(mem.get_bool(SP + 44), "write failed");
        assert_eq!(mem.get_i32(SP + 40), 4);

        mem.set_i32(SP + 8, listener);
        dispatch(&mut mem, &mut state, "net.acceptTcp");
        assert!(mem.get_bool(SP + 20), "accept failed");
        let server = mem.get_i32(SP + 16);

        mem.set_i32(SP + 8, server);
        mem.set_i64(SP + 16, DATA + 512);
        mem.set_i64(SP + 24, 4096);
        dispatch(&mut mem, &mut state, "net.readConn");
        assert!(mem.get_bool(SP + 44), "read failed");
        assert_eq!(mem.get_i32(SP + 40), 4);
        assert_eq!(mem.mem_slice(DATA as usize + 512, DATA as usize + 516), b"ping");

        for handle in [client, server, listener] {
            mem.set_i32(SP + 8, handle);
            dispatch(&mut mem, &mut state, "net.closeConn");
            assert!(mem.get_bool(SP + 20));
        }
    }

    #[test]
    fn dial_failure_reaches_the_guest() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        // bind then drop so the port is known-dead
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        put_string(&mut mem, SP + 8, DATA, &format!("127.0.0.1:{port}"));
        dispatch(&mut mem, &mut state, "net.dialTcp");
        assert!(!mem.get_bool(SP + 28));
        let handle = mem.get_i32(SP + 24);
        assert!(!take_string(&mut state, handle).is_empty());
    }

    #[test]
    fn read_deadline_fails_blocked_read() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        put_string(&mut mem, SP + 8, DATA, "127.0.0.1:0");
        dispatch(&mut mem, &mut state, "net.listenTCP");
        let listener = mem.get_i32(SP + 24);
        let addr = state.net.local_addr(listener).unwrap();

        put_string(&mut mem, SP + 8, DATA + 64, &addr.to_string());
        dispatch(&mut mem, &mut state, "net.dialTcp");
        assert!(mem.get_bool(SP + 28));
        let client = mem.get_i32(SP + 24);

        let deadline = SystemTime::now() + Duration::from_millis(50);
        let nanos = deadline.duration_since(UNIX_EPOCH).unwrap().as_nanos() as i64;
        mem.set_i32(SP + 8, client);
        mem.set_i64(SP + 16, nanos);
        dispatch(&mut mem, &mut state, "net.setReadDeadline");
        assert!(mem.get_bool(SP + 28));

        let start = Instant::now();
        mem.set_i32(SP + 8, client);
        mem.set_i64(SP + 16, DATA + 512);
        mem.set_i64(SP + 24, 64);
        dispatch(&mut mem, &mut state, "net.readConn");
        assert!(!mem.get_bool(SP + 44));
        assert!(start.elapsed() < Duration::from_secs(5));
        let handle = mem.get_i32(SP + 40);
        assert!(take_string(&mut state, handle).contains("deadline"));
    }

    #[test]
    fn lookup_port_over_the_abi() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        put_string(&mut mem, SP + 8, DATA, "tcp");
        put_string(&mut mem, SP + 24, DATA + 64, "http");
        dispatch(&mut mem, &mut state, "net.lookupPort");
        assert!(mem.get_bool(SP + 44));
        assert_eq!(mem.get_i32(SP + 40), 80);

        put_string(&mut mem, SP + 8, DATA, "tcp");
        put_string(&mut mem, SP + 24, DATA + 64, "no-such-service");
        dispatch(&mut mem, &mut state, "net.lookupPort");
        assert!(!mem.get_bool(SP + 44));
        let handle = mem.get_i32(SP + 48);
        assert!(!take_string(&mut state, handle).is_empty());
    }

    #[test]
    fn lookup_ip_over_the_abi() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        put_string(&mut mem, SP + 8, DATA, "127.0.0.1");
        dispatch(&mut mem, &mut state, "net.lookupIP");
        assert!(mem.get_bool(SP + 28));
        let outer = mem.get_i32(SP + 24);
        let handles = state.refs.consume(outer);
        assert_eq!(handles.len(), 4);
        let first = i32::from_le_bytes(handles[0..4].try_into().unwrap());
        assert_eq!(state.refs.consume(first), vec![127, 0, 0, 1]);
    }

    #[test]
    fn get_error_reports_nothing_on_a_healthy_conn() {
        let mut bytes = new_mem();
        let mut mem = Mem::new(&mut bytes);
        let mut state = HostState::new().unwrap();

        put_string(&mut mem, SP + 8, DATA, "127.0.0.1:0");
        dispatch(&mut mem, &mut state, "net.listenTCP");
        let listener = mem.get_i32(SP + 24);

        mem.set_i32(SP + 8, listener);
        dispatch(&mut mem, &mut state, "net.getError");
        assert!(!mem.get_bool(SP + 20));
    }
}
