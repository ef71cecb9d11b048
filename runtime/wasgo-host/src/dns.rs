//! Name resolution for the guest's net package.
//!
//! Forward lookups ride on the system resolver through `ToSocketAddrs`.
//! Reverse lookups go straight to `getnameinfo`, which the standard library
//! does not expose.

use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

/// Resolves `host` to its IPv4 addresses. The socket layer only speaks
/// IPv4, so v6 records are dropped rather than reported.
pub fn lookup_ip(host: &str) -> io::Result<Vec<Ipv4Addr>> {
    let addrs = (host, 0).to_socket_addrs()?;
    Ok(addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect())
}

/// Reverse-resolves a literal IP address to its host names.
pub fn lookup_addr(addr: &str) -> io::Result<Vec<String>> {
    let ip: IpAddr = addr.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid address for reverse lookup: {addr}"),
        )
    })?;
    reverse_lookup(ip)
}

#[cfg(unix)]
fn reverse_lookup(ip: IpAddr) -> io::Result<Vec<String>> {
    use std::ffi::CStr;
    use std::mem;

    // glibc NI_MAXHOST
    const MAX_HOST: usize = 1025;

    let mut host = [0 as libc::c_char; MAX_HOST];
    let rc = match ip {
        IpAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_addr.s_addr = u32::from(v4).to_be();
            unsafe {
                libc::getnameinfo(
                    &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    MAX_HOST as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
        IpAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr.s6_addr = v6.octets();
            unsafe {
                libc::getnameinfo(
                    &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    MAX_HOST as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };
    if rc != 0 {
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(io::Error::other(format!(
            "reverse lookup of {ip} failed: {}",
            reason.to_string_lossy()
        )));
    }
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Ok(vec![name.to_string_lossy().into_owned()])
}

#[cfg(not(unix))]
fn reverse_lookup(ip: IpAddr) -> io::Result<Vec<String>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("reverse lookup of {ip} is not supported on this platform"),
    ))
}

/// Maps a service name to its port. Numeric strings pass through; named
/// services come from a fixed table rather than /etc/services so behavior
/// does not vary across hosts.
pub fn lookup_port(network: &str, service: &str) -> io::Result<u16> {
    match network {
        "" | "tcp" | "tcp4" | "tcp6" | "udp" | "udp4" | "udp6" => {}
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown network: {network}"),
            ));
        }
    }
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }
    let port = match service.to_ascii_lowercase().as_str() {
        "echo" => 7,
        "ftp" => 21,
        "ssh" => 22,
        "telnet" => 23,
        "smtp" => 25,
        "domain" | "dns" => 53,
        "http" => 80,
        "pop3" => 110,
        "ntp" => 123,
        "imap" => 143,
        "https" => 443,
        "submission" => 587,
        "imaps" => 993,
        "pop3s" => 995,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown service: {network}/{service}"),
            ));
        }
    };
    Ok(port)
}
