use std::io;
use std::net::SocketAddr;

fn u16_as_u8_le(x: u16) -> [u8; 2] {
    [(x & 0xff) as u8, ((x >> 8) & 0xff) as u8]
}

/// Encodes an IPv4 socket address into the guest's 6-byte descriptor:
/// four address octets followed by the port, little-endian.
pub fn addr_to_bytes(addr: SocketAddr, b: &mut [u8]) -> io::Result<()> {
    match addr {
        SocketAddr::V4(a) => {
            b[0..4].copy_from_slice(&a.ip().octets());
            b[4..6].copy_from_slice(&u16_as_u8_le(a.port()));
            Ok(())
        }
        SocketAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "IPv6 addresses are not supported",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_u16_le(array: &[u8]) -> u16 {
        u16::from(array[0]) | (u16::from(array[1]) << 8)
    }

    #[test]
    fn encodes_octets_and_port() {
        let mut mem = vec![0u8; 6];
        addr_to_bytes("1.2.3.4:100".parse().unwrap(), &mut mem).unwrap();
        assert_eq!(mem, [1, 2, 3, 4, 100, 0]);

        let mut mem = vec![0u8; 6];
        addr_to_bytes("127.0.0.1:34254".parse().unwrap(), &mut mem).unwrap();
        assert_eq!(as_u16_le(&mem[4..6]), 34254u16);
    }

    #[test]
    fn rejects_ipv6() {
        let mut mem = vec![0u8; 6];
        let err = addr_to_bytes("[::1]:80".parse().unwrap(), &mut mem).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
