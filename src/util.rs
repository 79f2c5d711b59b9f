use core::fmt;

/// Ceiling division. `ceil_div(0, n)` is 0.
pub fn ceil_div(dividend: u32, divisor: u32) -> u32 {
    match dividend {
        0 => 0,
        n => 1 + (n - 1) / divisor,
    }
}

/// Encodes `addr` big-endian into `out`; the wire format puts the highest
/// byte first. `out` is the 3-byte address slot of a command packet.
pub fn put_addr(mut addr: u32, out: &mut [u8]) {
    for slot in out.iter_mut().rev() {
        *slot = addr as u8;
        addr >>= 8;
    }
}

// Only referenced from packet traces, which compile away without `log`.
#[cfg_attr(not(feature = "log"), allow(dead_code))]
pub struct HexSlice<T>(pub T)
where
    T: AsRef<[u8]>;

impl<T: AsRef<[u8]>> fmt::Debug for HexSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.0.as_ref().iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(0, 256), 0);
        assert_eq!(ceil_div(1, 256), 1);
        assert_eq!(ceil_div(256, 256), 1);
        assert_eq!(ceil_div(257, 256), 2);
        assert_eq!(ceil_div(u32::max_value(), 1), u32::max_value());
    }

    #[test]
    fn test_put_addr() {
        let mut out = [0u8; 3];
        put_addr(0x123456, &mut out);
        assert_eq!(out, [0x12, 0x34, 0x56]);
        put_addr(0x000100, &mut out);
        assert_eq!(out, [0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_hex_slice() {
        let s = format!("{:?}", HexSlice([0x03u8, 0x00, 0xff]));
        assert_eq!(s, "[03, 00, ff]");
    }
}
