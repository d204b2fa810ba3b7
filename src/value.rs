//! Register value and address types.
//!
//! Chip families differ in how wide an address is on the bus (8 or 16 bit) and in
//! what a register holds: a fixed-size scalar (`u8`, `u16`, `u32`) or a byte
//! sequence whose length is declared per register ([`Bytes`]). Both kinds share the
//! bit operations needed by [`Variable`](crate::register::Variable) so masked
//! field access works the same way for every table flavour.

use core::fmt;

use crate::slice::ROSlice;

/// Address type of a register table.
///
/// Addresses are ordered, so table iteration and block coalescing can rely on
/// `Ord`. On the bus every address is widened to `u32` and offset by the table's
/// base.
pub trait Address: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Widens the address for the transport.
    fn to_bus(self) -> u32;

    /// Returns the address immediately after `self`, if it exists.
    fn next(self) -> Option<Self>;

    /// Number of addresses in the inclusive range `self..=last`.
    fn distance(self, last: Self) -> usize {
        (last.to_bus() - self.to_bus()) as usize + 1
    }
}

macro_rules! impl_address {
    ($($t:ty),*) => {
        $(
            impl Address for $t {
                #[inline]
                fn to_bus(self) -> u32 {
                    u32::from(self)
                }

                #[inline]
                fn next(self) -> Option<Self> {
                    self.checked_add(1)
                }
            }
        )*
    };
}

impl_address!(u8, u16);

/// Value held by a register.
///
/// The wire encoding is big-endian. `encoded_len` is fixed for scalars and equals
/// the declared register width for [`Bytes`].
pub trait RegisterValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Encoded size of one value, or `None` when the size is declared per register.
    const FIXED_LEN: Option<usize>;

    /// An all-zero value of `len` bytes.
    fn zeroed(len: usize) -> Self;

    /// Decodes `bytes`; the caller guarantees the length is correct.
    fn from_be_slice(bytes: &[u8]) -> Self;

    /// Appends the big-endian encoding to `out`.
    fn write_be(&self, out: &mut Vec<u8>);

    fn encoded_len(&self) -> usize;

    fn bit_and(&self, rhs: &Self) -> Self;
    fn bit_or(&self, rhs: &Self) -> Self;
    fn bit_not(&self) -> Self;
    fn shl(&self, bits: u32) -> Self;
    fn shr(&self, bits: u32) -> Self;

    /// Number of trailing zero bits; for an all-zero value this is the bit width.
    fn trailing_zeros(&self) -> u32;

    fn is_zero(&self) -> bool;

    fn to_be_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_be(&mut out);
        out
    }

    /// Uppercase hex, two characters per encoded byte.
    fn to_hex(&self) -> String {
        encode_hex(&self.to_be_vec())
    }
}

/// Fixed-size register value.
pub trait Scalar: RegisterValue + Copy {
    const BYTES: usize;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            paste::paste! {
                impl RegisterValue for $t {
                    const FIXED_LEN: Option<usize> = Some(core::mem::size_of::<$t>());

                    #[inline]
                    fn zeroed(_len: usize) -> Self {
                        0
                    }

                    #[inline]
                    fn from_be_slice(bytes: &[u8]) -> Self {
                        let mut raw = [0u8; core::mem::size_of::<$t>()];
                        raw.copy_from_slice(bytes);
                        <$t>::from_be_bytes(raw)
                    }

                    #[inline]
                    fn write_be(&self, out: &mut Vec<u8>) {
                        out.extend_from_slice(&self.to_be_bytes());
                    }

                    #[inline]
                    fn encoded_len(&self) -> usize {
                        core::mem::size_of::<$t>()
                    }

                    #[inline]
                    fn bit_and(&self, rhs: &Self) -> Self {
                        self & rhs
                    }

                    #[inline]
                    fn bit_or(&self, rhs: &Self) -> Self {
                        self | rhs
                    }

                    #[inline]
                    fn bit_not(&self) -> Self {
                        !self
                    }

                    #[inline]
                    fn shl(&self, bits: u32) -> Self {
                        self.checked_shl(bits).unwrap_or(0)
                    }

                    #[inline]
                    fn shr(&self, bits: u32) -> Self {
                        self.checked_shr(bits).unwrap_or(0)
                    }

                    #[inline]
                    fn trailing_zeros(&self) -> u32 {
                        <$t>::trailing_zeros(*self)
                    }

                    #[inline]
                    fn is_zero(&self) -> bool {
                        *self == 0
                    }
                }

                impl Scalar for $t {
                    const BYTES: usize = core::mem::size_of::<$t>();
                }

                #[doc = "Reads a big-endian `" $t "` register value from the start of `bytes`."]
                #[inline]
                pub fn [<$t _from_wire>](bytes: &[u8]) -> Option<$t> {
                    bytes
                        .get(..core::mem::size_of::<$t>())
                        .map(<$t as RegisterValue>::from_be_slice)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32);

/// Byte-sequence register value, most significant byte first.
///
/// Bit operations treat the sequence as one big-endian integer. Operands of
/// different lengths are right-aligned and the result takes the longer length,
/// so `Bytes::from(1u8)` can be used as the new value for a variable inside a
/// six-byte register.
#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Bytes(Vec<u8>);

impl Bytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Typed read access over the payload.
    pub fn view(&self) -> ROSlice<'_> {
        ROSlice::new(&self.0)
    }

    fn zip_with(&self, rhs: &Self, f: impl Fn(u8, u8) -> u8) -> Self {
        let len = self.0.len().max(rhs.0.len());
        let pad_l = len - self.0.len();
        let pad_r = len - rhs.0.len();
        let out = (0..len)
            .map(|i| {
                let l = if i < pad_l { 0 } else { self.0[i - pad_l] };
                let r = if i < pad_r { 0 } else { rhs.0[i - pad_r] };
                f(l, r)
            })
            .collect();
        Self(out)
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes({})", encode_hex(&self.0))
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Bytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<u8> for Bytes {
    fn from(value: u8) -> Self {
        Self(vec![value])
    }
}

impl From<u16> for Bytes {
    fn from(value: u16) -> Self {
        Self(value.to_be_bytes().to_vec())
    }
}

impl From<u32> for Bytes {
    fn from(value: u32) -> Self {
        Self(value.to_be_bytes().to_vec())
    }
}

impl RegisterValue for Bytes {
    const FIXED_LEN: Option<usize> = None;

    fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    fn from_be_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    fn write_be(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn encoded_len(&self) -> usize {
        self.0.len()
    }

    fn bit_and(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |l, r| l & r)
    }

    fn bit_or(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |l, r| l | r)
    }

    fn bit_not(&self) -> Self {
        Self(self.0.iter().map(|b| !b).collect())
    }

    fn shl(&self, bits: u32) -> Self {
        let len = self.0.len();
        let bytes = (bits / 8) as usize;
        let rem = bits % 8;
        let mut out = vec![0u8; len];
        for (i, slot) in out.iter_mut().enumerate() {
            let src = i + bytes;
            if src >= len {
                break;
            }
            let hi = self.0[src] << rem;
            let lo = match (rem, self.0.get(src + 1)) {
                (0, _) | (_, None) => 0,
                (r, Some(next)) => next >> (8 - r),
            };
            *slot = hi | lo;
        }
        Self(out)
    }

    fn shr(&self, bits: u32) -> Self {
        let len = self.0.len();
        let bytes = (bits / 8) as usize;
        let rem = bits % 8;
        let mut out = vec![0u8; len];
        for (i, slot) in out.iter_mut().enumerate().skip(bytes) {
            let src = i - bytes;
            let lo = self.0[src] >> rem;
            let hi = match rem {
                0 => 0,
                r if src > 0 => self.0[src - 1] << (8 - r),
                _ => 0,
            };
            *slot = hi | lo;
        }
        Self(out)
    }

    fn trailing_zeros(&self) -> u32 {
        let mut count = 0;
        for b in self.0.iter().rev() {
            if *b == 0 {
                count += 8;
            } else {
                return count + b.trailing_zeros();
            }
        }
        count
    }

    fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// Encodes `bytes` as uppercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Decodes a hex string (either case). Returns `None` on odd length or a
/// non-hex character.
pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_ops_match_native() {
        assert_eq!(0xA8u8.bit_and(&0x08), 0x08);
        assert_eq!(0xA8u8.bit_not(), 0x57);
        assert_eq!(0x01u8.shl(8), 0);
        assert_eq!(0x80u16.shr(7), 1);
        assert_eq!(0u32.trailing_zeros(), 32);
        assert_eq!(u16_from_wire(&[0x12, 0x34, 0x56]), Some(0x1234));
        assert_eq!(u32_from_wire(&[0x12]), None);
    }

    #[test]
    fn bytes_shift_across_byte_boundaries() {
        let v = Bytes::from([0x00, 0x81]);
        assert_eq!(v.shl(1), Bytes::from([0x01, 0x02]));
        assert_eq!(v.shl(8), Bytes::from([0x81, 0x00]));
        assert_eq!(Bytes::from([0x01, 0x02]).shr(1), Bytes::from([0x00, 0x81]));
        assert_eq!(Bytes::from([0x81, 0x00]).shr(12), Bytes::from([0x00, 0x08]));
    }

    #[test]
    fn bytes_ops_right_align_shorter_operand() {
        let raw = Bytes::from([0xF0, 0x0F]);
        let one = Bytes::from(0x01u8);
        assert_eq!(raw.bit_or(&one), Bytes::from([0xF0, 0x0F]));
        assert_eq!(raw.bit_and(&one), Bytes::from([0x00, 0x01]));
    }

    #[test]
    fn bytes_trailing_zeros() {
        assert_eq!(Bytes::from([0x10, 0x00]).trailing_zeros(), 12);
        assert_eq!(Bytes::zeroed(3).trailing_zeros(), 24);
    }

    #[test]
    fn hex_round_trip_is_case_insensitive() {
        assert_eq!(encode_hex(&[0x0A, 0xFF]), "0AFF");
        assert_eq!(decode_hex("0aff"), Some(vec![0x0A, 0xFF]));
        assert_eq!(decode_hex("0AF"), None);
        assert_eq!(decode_hex("0G"), None);
        assert_eq!(0x1234u16.to_hex(), "1234");
    }

    #[test]
    fn address_distance() {
        assert_eq!(0x00u8.distance(0x09), 10);
        assert_eq!(0xFFu8.next(), None);
        assert_eq!(0x1234u16.to_bus(), 0x1234);
    }
}
