use std::cmp::Ordering;
use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width index key that can be copied in and out of a page's
/// entry array.
pub trait IndexKey: Copy + Default + Debug + Send + Sync + 'static {
    /// Encoded width in bytes; every entry slot reserves exactly this.
    const WIDTH: usize;

    fn write_to(&self, buf: &mut [u8]);
    fn read_from(buf: &[u8]) -> Self;
}

/// Key ordering is supplied by the caller, mirroring how the host decides
/// collation; the tree never assumes `Ord` on the key type itself.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// An opaque fixed-width key of `N` bytes, typically the prefix of a
/// serialized column value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let n = bytes.len().min(N);
        data[..n].copy_from_slice(&bytes[..n]);
        Self { data }
    }

    /// Build a key from an integer, stored little-endian in the first
    /// eight bytes.
    pub fn from_i64(value: i64) -> Self {
        debug_assert!(N >= 8);
        let mut data = [0u8; N];
        LittleEndian::write_i64(&mut data[0..8], value);
        Self { data }
    }

    pub fn to_i64(&self) -> i64 {
        debug_assert!(N >= 8);
        LittleEndian::read_i64(&self.data[0..8])
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> Debug for GenericKey<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if N >= 8 {
            write!(f, "GenericKey({})", self.to_i64())
        } else {
            write!(f, "GenericKey({:?})", self.data)
        }
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const WIDTH: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }
}

impl IndexKey for i32 {
    const WIDTH: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[..4], *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(&buf[..4])
    }
}

impl IndexKey for i64 {
    const WIDTH: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(&mut buf[..8], *self);
    }

    fn read_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(&buf[..8])
    }
}

/// Comparator for keys whose type is naturally ordered.
#[derive(Clone, Copy, Default, Debug)]
pub struct OrdComparator;

impl<K: Ord + Clone + Send + Sync + 'static> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Compares `GenericKey`s by the i64 stored in their first eight bytes.
#[derive(Clone, Copy, Default, Debug)]
pub struct I64KeyComparator;

impl<const N: usize> KeyComparator<GenericKey<N>> for I64KeyComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.to_i64().cmp(&b.to_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_key_round_trip() {
        let key = GenericKey::<8>::from_i64(-12345);
        let mut buf = [0u8; 8];
        key.write_to(&mut buf);
        let back = GenericKey::<8>::read_from(&buf);
        assert_eq!(back.to_i64(), -12345);
    }

    #[test]
    fn test_i64_comparator_orders_keys() {
        let cmp = I64KeyComparator;
        let a = GenericKey::<8>::from_i64(1);
        let b = GenericKey::<8>::from_i64(2);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_primitive_keys() {
        let mut buf = [0u8; 8];
        42i64.write_to(&mut buf);
        assert_eq!(i64::read_from(&buf), 42);

        let mut buf = [0u8; 4];
        (-7i32).write_to(&mut buf);
        assert_eq!(i32::read_from(&buf), -7);
    }
}
