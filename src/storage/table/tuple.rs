use byteorder::{ByteOrder, LittleEndian};

use crate::common::rid::Rid;

/// A table row as an opaque byte payload. The column machinery that
/// interprets the bytes lives with the host; the engine only moves them,
/// logs them and serializes them as an i32 length followed by the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    rid: Rid,
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            rid: Rid::invalid(),
            data,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// The rid is valid once the tuple points into a table heap.
    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Rid) {
        self.rid = rid;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes this tuple occupies in serialized form.
    pub fn serialized_len(&self) -> usize {
        4 + self.data.len()
    }

    /// Write `i32 length | bytes` at the start of `buf`.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.data.len() as i32);
        buf[4..4 + self.data.len()].copy_from_slice(&self.data);
    }

    /// Read a tuple back from `i32 length | bytes`. Returns None when the
    /// buffer is truncated or the length is nonsense.
    pub fn deserialize_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let len = LittleEndian::read_i32(&buf[0..4]);
        if len < 0 || buf.len() < 4 + len as usize {
            return None;
        }
        Some(Self::new(buf[4..4 + len as usize].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip() {
        let tuple = Tuple::from_bytes(b"some row payload");
        let mut buf = vec![0u8; tuple.serialized_len()];
        tuple.serialize_into(&mut buf);

        let back = Tuple::deserialize_from(&buf).unwrap();
        assert_eq!(back.data(), tuple.data());
        assert_eq!(back.len(), tuple.len());
    }

    #[test]
    fn test_deserialize_truncated() {
        let tuple = Tuple::from_bytes(b"0123456789");
        let mut buf = vec![0u8; tuple.serialized_len()];
        tuple.serialize_into(&mut buf);

        assert!(Tuple::deserialize_from(&buf[..2]).is_none());
        assert!(Tuple::deserialize_from(&buf[..buf.len() - 1]).is_none());
    }

    #[test]
    fn test_empty_tuple() {
        let tuple = Tuple::new(Vec::new());
        let mut buf = vec![0u8; 4];
        tuple.serialize_into(&mut buf);
        let back = Tuple::deserialize_from(&buf).unwrap();
        assert!(back.is_empty());
    }
}
