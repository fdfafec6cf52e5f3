//! Tagged 32-bit handles.
//!
//! A handle packs a slot index in the low bits and a [`StorageKind`] in the
//! high bits, so static and dynamic resources share one identifier space
//! while living in separate pools. The kind field is as narrow as the number
//! of kinds allows; every other bit belongs to the index.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Storage strategy of a mesh or model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StorageKind {
    /// Device-local, immutable after upload
    Static = 0,
    /// Host-visible ring buffer rewritten by the CPU
    Dynamic = 1,
}

impl StorageKind {
    pub const ALL: [StorageKind; 2] = [StorageKind::Static, StorageKind::Dynamic];

    const fn from_bits(bits: u32) -> Self {
        match bits {
            0 => StorageKind::Static,
            _ => StorageKind::Dynamic,
        }
    }
}

/// Bits holding the storage kind: `ceil(log2(kind count))`.
pub const KIND_BITS: u32 = u32::BITS - (StorageKind::ALL.len() as u32 - 1).leading_zeros();

/// Bits holding the slot index.
pub const INDEX_BITS: u32 = u32::BITS - KIND_BITS;

/// Largest encodable slot index.
pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;

/// Packs `index` and `kind` into a raw handle.
///
/// Pools check `index <= MAX_INDEX` before calling this; an index that does
/// not fit is never truncated.
#[inline]
pub const fn encode(index: u32, kind: StorageKind) -> u32 {
    debug_assert!(index <= MAX_INDEX);
    ((kind as u32) << INDEX_BITS) | index
}

/// Splits a raw handle into slot index and storage kind.
#[inline]
pub const fn decode(raw: u32) -> (u32, StorageKind) {
    (raw & MAX_INDEX, StorageKind::from_bits(raw >> INDEX_BITS))
}

/// Typed handle into a [`ResourcePool`](crate::ResourcePool).
///
/// `T` is a marker naming what the handle refers to; handles to different
/// resource types do not mix.
pub struct Handle<T> {
    raw: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// # Panics
    ///
    /// Panics if `index` exceeds [`MAX_INDEX`].
    pub fn new(index: u32, kind: StorageKind) -> Self {
        assert!(
            index <= MAX_INDEX,
            "handle index {index} does not fit in {INDEX_BITS} bits"
        );
        Self::from_raw(encode(index, kind))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.raw
    }

    #[inline]
    pub const fn index(self) -> u32 {
        decode(self.raw).0
    }

    #[inline]
    pub const fn kind(self) -> StorageKind {
        decode(self.raw).1
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}, {:?})", self.index(), self.kind())
    }
}

/// Marker for mesh handles.
#[derive(Debug)]
pub enum MeshTag {}

/// Marker for model handles.
#[derive(Debug)]
pub enum ModelTag {}

pub type MeshId = Handle<MeshTag>;
pub type ModelId = Handle<ModelTag>;

/// Dense material index. Materials have a single storage kind and are never
/// destroyed, so the index is not tagged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(pub(crate) u32);

impl MaterialId {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_bit_widths() {
        assert_eq!(KIND_BITS, 1);
        assert_eq!(INDEX_BITS, 31);
        assert_eq!(MAX_INDEX, 0x7FFF_FFFF);
    }

    #[rstest]
    #[case(0, StorageKind::Static)]
    #[case(0, StorageKind::Dynamic)]
    #[case(1, StorageKind::Static)]
    #[case(42, StorageKind::Dynamic)]
    #[case(MAX_INDEX, StorageKind::Static)]
    #[case(MAX_INDEX, StorageKind::Dynamic)]
    fn test_encode_decode_round_trip(#[case] index: u32, #[case] kind: StorageKind) {
        assert_eq!(decode(encode(index, kind)), (index, kind));
    }

    #[rstest]
    #[case(0)]
    #[case(u32::MAX)]
    #[case(0x8000_0000)]
    #[case(0x1234_5678)]
    fn test_any_raw_value_round_trips(#[case] raw: u32) {
        let (index, kind) = decode(raw);
        assert_eq!(encode(index, kind), raw);
    }

    #[test]
    fn test_kind_occupies_high_bit() {
        assert_eq!(encode(5, StorageKind::Dynamic), 0x8000_0005);
        assert_eq!(encode(5, StorageKind::Static), 5);
    }

    #[test]
    fn test_handle_accessors() {
        let handle = MeshId::new(7, StorageKind::Dynamic);
        assert_eq!(handle.index(), 7);
        assert_eq!(handle.kind(), StorageKind::Dynamic);
        assert_eq!(MeshId::from_raw(handle.raw()), handle);
        assert_ne!(handle, MeshId::new(7, StorageKind::Static));
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn test_oversized_index_panics() {
        let _ = ModelId::new(MAX_INDEX + 1, StorageKind::Static);
    }
}
