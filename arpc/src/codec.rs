//! Argument and result codec.
//!
//! Arguments travel as one rkyv-archived tuple, results as one archived
//! value. Any type rkyv can archive, serialize and validate implements
//! [`Encode`] and [`Decode`] through the blanket impls below.

use crate::error::{ArpcError, Result};
use rkyv::Archive;
use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;

/// A value that can be written to a byte buffer.
pub trait Encode {
    fn encode(&self) -> Result<Vec<u8>>;
}

/// A value that can be read back from a buffer produced by [`Encode`].
pub trait Decode: Sized {
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl<T> Encode for T
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    fn encode(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| ArpcError::EncodeFailed(e.to_string()))
    }
}

impl<T> Decode for T
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + rkyv::Deserialize<T, HighDeserializer<rancor::Error>>,
{
    fn decode(bytes: &[u8]) -> Result<Self> {
        // Received buffers carry no alignment guarantee; validation needs one.
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<T, rancor::Error>(&aligned)
            .map_err(|e| ArpcError::DecodeFailed(e.to_string()))
    }
}

/// Encode a value with the crate codec.
pub fn encode<T: Encode>(value: &T) -> Result<Vec<u8>> {
    value.encode()
}

/// Decode a value with the crate codec.
pub fn decode<T: Decode>(bytes: &[u8]) -> Result<T> {
    T::decode(bytes)
}
