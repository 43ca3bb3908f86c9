//! # Codec Interfaces
//!
//! The engine stores raw bytes and knows nothing about key or value types;
//! everything type-shaped flows through the narrow interfaces in this
//! module. A map is generic over one [`KeyCodec`] and one [`ValueCodec`];
//! the remaining collaborators (size prefixes, default values, factories,
//! event listeners, error sinks) are trait objects injected at construction.
//!
//! ## Hashing Contract
//!
//! `KeyCodec::hash` feeds both segment routing and the persisted fingerprint
//! index, so it MUST be deterministic across processes and program runs.
//! `std::hash` types are randomized per process and must not back a codec;
//! the bundled codecs use xxh3 over the encoded key bytes.
//!
//! ## Prefix Equality
//!
//! `KeyCodec::matches` tests whether stored bytes encode a given key without
//! materializing the stored key. Collision walks call it once per candidate
//! position, so it is the hottest codec method after `hash`.
//!
//! ## Reentrancy
//!
//! Listener and sink implementations must not call back into the map: every
//! notification fires while the segment lock is held, and the lock is not
//! reentrant.

use eyre::Result;
use xxhash_rust::xxh3::xxh3_64;

use crate::encoding::varint;

/// Key serialization, hashing, and stored-bytes equality.
pub trait KeyCodec: Send + Sync {
    type Key;

    /// Deterministic 64-bit hash; see the module docs for the contract.
    fn hash(&self, key: &Self::Key) -> u64;

    fn encoded_size(&self, key: &Self::Key) -> u64;

    /// Writes exactly `encoded_size(key)` bytes into `buf`.
    fn write(&self, key: &Self::Key, buf: &mut [u8]);

    fn read(&self, buf: &[u8]) -> Result<Self::Key>;

    /// Whether `buf` (exactly the stored key bytes) encodes `key`.
    fn matches(&self, buf: &[u8], key: &Self::Key) -> bool;
}

/// Value serialization. `read` may reuse a caller-provided value to avoid
/// allocation; `bind` is the optional capability of backing a value object
/// directly with entry bytes.
pub trait ValueCodec: Send + Sync {
    type Value;

    fn encoded_size(&self, value: &Self::Value) -> u64;

    /// Writes exactly `encoded_size(value)` bytes into `buf`.
    fn write(&self, value: &Self::Value, buf: &mut [u8]);

    fn read(&self, buf: &[u8], reuse: Option<Self::Value>) -> Result<Self::Value>;

    /// Binds `value`'s storage to the (zeroed) entry bytes at `bytes..len`,
    /// so later mutations of the value land in the map. Returns `false` when
    /// the value type does not support in-place backing; the engine then
    /// serializes normally.
    ///
    /// # Safety contract
    /// The pointer is only valid while the entry stays at its position; an
    /// implementation taking it must tolerate the entry being relocated by a
    /// later oversize update.
    fn bind(&self, _value: &mut Self::Value, _bytes: *mut u8, _len: usize) -> bool {
        false
    }
}

/// Encoding of the key/value size prefixes inside an entry. Object-safe so a
/// map can swap prefix schemes without another generic parameter.
pub trait SizeCodec: Send + Sync {
    fn encoded_len(&self, n: u64) -> usize;

    /// Writes the encoding of `n` at the head of `buf`; returns bytes
    /// written, which must equal `encoded_len(n)`.
    fn write(&self, n: u64, buf: &mut [u8]) -> usize;

    /// Decodes a size from the head of `buf`; returns `(n, bytes_read)`.
    fn read(&self, buf: &[u8]) -> Result<(u64, usize)>;
}

/// The default size prefix: the crate's stop-bit varint scheme (1 byte up
/// to 127).
#[derive(Debug, Default, Clone, Copy)]
pub struct VarIntSizes;

impl SizeCodec for VarIntSizes {
    fn encoded_len(&self, n: u64) -> usize {
        varint::varint_len(n)
    }

    fn write(&self, n: u64, buf: &mut [u8]) -> usize {
        varint::encode_varint(n, buf)
    }

    fn read(&self, buf: &[u8]) -> Result<(u64, usize)> {
        varint::decode_varint(buf)
    }
}

/// Supplies a value for `get`/`acquire` when the key is absent. Returning
/// `Some` inserts the value under the key before returning it.
pub trait DefaultValueProvider<K, V>: Send + Sync {
    fn get(&self, key: &K, reuse: Option<V>) -> Option<V>;
}

/// The default provider: absent keys stay absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDefaultValue;

impl<K, V> DefaultValueProvider<K, V> for NoDefaultValue {
    fn get(&self, _key: &K, _reuse: Option<V>) -> Option<V> {
        None
    }
}

/// Builds fresh values for `acquire_using` in create mode when the caller
/// did not supply one.
pub trait ValueFactory<V>: Send + Sync {
    fn create(&self) -> Option<V>;
}

/// The default factory refuses; `acquire_using` in create mode then requires
/// a caller-supplied value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoValueFactory;

impl<V> ValueFactory<V> for NoValueFactory {
    fn create(&self) -> Option<V> {
        None
    }
}

/// Factory for value types with a `Default`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValueFactory;

impl<V: Default> ValueFactory<V> for DefaultValueFactory {
    fn create(&self) -> Option<V> {
        Some(V::default())
    }
}

/// Mutation and lookup notifications. Callbacks receive segment indices and
/// block positions, never references back into the map, and fire while the
/// segment lock is held — implementations must be quick and must not call
/// back into the map.
pub trait MapListener<K, V>: Send + Sync {
    fn on_put(&self, _key: &K, _value: &V, _segment: usize, _pos: u32, _added: bool) {}

    fn on_get(&self, _key: &K, _value: &V) {}

    fn on_remove(&self, _key: &K, _value: Option<&V>, _segment: usize, _pos: u32) {}

    fn on_relocation(&self, _segment: usize, _pos: u32) {}
}

/// The default listener: all notifications dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopListener;

impl<K, V> MapListener<K, V> for NopListener {}

/// Out-of-band reporting for lock anomalies. A lock timeout is recovered
/// (the presumed-dead holder's word is reset and the waiter retries), so it
/// surfaces here rather than as an operation error.
pub trait ErrorSink: Send + Sync {
    fn on_lock_timeout(&self, _holder: u64) {}

    fn on_unlock_error(&self, _message: &str) {}
}

/// The default sink: anomalies dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopErrorSink;

impl ErrorSink for NopErrorSink {}

// Shared-handle forwarding, so a caller can install a listener or sink and
// keep a handle for inspection.
impl<K, V, L: MapListener<K, V> + ?Sized> MapListener<K, V> for std::sync::Arc<L> {
    fn on_put(&self, key: &K, value: &V, segment: usize, pos: u32, added: bool) {
        (**self).on_put(key, value, segment, pos, added);
    }

    fn on_get(&self, key: &K, value: &V) {
        (**self).on_get(key, value);
    }

    fn on_remove(&self, key: &K, value: Option<&V>, segment: usize, pos: u32) {
        (**self).on_remove(key, value, segment, pos);
    }

    fn on_relocation(&self, segment: usize, pos: u32) {
        (**self).on_relocation(segment, pos);
    }
}

impl<S: ErrorSink + ?Sized> ErrorSink for std::sync::Arc<S> {
    fn on_lock_timeout(&self, holder: u64) {
        (**self).on_lock_timeout(holder);
    }

    fn on_unlock_error(&self, message: &str) {
        (**self).on_unlock_error(message);
    }
}

// ---- bundled codecs --------------------------------------------------------

/// Raw byte-string keys and values (`Vec<u8>`), hashed with xxh3.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl KeyCodec for BytesCodec {
    type Key = Vec<u8>;

    fn hash(&self, key: &Vec<u8>) -> u64 {
        xxh3_64(key)
    }

    fn encoded_size(&self, key: &Vec<u8>) -> u64 {
        key.len() as u64
    }

    fn write(&self, key: &Vec<u8>, buf: &mut [u8]) {
        buf.copy_from_slice(key);
    }

    fn read(&self, buf: &[u8]) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }

    fn matches(&self, buf: &[u8], key: &Vec<u8>) -> bool {
        buf == key.as_slice()
    }
}

impl ValueCodec for BytesCodec {
    type Value = Vec<u8>;

    fn encoded_size(&self, value: &Vec<u8>) -> u64 {
        value.len() as u64
    }

    fn write(&self, value: &Vec<u8>, buf: &mut [u8]) {
        buf.copy_from_slice(value);
    }

    fn read(&self, buf: &[u8], reuse: Option<Vec<u8>>) -> Result<Vec<u8>> {
        match reuse {
            Some(mut v) => {
                v.clear();
                v.extend_from_slice(buf);
                Ok(v)
            }
            None => Ok(buf.to_vec()),
        }
    }
}

/// UTF-8 string keys and values, hashed with xxh3 over the bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl KeyCodec for StringCodec {
    type Key = String;

    fn hash(&self, key: &String) -> u64 {
        xxh3_64(key.as_bytes())
    }

    fn encoded_size(&self, key: &String) -> u64 {
        key.len() as u64
    }

    fn write(&self, key: &String, buf: &mut [u8]) {
        buf.copy_from_slice(key.as_bytes());
    }

    fn read(&self, buf: &[u8]) -> Result<String> {
        Ok(std::str::from_utf8(buf)
            .map_err(|e| eyre::eyre!("stored key is not valid UTF-8: {}", e))?
            .to_owned())
    }

    fn matches(&self, buf: &[u8], key: &String) -> bool {
        buf == key.as_bytes()
    }
}

impl ValueCodec for StringCodec {
    type Value = String;

    fn encoded_size(&self, value: &String) -> u64 {
        value.len() as u64
    }

    fn write(&self, value: &String, buf: &mut [u8]) {
        buf.copy_from_slice(value.as_bytes());
    }

    fn read(&self, buf: &[u8], reuse: Option<String>) -> Result<String> {
        let text = std::str::from_utf8(buf)
            .map_err(|e| eyre::eyre!("stored value is not valid UTF-8: {}", e))?;
        match reuse {
            Some(mut v) => {
                v.clear();
                v.push_str(text);
                Ok(v)
            }
            None => Ok(text.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_codec_round_trips_key() {
        let codec = BytesCodec;
        let key = vec![1u8, 2, 3, 4];
        let mut buf = vec![0u8; 4];

        KeyCodec::write(&codec, &key, &mut buf);

        assert!(codec.matches(&buf, &key));
        assert_eq!(KeyCodec::read(&codec, &buf).unwrap(), key);
    }

    #[test]
    fn bytes_codec_hash_is_stable() {
        let codec = BytesCodec;
        let key = b"stable".to_vec();

        // Fingerprints persist in the file, so the hash must never change.
        assert_eq!(codec.hash(&key), xxh3_64(b"stable"));
    }

    #[test]
    fn string_codec_reuses_buffer() {
        let codec = StringCodec;
        let reuse = String::with_capacity(64);

        let value = ValueCodec::read(&codec, b"hello", Some(reuse)).unwrap();

        assert_eq!(value, "hello");
    }

    #[test]
    fn string_codec_rejects_invalid_utf8() {
        let codec = StringCodec;

        let result = KeyCodec::read(&codec, &[0xFF, 0xFE]);

        assert!(result.is_err());
    }

    #[test]
    fn varint_sizes_agree_on_length() {
        let sizes = VarIntSizes;
        let mut buf = [0u8; 9];

        for n in [0u64, 127, 128, 70000] {
            let written = sizes.write(n, &mut buf);

            assert_eq!(written, sizes.encoded_len(n));
            assert_eq!(sizes.read(&buf).unwrap(), (n, written));
        }
    }

    #[test]
    fn default_provider_and_factory_decline() {
        assert!(DefaultValueProvider::<u32, u32>::get(&NoDefaultValue, &1, None).is_none());
        assert!(ValueFactory::<u32>::create(&NoValueFactory).is_none());
        assert_eq!(ValueFactory::<u32>::create(&DefaultValueFactory), Some(0));
    }
}
