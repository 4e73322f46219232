//! BIP37 filter packets.

use bytes::BufMut;
use relaynet_types::bloom::{MAX_BLOOM_FILTER_SIZE, MAX_HASH_FUNCS};
use relaynet_types::{BloomFilter, BloomUpdate, DecodeError, DecodeResult, WireReader, WireWrite};

/// Largest element a peer may add with `filteradd`.
pub const MAX_FILTERADD_SIZE: usize = 520;

pub(super) fn encode_filter<B: BufMut>(filter: &BloomFilter, buf: &mut B) {
    buf.put_var_bytes(&filter.data);
    buf.put_u32_le(filter.n_hash_funcs);
    buf.put_u32_le(filter.tweak);
    buf.put_u8(filter.update.to_u8());
}

pub(super) fn decode_filter(r: &mut WireReader<'_>) -> DecodeResult<BloomFilter> {
    let data = r.read_var_bytes("bloom filter", MAX_BLOOM_FILTER_SIZE)?.to_vec();
    let n_hash_funcs = r.read_u32()?;
    if n_hash_funcs > MAX_HASH_FUNCS {
        return Err(DecodeError::CountTooLarge {
            what: "bloom hash functions",
            count: n_hash_funcs as u64,
            max: MAX_HASH_FUNCS as u64,
        });
    }
    let tweak = r.read_u32()?;
    let update = BloomUpdate::from_u8(r.read_u8()?);
    Ok(BloomFilter::new(data, n_hash_funcs, tweak, update))
}
