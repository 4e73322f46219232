//! BIP37 bloom filters for SPV peers.

use std::f64::consts::LN_2;

/// Largest filter a peer may load, in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
/// Largest number of hash functions a peer may request.
pub const MAX_HASH_FUNCS: u32 = 50;

/// How a remote node updates the filter when it matches outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BloomUpdate {
    None,
    All,
    P2PubkeyOnly,
    Other(u8),
}

impl BloomUpdate {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::All => 1,
            Self::P2PubkeyOnly => 2,
            Self::Other(b) => b,
        }
    }

    pub fn from_u8(b: u8) -> Self {
        match b {
            0 => Self::None,
            1 => Self::All,
            2 => Self::P2PubkeyOnly,
            other => Self::Other(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    pub data: Vec<u8>,
    pub n_hash_funcs: u32,
    pub tweak: u32,
    pub update: BloomUpdate,
}

impl BloomFilter {
    pub fn new(data: Vec<u8>, n_hash_funcs: u32, tweak: u32, update: BloomUpdate) -> Self {
        Self {
            data,
            n_hash_funcs,
            tweak,
            update,
        }
    }

    /// Size a filter for `items` elements at false-positive `rate`.
    pub fn from_rate(items: u32, rate: f64, update: BloomUpdate, tweak: u32) -> Self {
        let items = items.max(1) as f64;
        let bits = -1.0 / (LN_2 * LN_2) * items * rate.ln();
        let bytes = ((bits / 8.0) as usize).clamp(1, MAX_BLOOM_FILTER_SIZE);
        let n = ((bytes * 8) as f64 / items * LN_2) as u32;
        let n = n.clamp(1, MAX_HASH_FUNCS);
        Self::new(vec![0u8; bytes], n, tweak, update)
    }

    pub fn add(&mut self, value: &[u8]) {
        if self.data.is_empty() {
            return;
        }
        let bits = self.data.len() * 8;
        for i in 0..self.n_hash_funcs {
            let bit = self.hash(value, i) as usize % bits;
            self.data[bit >> 3] |= 1 << (bit & 7);
        }
    }

    pub fn test(&self, value: &[u8]) -> bool {
        if self.data.is_empty() {
            return false;
        }
        let bits = self.data.len() * 8;
        (0..self.n_hash_funcs).all(|i| {
            let bit = self.hash(value, i) as usize % bits;
            self.data[bit >> 3] & (1 << (bit & 7)) != 0
        })
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }

    pub fn is_within_constraints(&self) -> bool {
        self.data.len() <= MAX_BLOOM_FILTER_SIZE && self.n_hash_funcs <= MAX_HASH_FUNCS
    }

    fn hash(&self, value: &[u8], n: u32) -> u32 {
        murmur3(value, n.wrapping_mul(0xfba4_c795).wrapping_add(self.tweak))
    }
}

/// MurmurHash3 (x86, 32-bit).
pub fn murmur3(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, b) in tail.iter().enumerate() {
            k ^= (*b as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
