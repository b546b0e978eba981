use crate::keys::PkValue;
use rustc_hash::FxHasher;
use std::hash::Hasher;

/// Bloom filter over the primary keys of a sealed object.
///
/// Design:
/// - `m_bits` is the number of bits in the filter (no need to be a power of two).
/// - Double hashing: h(i) = h1 + i*h2 (mod 2^64), with two seeded FxHash64 passes.
/// - Indexing uses unbiased 64→[0, m_bits) reduction via 128-bit multiply
///   (Lemire fast range reduction).
/// - False positives are possible; false negatives are not.
///
/// Keys are hashed through [`PkValue::encode_into`], so an `Int(1)` and a `UInt(1)`
/// never share bits by construction.
#[derive(Debug, Clone)]
pub struct KeyBloom {
    m_bits: u32,
    k_hashes: u8,
    bits: Vec<u8>,
}

impl KeyBloom {
    const SEED1: u64 = 0x9E37_79B9_7F4A_7C15;
    const SEED2: u64 = 0xD1B5_4A32_D192_ED03;

    /// Target bits/key. ~12.0 → ≈1.5 bytes/key; ~0.3–0.6% FP in practice.
    pub const BITS_PER_KEY: f64 = 12.0;

    #[inline(always)]
    fn fxhash64_with_seed(seed: u64, bytes: &[u8]) -> u64 {
        let mut h = FxHasher::default();
        h.write_u64(seed);
        h.write(bytes);
        h.finish()
    }

    #[inline(always)]
    fn index_of(bit: u32) -> (usize, u8) {
        ((bit >> 3) as usize, 1u8 << (bit & 7))
    }

    /// Unbiased reduction of a 64-bit hash into [0, m_bits).
    #[inline(always)]
    fn fast_reduce_u64_to_range(x: u64, m_bits: u32) -> u32 {
        ((x as u128).wrapping_mul(m_bits as u128) >> 64) as u32
    }

    fn probes(&self, key: &[u8]) -> impl Iterator<Item = u32> + '_ {
        let h1 = Self::fxhash64_with_seed(Self::SEED1, key);
        let h2 = Self::fxhash64_with_seed(Self::SEED2, key) | 1;
        let m_bits = self.m_bits;
        (0..self.k_hashes as u64)
            .map(move |i| Self::fast_reduce_u64_to_range(h1.wrapping_add(i.wrapping_mul(h2)), m_bits))
    }

    /// Build a filter sized for `keys`.
    pub fn from_values<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a PkValue>,
    {
        let collected: Vec<Vec<u8>> = keys.into_iter().map(PkValue::encoded).collect();
        let n = collected.len().max(1);

        let m_bits = (((n as f64) * Self::BITS_PER_KEY).ceil() as u32).max(8);
        // k ≈ (m/n) ln 2, clamped to [1, 16]
        let k = ((m_bits as f64 / n as f64) * std::f64::consts::LN_2).round() as i32;
        let k_hashes = k.clamp(1, 16) as u8;

        let mut bloom = Self {
            m_bits,
            k_hashes,
            bits: vec![0u8; m_bits.div_ceil(8) as usize],
        };
        for key in &collected {
            let probes: Vec<u32> = bloom.probes(key).collect();
            for bit in probes {
                let (byte, mask) = Self::index_of(bit);
                bloom.bits[byte] |= mask;
            }
        }
        bloom
    }

    /// `false` means the key is definitely absent.
    pub fn may_contain(&self, key: &PkValue) -> bool {
        if self.m_bits == 0 {
            return true;
        }
        let encoded = key.encoded();
        self.probes(&encoded).all(|bit| {
            let (byte, mask) = Self::index_of(bit);
            (self.bits[byte] & mask) != 0
        })
    }

    pub fn m_bits(&self) -> u32 {
        self.m_bits
    }

    pub fn k_hashes(&self) -> u8 {
        self.k_hashes
    }
}
