// crates/telefeed-core/src/eurocrypt.rs
//
// Eurocrypt-M conditional access: the DES-variant block cipher, the ECM
// hash schedule, and the 42-byte ECM packet with its even/odd control-word
// rotation.
//
// The cipher is the classical DES round structure with 1-based table
// numbering, minus the initial/final permutations and PC-1 (the 7-byte key
// is packed straight into the two 28-bit halves). Two departures from
// textbook DES matter here and must not be "fixed":
//
//   * In HASH mode the top two bytes of the round function's output are
//     swapped before the XOR into the left half.
//   * The output block is R∥L — the halves are emitted swapped relative to
//     the classical final-permutation ordering.
//
// Because of these, the transform is not self-inverse; tests pin behaviour
// through algebraic properties rather than assuming involution.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Total length of an ECM packet.
pub const ECM_LEN: usize = 42;

/// Offsets of the two encrypted control-word slots inside the ECM.
const EVEN_CW: usize = 16;
const ODD_CW: usize = 24;
/// Offset of the hash section payload.
const HASH: usize = 34;
/// The hash schedule covers bytes 5..=31 — everything between the control
/// header and the hash header.
const HASHED_RANGE: std::ops::Range<usize> = 5..32;

// ── Cipher tables ─────────────────────────────────────────────────────────────
// Classical DES constants, 1-based bit numbering.

#[rustfmt::skip]
const EXPANSION: [u8; 48] = [
    32,  1,  2,  3,  4,  5,
     4,  5,  6,  7,  8,  9,
     8,  9, 10, 11, 12, 13,
    12, 13, 14, 15, 16, 17,
    16, 17, 18, 19, 20, 21,
    20, 21, 22, 23, 24, 25,
    24, 25, 26, 27, 28, 29,
    28, 29, 30, 31, 32,  1,
];

#[rustfmt::skip]
const SBOXES: [[u8; 64]; 8] = [
    [
        0x0E, 0x00, 0x04, 0x0F, 0x0D, 0x07, 0x01, 0x04,
        0x02, 0x0E, 0x0F, 0x02, 0x0B, 0x0D, 0x08, 0x01,
        0x03, 0x0A, 0x0A, 0x06, 0x06, 0x0C, 0x0C, 0x0B,
        0x05, 0x09, 0x09, 0x05, 0x00, 0x03, 0x07, 0x08,
        0x04, 0x0F, 0x01, 0x0C, 0x0E, 0x08, 0x08, 0x02,
        0x0D, 0x04, 0x06, 0x09, 0x02, 0x01, 0x0B, 0x07,
        0x0F, 0x05, 0x0C, 0x0B, 0x09, 0x03, 0x07, 0x0E,
        0x03, 0x0A, 0x0A, 0x00, 0x05, 0x06, 0x00, 0x0D,
    ],
    [
        0x0F, 0x03, 0x01, 0x0D, 0x08, 0x04, 0x0E, 0x07,
        0x06, 0x0F, 0x0B, 0x02, 0x03, 0x08, 0x04, 0x0E,
        0x09, 0x0C, 0x07, 0x00, 0x02, 0x01, 0x0D, 0x0A,
        0x0C, 0x06, 0x00, 0x09, 0x05, 0x0B, 0x0A, 0x05,
        0x00, 0x0D, 0x0E, 0x08, 0x07, 0x0A, 0x0B, 0x01,
        0x0A, 0x03, 0x04, 0x0F, 0x0D, 0x04, 0x01, 0x02,
        0x05, 0x0B, 0x08, 0x06, 0x0C, 0x07, 0x06, 0x0C,
        0x09, 0x00, 0x03, 0x05, 0x02, 0x0E, 0x0F, 0x09,
    ],
    [
        0x0A, 0x0D, 0x00, 0x07, 0x09, 0x00, 0x0E, 0x09,
        0x06, 0x03, 0x03, 0x04, 0x0F, 0x06, 0x05, 0x0A,
        0x01, 0x02, 0x0D, 0x08, 0x0C, 0x05, 0x07, 0x0E,
        0x0B, 0x0C, 0x04, 0x0B, 0x02, 0x0F, 0x08, 0x01,
        0x0D, 0x01, 0x06, 0x0A, 0x04, 0x0D, 0x09, 0x00,
        0x08, 0x06, 0x0F, 0x09, 0x03, 0x08, 0x00, 0x07,
        0x0B, 0x04, 0x01, 0x0F, 0x02, 0x0E, 0x0C, 0x03,
        0x05, 0x0B, 0x0A, 0x05, 0x0E, 0x02, 0x07, 0x0C,
    ],
    [
        0x07, 0x0D, 0x0D, 0x08, 0x0E, 0x0B, 0x03, 0x05,
        0x00, 0x06, 0x06, 0x0F, 0x09, 0x00, 0x0A, 0x03,
        0x01, 0x04, 0x02, 0x07, 0x08, 0x02, 0x05, 0x0C,
        0x0B, 0x01, 0x0C, 0x0A, 0x04, 0x0E, 0x0F, 0x09,
        0x0A, 0x03, 0x06, 0x0F, 0x09, 0x00, 0x00, 0x06,
        0x0C, 0x0A, 0x0B, 0x01, 0x07, 0x0D, 0x0D, 0x08,
        0x0F, 0x09, 0x01, 0x04, 0x03, 0x05, 0x0E, 0x0B,
        0x05, 0x0C, 0x02, 0x07, 0x08, 0x02, 0x04, 0x0E,
    ],
    [
        0x02, 0x0E, 0x0C, 0x0B, 0x04, 0x02, 0x01, 0x0C,
        0x07, 0x04, 0x0A, 0x07, 0x0B, 0x0D, 0x06, 0x01,
        0x08, 0x05, 0x05, 0x00, 0x03, 0x0F, 0x0F, 0x0A,
        0x0D, 0x03, 0x00, 0x09, 0x0E, 0x08, 0x09, 0x06,
        0x04, 0x0B, 0x02, 0x08, 0x01, 0x0C, 0x0B, 0x07,
        0x0A, 0x01, 0x0D, 0x0E, 0x07, 0x02, 0x08, 0x0D,
        0x0F, 0x06, 0x09, 0x0F, 0x0C, 0x00, 0x05, 0x09,
        0x06, 0x0A, 0x03, 0x04, 0x00, 0x05, 0x0E, 0x03,
    ],
    [
        0x0C, 0x0A, 0x01, 0x0F, 0x0A, 0x04, 0x0F, 0x02,
        0x09, 0x07, 0x02, 0x0C, 0x06, 0x09, 0x08, 0x05,
        0x00, 0x06, 0x0D, 0x01, 0x03, 0x0D, 0x04, 0x0E,
        0x0E, 0x00, 0x07, 0x0B, 0x05, 0x03, 0x0B, 0x08,
        0x09, 0x04, 0x0E, 0x03, 0x0F, 0x02, 0x05, 0x0C,
        0x02, 0x09, 0x08, 0x05, 0x0C, 0x0F, 0x03, 0x0A,
        0x07, 0x0B, 0x00, 0x0E, 0x04, 0x01, 0x0A, 0x07,
        0x01, 0x06, 0x0D, 0x00, 0x0B, 0x08, 0x06, 0x0D,
    ],
    [
        0x04, 0x0D, 0x0B, 0x00, 0x02, 0x0B, 0x0E, 0x07,
        0x0F, 0x04, 0x00, 0x09, 0x08, 0x01, 0x0D, 0x0A,
        0x03, 0x0E, 0x0C, 0x03, 0x09, 0x05, 0x07, 0x0C,
        0x05, 0x02, 0x0A, 0x0F, 0x06, 0x08, 0x01, 0x06,
        0x01, 0x06, 0x04, 0x0B, 0x0B, 0x0D, 0x0D, 0x08,
        0x0C, 0x01, 0x03, 0x04, 0x07, 0x0A, 0x0E, 0x07,
        0x0A, 0x09, 0x0F, 0x05, 0x06, 0x00, 0x08, 0x0F,
        0x00, 0x0E, 0x05, 0x02, 0x09, 0x03, 0x02, 0x0C,
    ],
    [
        0x0D, 0x01, 0x02, 0x0F, 0x08, 0x0D, 0x04, 0x08,
        0x06, 0x0A, 0x0F, 0x03, 0x0B, 0x07, 0x01, 0x04,
        0x0A, 0x0C, 0x09, 0x05, 0x03, 0x06, 0x0E, 0x0B,
        0x05, 0x00, 0x00, 0x0E, 0x0C, 0x09, 0x07, 0x02,
        0x07, 0x02, 0x0B, 0x01, 0x04, 0x0E, 0x01, 0x07,
        0x09, 0x04, 0x0C, 0x0A, 0x0E, 0x08, 0x02, 0x0D,
        0x00, 0x0F, 0x06, 0x0C, 0x0A, 0x09, 0x0D, 0x00,
        0x0F, 0x03, 0x03, 0x05, 0x05, 0x06, 0x08, 0x0B,
    ],
];

#[rustfmt::skip]
const PERMUTATION: [u8; 32] = [
    16,  7, 20, 21,
    29, 12, 28, 17,
     1, 15, 23, 26,
     5, 18, 31, 10,
     2,  8, 24, 14,
    32, 27,  3,  9,
    19, 13, 30,  6,
    22, 11,  4, 25,
];

#[rustfmt::skip]
const PC2: [u8; 48] = [
    14, 17, 11, 24,  1,  5,
     3, 28, 15,  6, 21, 10,
    23, 19, 12,  4, 26,  8,
    16,  7, 27, 20, 13,  2,
    41, 52, 31, 37, 47, 55,
    30, 40, 51, 45, 33, 48,
    44, 49, 39, 56, 34, 53,
    46, 42, 50, 36, 29, 32,
];

const LSHIFT: [u8; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];

// ── Block transform ───────────────────────────────────────────────────────────

/// Round-function variant selector for [`block_transform`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    /// Control-word decryption.
    Ecm,
    /// Hash accumulation (adds the top-two-byte twist each round).
    Hash,
}

/// Expand-XOR-substitute-permute: the DES round function.
fn feistel_f(r: u32, round_key: &[u8; 8]) -> u32 {
    let mut s: u32 = 0;
    let mut k = 0;
    for (i, key_byte) in round_key.iter().enumerate() {
        let mut v: u8 = 0;
        for j in 0..6 {
            v |= (((r >> (32 - EXPANSION[k] as u32)) & 1) as u8) << (5 - j);
            k += 1;
        }
        v ^= key_byte;
        s |= (SBOXES[i][v as usize] as u32) << (28 - 4 * i);
    }

    let mut out: u32 = 0;
    for (i, p) in PERMUTATION.iter().enumerate() {
        out |= ((s >> (32 - *p as u32)) & 1) << (31 - i);
    }
    out
}

/// Rotate a 28-bit half left by one position.
#[inline]
fn rol28(x: u32) -> u32 {
    (x << 1 ^ x >> 27) & 0x0fff_ffff
}

/// Run one 8-byte block through the 16-round Feistel network under a 7-byte
/// key. The output halves are emitted swapped (R∥L).
pub fn block_transform(input: &[u8; 8], key: &[u8; 7], mode: CipherMode) -> [u8; 8] {
    // Key preparation: pack the 56-bit key into two 28-bit halves.
    let mut c: u32 = (key[0] as u32) << 20
        ^ (key[1] as u32) << 12
        ^ (key[2] as u32) << 4
        ^ (key[3] as u32) >> 4;
    let mut d: u32 = ((key[3] & 0x0f) as u32) << 24
        ^ (key[4] as u32) << 16
        ^ (key[5] as u32) << 8
        ^ key[6] as u32;

    let mut l = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    let mut r = u32::from_be_bytes([input[4], input[5], input[6], input[7]]);

    for shifts in LSHIFT {
        for _ in 0..shifts {
            c = rol28(c);
            d = rol28(d);
        }

        // Round-key selection through PC-2: positions 1..28 read from C,
        // 29..56 from D.
        let mut round_key = [0u8; 8];
        let mut k = 0;
        for byte in round_key.iter_mut() {
            for t in 0..6 {
                let p = PC2[k] as u32;
                let bit = if p < 29 { c >> (28 - p) & 1 } else { d >> (56 - p) & 1 };
                *byte |= (bit as u8) << (5 - t);
                k += 1;
            }
        }

        let mut s = feistel_f(r, &round_key);

        if mode == CipherMode::Hash {
            // Swap the top two bytes; the low 16 bits pass untouched.
            s = (s >> 8 & 0x00ff_0000) | (s << 8 & 0xff00_0000) | (s & 0x0000_ffff);
        }

        let r_next = l ^ s;
        l = r;
        r = r_next;
    }

    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&r.to_be_bytes());
    out[4..].copy_from_slice(&l.to_be_bytes());
    out
}

/// Fold bytes 5..=31 of an ECM into an 8-byte accumulator, running the
/// accumulator through the HASH transform at every 8-byte boundary and once
/// more at the end.
fn ecm_hash(ecm: &[u8; ECM_LEN], key: &[u8; 7]) -> [u8; 8] {
    let mut h = [0u8; 8];
    for (j, byte) in ecm[HASHED_RANGE].iter().enumerate() {
        h[j % 8] ^= byte;
        if j % 8 == 7 {
            h = block_transform(&h, key, CipherMode::Hash);
        }
    }
    block_transform(&h, key, CipherMode::Hash)
}

// ── ECM context ───────────────────────────────────────────────────────────────

/// Scrambling-key parity. The modulator alternates between the two; each
/// switch retires one encrypted control word and randomises a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CwParity {
    Even,
    Odd,
}

/// Built-in channel contexts: 7-byte operation key plus the channel's ECM
/// template (channel id, key index, control and date/theme/level sections).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EurocryptPreset {
    Ctv,
    TvPlus,
    Tv1000,
    FilmNet,
}

#[derive(Debug, Error)]
#[error("unknown eurocrypt preset '{0}' (expected ctv, tvplus, tv1000 or filmnet)")]
pub struct UnknownPreset(String);

impl FromStr for EurocryptPreset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ctv" => Ok(Self::Ctv),
            "tvplus" => Ok(Self::TvPlus),
            "tv1000" => Ok(Self::Tv1000),
            "filmnet" => Ok(Self::FilmNet),
            other => Err(UnknownPreset(other.into())),
        }
    }
}

impl fmt::Display for EurocryptPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ctv => "ctv",
            Self::TvPlus => "tvplus",
            Self::Tv1000 => "tv1000",
            Self::FilmNet => "filmnet",
        })
    }
}

impl EurocryptPreset {
    fn key(self) -> [u8; 7] {
        match self {
            Self::Ctv => [0x84, 0x66, 0x30, 0xE4, 0xDA, 0xFA, 0x23],
            Self::TvPlus => [0x12, 0x06, 0x28, 0x3A, 0x4B, 0x1D, 0xE2],
            Self::Tv1000 => [0x36, 0xFA, 0xCD, 0x50, 0x85, 0x54, 0xDF],
            Self::FilmNet => [0x21, 0x12, 0x31, 0x35, 0x8A, 0xC3, 0x4F],
        }
    }

    /// Channel-specific ECM template: header, channel id, key index, control
    /// and date/theme/level sections. CW slots and hash are placeholders
    /// until the first generation pass.
    #[rustfmt::skip]
    fn ecm_template(self) -> [u8; ECM_LEN] {
        let (channel_id, key_index, date_theme_level, control) = match self {
            Self::Ctv     => ([0x00, 0x04], 0x38, [0x21, 0x65, 0xFF, 0x00], 0x00),
            Self::TvPlus  => ([0x00, 0x2C], 0x08, [0x21, 0x65, 0x04, 0x00], 0x00),
            Self::Tv1000  => ([0x00, 0x04], 0x1F, [0x21, 0x65, 0x05, 0x04], 0x00),
            Self::FilmNet => ([0x00, 0x28], 0x08, [0x21, 0x15, 0x05, 0x00], 0x00),
        };
        [
            0x90, 0x03, channel_id[0], channel_id[1], key_index,
            0xE0, 0x01, control,
            0xE1, 0x04, date_theme_level[0], date_theme_level[1], date_theme_level[2], date_theme_level[3],
            0xEA, 0x10,
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x01,
            0xF0, 0x08,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]
    }
}

/// Live conditional-access state for one channel.
pub struct Eurocrypt {
    key:          [u8; 7],
    ecm:          [u8; ECM_LEN],
    decoded_even: [u8; 8],
    decoded_odd:  [u8; 8],
    rng:          StdRng,
}

impl Eurocrypt {
    /// Create a context for `preset`, seeding the control-word randomiser
    /// from wall-clock time, and generate initial ECMs for both parities.
    pub fn new(preset: EurocryptPreset) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(preset, seed)
    }

    /// Like [`Eurocrypt::new`] with a caller-chosen randomiser seed.
    pub fn with_seed(preset: EurocryptPreset, seed: u64) -> Self {
        let mut ec = Self {
            key:          preset.key(),
            ecm:          preset.ecm_template(),
            decoded_even: [0; 8],
            decoded_odd:  [0; 8],
            rng:          StdRng::seed_from_u64(seed),
        };
        ec.generate_ecm(CwParity::Even);
        ec.generate_ecm(CwParity::Odd);
        ec
    }

    /// Randomise the encrypted control word of `parity`, re-derive both
    /// decoded control words, and refresh the packet hash.
    ///
    /// The modulator calls this each time it switches to the opposite
    /// scrambling parity, so the retiring slot is re-randomised while the
    /// newly-active parity's decoded word stays consistent with the ECM
    /// already published to decoders.
    pub fn generate_ecm(&mut self, parity: CwParity) {
        let slot = match parity {
            CwParity::Even => EVEN_CW,
            CwParity::Odd => ODD_CW,
        };
        self.rng.fill(&mut self.ecm[slot..slot + 8]);

        self.decoded_even =
            block_transform(self.encrypted_cw(CwParity::Even), &self.key, CipherMode::Ecm);
        self.decoded_odd =
            block_transform(self.encrypted_cw(CwParity::Odd), &self.key, CipherMode::Ecm);

        let hash = ecm_hash(&self.ecm, &self.key);
        self.ecm[HASH..HASH + 8].copy_from_slice(&hash);
    }

    /// The current 42-byte ECM packet.
    pub fn ecm(&self) -> &[u8; ECM_LEN] {
        &self.ecm
    }

    /// The decoded (plaintext) control word for `parity` — what the video
    /// scrambler keys from.
    pub fn decoded_cw(&self, parity: CwParity) -> &[u8; 8] {
        match parity {
            CwParity::Even => &self.decoded_even,
            CwParity::Odd => &self.decoded_odd,
        }
    }

    /// The encrypted control word currently published for `parity`.
    pub fn encrypted_cw(&self, parity: CwParity) -> &[u8; 8] {
        let slot = match parity {
            CwParity::Even => EVEN_CW,
            CwParity::Odd => ODD_CW,
        };
        self.ecm[slot..slot + 8].try_into().expect("slot is 8 bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 7] = [0x36, 0xFA, 0xCD, 0x50, 0x85, 0x54, 0xDF];

    #[test]
    fn block_transform_is_deterministic() {
        let input = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let a = block_transform(&input, &KEY, CipherMode::Ecm);
        let b = block_transform(&input, &KEY, CipherMode::Ecm);
        assert_eq!(a, b);
        assert_ne!(a, input, "16 rounds must not be the identity");
    }

    #[test]
    fn block_transform_known_answers() {
        // Regression vectors: any change to the tables, the round count,
        // the key schedule or the final half-swap shows up here.
        let input = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(
            block_transform(&input, &KEY, CipherMode::Ecm),
            [0xB0, 0xD8, 0x9C, 0x36, 0xCF, 0x73, 0xF6, 0x10],
        );
        assert_eq!(
            block_transform(&[0u8; 8], &KEY, CipherMode::Hash),
            [0x05, 0xC3, 0xB1, 0x2C, 0xBD, 0x96, 0x18, 0xAC],
        );
    }

    #[test]
    fn cipher_modes_diverge() {
        // The HASH twist changes the round function; across a handful of
        // inputs the two modes cannot agree everywhere.
        let mut diverged = 0;
        for b in 0u8..8 {
            let input = [b, b ^ 0x55, 0x00, 0xFF, b, 0x12, 0x34, 0x56];
            if block_transform(&input, &KEY, CipherMode::Ecm)
                != block_transform(&input, &KEY, CipherMode::Hash)
            {
                diverged += 1;
            }
        }
        assert!(diverged > 0);
    }

    #[test]
    fn different_keys_give_different_ciphertext() {
        let input = [0u8; 8];
        let other_key = [0x84, 0x66, 0x30, 0xE4, 0xDA, 0xFA, 0x23];
        assert_ne!(
            block_transform(&input, &KEY, CipherMode::Ecm),
            block_transform(&input, &other_key, CipherMode::Ecm),
        );
    }

    #[test]
    fn transform_is_a_permutation_on_sampled_inputs() {
        // Distinct inputs must map to distinct outputs (each round is
        // invertible, so collisions would be an implementation bug).
        let mut seen = std::collections::HashSet::new();
        for i in 0u64..64 {
            let out = block_transform(&i.to_be_bytes(), &KEY, CipherMode::Hash);
            assert!(seen.insert(out), "collision at input {i}");
        }
    }

    #[test]
    fn decoded_cw_matches_transform_of_encrypted_cw() {
        let mut ec = Eurocrypt::with_seed(EurocryptPreset::Tv1000, 7);
        for round in 0..4 {
            let parity = if round % 2 == 0 { CwParity::Even } else { CwParity::Odd };
            ec.generate_ecm(parity);
            for p in [CwParity::Even, CwParity::Odd] {
                assert_eq!(
                    *ec.decoded_cw(p),
                    block_transform(ec.encrypted_cw(p), &KEY, CipherMode::Ecm),
                );
            }
        }
    }

    #[test]
    fn generating_one_parity_leaves_the_other_slot_alone() {
        let mut ec = Eurocrypt::with_seed(EurocryptPreset::Ctv, 99);
        let odd_before = *ec.encrypted_cw(CwParity::Odd);
        ec.generate_ecm(CwParity::Even);
        assert_eq!(*ec.encrypted_cw(CwParity::Odd), odd_before);
        let even_before = *ec.encrypted_cw(CwParity::Even);
        ec.generate_ecm(CwParity::Odd);
        assert_eq!(*ec.encrypted_cw(CwParity::Even), even_before);
    }

    #[test]
    fn regeneration_randomises_the_requested_slot() {
        let mut ec = Eurocrypt::with_seed(EurocryptPreset::FilmNet, 1234);
        let first = *ec.encrypted_cw(CwParity::Even);
        ec.generate_ecm(CwParity::Even);
        assert_ne!(*ec.encrypted_cw(CwParity::Even), first);
    }

    #[test]
    fn ecm_layout_headers_are_fixed() {
        let ec = Eurocrypt::with_seed(EurocryptPreset::Tv1000, 42);
        let ecm = ec.ecm();
        assert_eq!(ecm[0..2], [0x90, 0x03][..]);
        assert_eq!(ecm[5..7], [0xE0, 0x01][..]);
        assert_eq!(ecm[8..10], [0xE1, 0x04][..]);
        assert_eq!(ecm[10..14], [0x21, 0x65, 0x05, 0x04][..]);
        assert_eq!(ecm[14..16], [0xEA, 0x10][..]);
        assert_eq!(ecm[32..34], [0xF0, 0x08][..]);
    }

    #[test]
    fn ecm_hash_is_deterministic_and_nonzero() {
        let a = Eurocrypt::with_seed(EurocryptPreset::Tv1000, 42);
        let b = Eurocrypt::with_seed(EurocryptPreset::Tv1000, 42);
        assert_eq!(a.ecm()[HASH..], b.ecm()[HASH..]);
        assert_ne!(a.ecm()[HASH..], [0u8; 8][..]);
    }

    #[test]
    fn ecm_hash_covers_every_hashed_byte() {
        // Flipping any single byte of the hashed span must change the hash:
        // the transform chain is a bijection per block, and equal suffixes
        // preserve inequality through the XOR schedule.
        let ec = Eurocrypt::with_seed(EurocryptPreset::TvPlus, 5);
        let baseline = ecm_hash(ec.ecm(), &EurocryptPreset::TvPlus.key());
        for i in HASHED_RANGE {
            let mut tampered = *ec.ecm();
            tampered[i] ^= 0x01;
            assert_ne!(
                ecm_hash(&tampered, &EurocryptPreset::TvPlus.key()),
                baseline,
                "hash blind to byte {i}"
            );
        }
    }

    #[test]
    fn ecm_hash_ignores_bytes_outside_the_span() {
        let ec = Eurocrypt::with_seed(EurocryptPreset::TvPlus, 5);
        let baseline = ecm_hash(ec.ecm(), &EurocryptPreset::TvPlus.key());
        let mut tampered = *ec.ecm();
        tampered[0] ^= 0xFF;
        tampered[34] ^= 0xFF;
        assert_eq!(ecm_hash(&tampered, &EurocryptPreset::TvPlus.key()), baseline);
    }

    #[test]
    fn preset_names_round_trip() {
        for preset in [
            EurocryptPreset::Ctv,
            EurocryptPreset::TvPlus,
            EurocryptPreset::Tv1000,
            EurocryptPreset::FilmNet,
        ] {
            assert_eq!(preset.to_string().parse::<EurocryptPreset>().unwrap(), preset);
        }
        assert!("sky".parse::<EurocryptPreset>().is_err());
    }
}
