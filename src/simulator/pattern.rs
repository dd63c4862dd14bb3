//! Payload generation for simulated transfers.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// What the simulated device writes into delivered buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    /// Byte `i` of the stream is `i mod 256`; gaps and reordering are easy to spot
    #[default]
    Ramp,
    /// Reproducible pseudo-random bytes
    Noise {
        /// Noise seed
        seed: u64,
    },
    /// Buffers are left as submitted
    Untouched,
}

impl Pattern {
    /// Fill `buf` with the bytes found at stream position `offset`.
    pub fn fill(&self, buf: &mut [u8], offset: u64) {
        match *self {
            Self::Ramp => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = (offset.wrapping_add(i as u64) & 0xff) as u8;
                }
            }
            Self::Noise { seed } => {
                // Byte p of the stream is byte p of the seeded keystream
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_word_pos(u128::from(offset / 4));
                let skip = (offset % 4) as usize;
                let mut block = vec![0u8; skip + buf.len()];
                rng.fill_bytes(&mut block);
                buf.copy_from_slice(&block[skip..]);
            }
            Self::Untouched => {}
        }
    }
}

/// Check that `data` is the ramp starting at stream position `offset`.
pub fn is_ramp(data: &[u8], offset: u64) -> bool {
    data.iter()
        .enumerate()
        .all(|(i, &b)| b == (offset.wrapping_add(i as u64) & 0xff) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_continues_across_chunks() {
        let mut a = [0u8; 300];
        let mut b = [0u8; 10];
        Pattern::Ramp.fill(&mut a, 0);
        Pattern::Ramp.fill(&mut b, 300);
        assert_eq!(a[255], 255);
        assert_eq!(a[256], 0);
        assert!(is_ramp(&a, 0));
        assert!(is_ramp(&b, 300));
        assert!(!is_ramp(&b, 0));
    }

    #[test]
    fn test_noise_is_reproducible() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        Pattern::Noise { seed: 9 }.fill(&mut a, 128);
        Pattern::Noise { seed: 9 }.fill(&mut b, 128);
        assert_eq!(a, b);
    }

    #[test]
    fn test_noise_continues_across_chunks() {
        let pattern = Pattern::Noise { seed: 3 };
        let mut whole = [0u8; 40];
        pattern.fill(&mut whole, 5);

        let mut head = [0u8; 11];
        let mut tail = [0u8; 29];
        pattern.fill(&mut head, 5);
        pattern.fill(&mut tail, 16);
        assert_eq!(&whole[..11], &head);
        assert_eq!(&whole[11..], &tail);
        assert_ne!(whole, [0u8; 40]);
    }

    #[test]
    fn test_untouched() {
        let mut a = [7u8; 4];
        Pattern::Untouched.fill(&mut a, 0);
        assert_eq!(a, [7; 4]);
    }
}
