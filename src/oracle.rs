use crate::crypto::{aes_128, gen_random_bytes};
use crate::error::{Error, Precondition, Result};
use tracing::debug;

/// The byte attackers pad their inputs with.
pub const FILLER: u8 = b'A';

/// Bounds for every search loop an attack runs, so that a misbehaving oracle can't keep an attack
/// going forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Longest filler fed to an oracle while waiting for its ciphertext to grow.
    pub max_input_len: usize,
    /// Most secret bytes a recovery will attempt.
    pub max_suffix_len: usize,
    /// How many times the profile forger retries when token lengths drift between requests.
    pub forge_attempts: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_input_len: 64,
            max_suffix_len: 4096,
            forge_attempts: 8,
        }
    }
}

/// Something an oracle will accept as attacker input.
pub trait Plaintext {
    /// `len` units of filler.
    fn filler(len: usize) -> Self;
}

impl Plaintext for Vec<u8> {
    fn filler(len: usize) -> Self {
        vec![FILLER; len]
    }
}

impl Plaintext for String {
    fn filler(len: usize) -> Self {
        char::from(FILLER).to_string().repeat(len)
    }
}

/// How an oracle's ciphertext grows with the length of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Growth {
    pub block_size: usize,
    /// Ciphertext length for a single byte of input.
    pub base_len: usize,
    /// Shortest input length that makes the ciphertext longer than `base_len`.
    pub growth_at: usize,
}

impl Growth {
    /// Number of bytes the oracle adds around attacker input. At `growth_at` those bytes plus the
    /// input fill whole blocks exactly, and padding spills into a new block.
    #[must_use]
    pub fn hidden_len(&self) -> usize {
        self.base_len.saturating_sub(self.growth_at)
    }
}

pub trait Oracle<T: Plaintext> {
    /// Encrypt a plaintext using the oracle's encryption method and return the ciphertext.
    ///
    /// # Errors
    ///
    /// Whatever the oracle's encryption fails with.
    fn encrypt(&self, plaintext: &T) -> Result<Vec<u8>>;

    /// Discover the block size of the oracle's encryption method. This is not something an
    /// oracle tells us. We feed it longer and longer filler until the ciphertext jumps in length,
    /// and the size of the jump is the block size.
    ///
    /// # Errors
    ///
    /// `Unattackable(BlockSize)` if no jump is seen within `limits.max_input_len` inputs.
    fn key_size(&self, limits: &Limits) -> Result<usize> {
        Ok(self.growth(limits)?.block_size)
    }

    /// Measure where and by how much the ciphertext grows.
    ///
    /// # Errors
    ///
    /// `Unattackable(BlockSize)` if no growth is seen within `limits.max_input_len` inputs.
    fn growth(&self, limits: &Limits) -> Result<Growth> {
        // some oracles refuse empty input, so measure from one byte
        let base_len = self.encrypt(&T::filler(1))?.len();

        for len in 2..=limits.max_input_len {
            let cur_len = self.encrypt(&T::filler(len))?.len();
            if cur_len > base_len {
                let growth = Growth {
                    block_size: cur_len - base_len,
                    base_len,
                    growth_at: len,
                };
                debug!(?growth, "ciphertext grew");
                return Ok(growth);
            }
        }

        Err(Precondition::BlockSize {
            attempts: limits.max_input_len,
        }
        .into())
    }
}

/// ECB-encrypts `prefix || input || suffix` under a key fixed at construction. The key, prefix and
/// suffix never leave the oracle.
pub struct SecretSuffixOracle {
    key: Vec<u8>,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl SecretSuffixOracle {
    /// Random key, no prefix.
    #[must_use]
    pub fn new(suffix: Vec<u8>) -> Self {
        SecretSuffixOracle {
            key: gen_random_bytes(aes_128::KEY_SIZE),
            prefix: Vec::new(),
            suffix,
        }
    }

    /// Random key and a prefix of 0 to 63 random bytes, both fixed for the oracle's lifetime.
    #[must_use]
    pub fn with_random_prefix(suffix: Vec<u8>) -> Self {
        use rand::Rng;
        let prefix_len = rand::thread_rng().gen_range(0..64);

        SecretSuffixOracle {
            key: gen_random_bytes(aes_128::KEY_SIZE),
            prefix: gen_random_bytes(prefix_len),
            suffix,
        }
    }

    /// Fully specified oracle.
    ///
    /// # Errors
    ///
    /// `KeyLength` if `key` is not an AES-128 key.
    pub fn with_parts(key: Vec<u8>, prefix: Vec<u8>, suffix: Vec<u8>) -> Result<Self> {
        if key.len() != aes_128::KEY_SIZE {
            return Err(Error::KeyLength {
                expected: aes_128::KEY_SIZE,
                actual: key.len(),
            });
        }
        Ok(SecretSuffixOracle {
            key,
            prefix,
            suffix,
        })
    }
}

impl Oracle<Vec<u8>> for SecretSuffixOracle {
    fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
        let affixed = [&self.prefix, plaintext.as_slice(), &self.suffix].concat();
        aes_128::encrypt_ecb(&affixed, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const KEY: &[u8] = b"YELLOW SUBMARINE";

    #[test]
    fn key_size_of_aes_128_oracle_is_16() {
        let oracle = SecretSuffixOracle::new(b"Did you stop? No, I just drove by".to_vec());
        assert_eq!(oracle.key_size(&Limits::default()).unwrap(), 16);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(0, 16)]
    #[case(5, 20)]
    #[case(17, 33)]
    fn growth_accounts_for_every_hidden_byte(#[case] prefix_len: usize, #[case] suffix_len: usize) {
        let oracle =
            SecretSuffixOracle::with_parts(KEY.to_vec(), vec![7; prefix_len], vec![9; suffix_len])
                .unwrap();

        let growth = oracle.growth(&Limits::default()).unwrap();

        assert_eq!(growth.block_size, 16);
        assert_eq!(growth.hidden_len(), prefix_len + suffix_len);
    }

    #[test]
    fn oracle_without_prefix_or_suffix_has_16_byte_blocks() {
        let oracle = SecretSuffixOracle::with_parts(KEY.to_vec(), Vec::new(), Vec::new()).unwrap();

        let growth = oracle.growth(&Limits::default()).unwrap();

        assert_eq!(growth.block_size, 16);
        assert_eq!(growth.hidden_len(), 0);
        assert_eq!(oracle.key_size(&Limits::default()).unwrap(), 16);
    }

    #[test]
    fn oracle_is_deterministic() {
        let oracle = SecretSuffixOracle::with_random_prefix(b"secret".to_vec());
        let input = b"attacker controlled".to_vec();
        assert_eq!(
            oracle.encrypt(&input).unwrap(),
            oracle.encrypt(&input).unwrap()
        );
    }

    #[test]
    fn with_parts_rejects_bad_key() {
        assert!(matches!(
            SecretSuffixOracle::with_parts(vec![0; 8], Vec::new(), b"s".to_vec()),
            Err(Error::KeyLength { .. })
        ));
    }

    struct ConstantOracle;

    impl Oracle<Vec<u8>> for ConstantOracle {
        fn encrypt(&self, _: &Vec<u8>) -> Result<Vec<u8>> {
            Ok(vec![0; 32])
        }
    }

    #[test]
    fn key_size_gives_up_on_constant_output() {
        let limits = Limits {
            max_input_len: 10,
            ..Limits::default()
        };
        assert!(matches!(
            ConstantOracle.key_size(&limits),
            Err(Error::Unattackable(Precondition::BlockSize { attempts: 10 }))
        ));
    }

    #[test]
    fn string_filler_is_ascii() {
        assert_eq!(String::filler(3), "AAA");
        assert_eq!(Vec::<u8>::filler(2), b"AA");
    }
}
