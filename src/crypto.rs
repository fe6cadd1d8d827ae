use crate::bytes_ext::BytesExt;

pub mod aes_128 {
    //! AES-128 modes built by hand on top of openssl's raw block permutation.

    use super::BytesExt;
    use crate::error::{Error, Result};
    use crate::padding::pad;

    pub const BLOCK_SIZE: usize = 16;
    pub const KEY_SIZE: usize = 16;

    fn check_key(key: &[u8]) -> Result<()> {
        if key.len() == KEY_SIZE {
            Ok(())
        } else {
            Err(Error::KeyLength {
                expected: KEY_SIZE,
                actual: key.len(),
            })
        }
    }

    fn check_shape(data: &[u8]) -> Result<()> {
        if data.len() % BLOCK_SIZE == 0 {
            Ok(())
        } else {
            Err(Error::Shape {
                len: data.len(),
                block_size: BLOCK_SIZE,
            })
        }
    }

    /// Run the raw permutation over one block.
    fn permute_block(block: &[u8], key: &[u8], mode: openssl::symm::Mode) -> Result<Vec<u8>> {
        use openssl::symm::{self, Crypter};

        check_key(key)?;
        if block.len() != BLOCK_SIZE {
            return Err(Error::Shape {
                len: block.len(),
                block_size: BLOCK_SIZE,
            });
        }

        let openssl_cipher = symm::Cipher::aes_128_ecb();

        // openssl's own padding and iv handling stay off: both are done in this crate
        let mut crypter = Crypter::new(openssl_cipher, mode, key, None)?;
        crypter.pad(false);

        let mut buf = vec![0; block.len() + openssl_cipher.block_size()];
        let mut count = crypter.update(block, &mut buf)?;
        count += crypter.finalize(&mut buf[count..])?;
        buf.truncate(count);

        Ok(buf)
    }

    /// Encrypt exactly one block with the raw primitive.
    ///
    /// # Errors
    ///
    /// `Shape` unless `block` is one block long, `KeyLength` for a bad key.
    pub fn encrypt_block(block: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        permute_block(block, key, openssl::symm::Mode::Encrypt)
    }

    /// Decrypt exactly one block with the raw primitive.
    ///
    /// # Errors
    ///
    /// `Shape` unless `block` is one block long, `KeyLength` for a bad key.
    pub fn decrypt_block(block: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        permute_block(block, key, openssl::symm::Mode::Decrypt)
    }

    /// Pad, then encrypt every block independently.
    ///
    /// # Errors
    ///
    /// `NothingToPad` for empty plaintext, `KeyLength` for a bad key.
    pub fn encrypt_ecb(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        let padded = pad(plaintext, BLOCK_SIZE)?;
        let mut ciphertext = Vec::with_capacity(padded.len());

        for block in padded.chunks_exact(BLOCK_SIZE) {
            ciphertext.extend(encrypt_block(block, key)?);
        }

        Ok(ciphertext)
    }

    /// Decrypt every block independently. Padding is left in place.
    ///
    /// # Errors
    ///
    /// `Shape` when `ciphertext` is not whole blocks, `KeyLength` for a bad key.
    pub fn decrypt_ecb(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        check_shape(ciphertext)?;
        let mut plaintext = Vec::with_capacity(ciphertext.len());

        for block in ciphertext.chunks_exact(BLOCK_SIZE) {
            plaintext.extend(decrypt_block(block, key)?);
        }

        Ok(plaintext)
    }

    fn check_iv(iv: &[u8]) -> Result<()> {
        if iv.len() == BLOCK_SIZE {
            Ok(())
        } else {
            Err(Error::Shape {
                len: iv.len(),
                block_size: BLOCK_SIZE,
            })
        }
    }

    /// Pad, then chain: each plaintext block is XOR-ed with the previous ciphertext block (the IV
    /// for the first one) before going through the raw primitive.
    ///
    /// # Errors
    ///
    /// `NothingToPad` for empty plaintext, `Shape` for an IV that is not one block long,
    /// `KeyLength` for a bad key.
    pub fn encrypt_cbc(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_iv(iv)?;
        let padded_plaintext = pad(plaintext, BLOCK_SIZE)?;
        let mut ciphertext = Vec::with_capacity(padded_plaintext.len());

        let mut last_ciphertext_block = iv.to_vec();

        for block in padded_plaintext.chunks_exact(BLOCK_SIZE) {
            last_ciphertext_block = encrypt_block(&block.xor(&last_ciphertext_block), key)?;
            ciphertext.extend_from_slice(&last_ciphertext_block);
        }

        Ok(ciphertext)
    }

    /// Undo [`encrypt_cbc`]. Padding is left in place for the caller to check.
    ///
    /// # Errors
    ///
    /// `Shape` when `ciphertext` is not whole blocks or the IV is not one block long, `KeyLength`
    /// for a bad key.
    pub fn decrypt_cbc(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_iv(iv)?;
        check_shape(ciphertext)?;
        let mut plaintext = Vec::with_capacity(ciphertext.len());

        let mut previous = iv;
        for block in ciphertext.chunks_exact(BLOCK_SIZE) {
            let decrypted = decrypt_block(block, key)?;
            plaintext.extend_from_slice(&decrypted.xor(previous));
            previous = block;
        }

        Ok(plaintext)
    }
}

pub(crate) fn gen_random_bytes(len: usize) -> Vec<u8> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

pub mod mode {
    use super::{aes_128, gen_random_bytes, BytesExt};
    use crate::error::Result;
    use crate::oracle::Oracle;
    use tracing::debug;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Mode {
        Ecb,
        Cbc,
    }

    /// Guess the mode from ciphertext shape alone: any two identical blocks means ECB.
    ///
    /// Only meaningful when the plaintext held at least two aligned blocks of repeated bytes,
    /// otherwise ECB output looks just like CBC output.
    #[must_use]
    pub fn detect_mode(ciphertext: &[u8], block_size: usize) -> Mode {
        if ciphertext.has_repeated_block(block_size) {
            Mode::Ecb
        } else {
            Mode::Cbc
        }
    }

    /// Drive `oracle` with three blocks of one repeated byte and classify the result.
    ///
    /// Three blocks guarantee two aligned all-repeated plaintext blocks whatever the oracle
    /// prepends.
    ///
    /// # Errors
    ///
    /// Whatever the oracle returns.
    pub fn guess_mode<O: Oracle<Vec<u8>> + ?Sized>(oracle: &O, block_size: usize) -> Result<Mode> {
        let ciphertext = oracle.encrypt(&vec![0; block_size * 3])?;
        let mode = detect_mode(&ciphertext, block_size);
        debug!(?mode, "classified oracle");
        Ok(mode)
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    enum Cipher {
        Ecb,
        Cbc { iv: Vec<u8> },
    }

    /// Encrypts under a fresh random key with either ECB or CBC (random IV), chosen by coin flip.
    /// Before encryption, the input is wrapped in 5 to 10 random bytes on each side.
    pub struct CoinFlipOracle {
        cipher: Cipher,
        key: Vec<u8>,
        prefix: Vec<u8>,
        suffix: Vec<u8>,
    }

    impl CoinFlipOracle {
        #[must_use]
        pub fn new_random() -> Self {
            use rand::Rng;
            let mut rng = rand::thread_rng();

            let cipher = if rng.gen_bool(0.5) {
                Cipher::Ecb
            } else {
                Cipher::Cbc {
                    iv: gen_random_bytes(aes_128::BLOCK_SIZE),
                }
            };

            let prefix_len = rng.gen_range(5..=10);
            let suffix_len = rng.gen_range(5..=10);

            CoinFlipOracle {
                cipher,
                key: gen_random_bytes(aes_128::KEY_SIZE),
                prefix: gen_random_bytes(prefix_len),
                suffix: gen_random_bytes(suffix_len),
            }
        }

        /// The mode actually in use, for checking guesses against.
        #[must_use]
        pub fn mode(&self) -> Mode {
            match self.cipher {
                Cipher::Ecb => Mode::Ecb,
                Cipher::Cbc { .. } => Mode::Cbc,
            }
        }
    }

    impl Oracle<Vec<u8>> for CoinFlipOracle {
        fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
            let affixed = [&self.prefix, plaintext.as_slice(), &self.suffix].concat();
            match &self.cipher {
                Cipher::Ecb => aes_128::encrypt_ecb(&affixed, &self.key),
                Cipher::Cbc { iv } => aes_128::encrypt_cbc(&affixed, &self.key, iv),
            }
        }
    }
}
