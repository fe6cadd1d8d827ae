//! Block cipher modes assembled from a raw AES-128 block permutation, and the chosen-plaintext
//! attacks that make ECB give up its secrets: byte-at-a-time suffix recovery (with or without an
//! unknown prefix) and cut-and-paste forgery of `role=admin` profile tokens.
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod bytes_ext;
mod hex;

pub mod attack;
pub mod crypto;
pub mod error;
pub mod oracle;
pub mod padding;
pub mod profile;

pub use attack::{Ambiguity, ByteAtATime, PrefixGeometry, Recovery};
pub use crypto::mode::{detect_mode, guess_mode, CoinFlipOracle, Mode};
pub use error::{Error, Precondition, Result};
pub use oracle::{Limits, Oracle, Plaintext, SecretSuffixOracle};
pub use padding::{pad, unpad};
pub use profile::{escalate, Profile, ProfileForger};

/// Route `tracing` output to the test harness. Safe to call from every test.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// End-to-end runs of each attack against freshly keyed oracles.
///
/// The code in these tests should be minimal: just set up inputs and expected values, run the
/// attack, and assert for correctness. The actual implementation lives in the library modules.
#[cfg(test)]
mod scenarios {
    use crate::{
        crypto::aes_128,
        escalate, guess_mode, pad, unpad, ByteAtATime, CoinFlipOracle, Limits, Mode, Oracle,
        SecretSuffixOracle,
    };

    const SECRET: &[u8] = b"Rollin' in my 5.0\n\
        With my rag-top down so my hair can blow\n\
        The girlies on standby waving just to say hi\n\
        Did you stop? No, I just drove by\n";

    #[test]
    fn chained_mode_round_trip() {
        let key = b"YELLOW SUBMARINE";
        let iv = [0; aes_128::BLOCK_SIZE];
        let plaintext = b"I'm back and I'm ringin' the bell";

        let ciphertext = aes_128::encrypt_cbc(plaintext, key, &iv).unwrap();
        let decrypted = aes_128::decrypt_cbc(&ciphertext, key, &iv).unwrap();

        assert_eq!(decrypted, pad(plaintext, aes_128::BLOCK_SIZE).unwrap());
        assert_eq!(unpad(&decrypted, aes_128::BLOCK_SIZE).unwrap(), plaintext);
    }

    #[test]
    fn detect_oracle_mode() {
        for _ in 0..50 {
            let oracle = CoinFlipOracle::new_random();
            assert_eq!(guess_mode(&oracle, 16).unwrap(), oracle.mode());
        }
    }

    #[test]
    fn secret_suffix_oracle_is_ecb_with_16_byte_blocks() {
        let oracle = SecretSuffixOracle::new(SECRET.to_vec());

        let block_size = oracle.key_size(&Limits::default()).unwrap();

        assert_eq!(block_size, 16);
        assert_eq!(guess_mode(&oracle, block_size).unwrap(), Mode::Ecb);
    }

    #[test]
    fn byte_at_a_time_simple() {
        crate::init_tracing();
        let oracle = SecretSuffixOracle::new(SECRET.to_vec());

        let recovery = ByteAtATime::new(&oracle).recover_suffix().unwrap();

        assert_eq!(recovery.secret, SECRET);
        let text = String::from_utf8_lossy(&recovery.secret);
        assert!(text.contains("Did you stop? No, I just drove by"));
    }

    #[test]
    fn byte_at_a_time_with_random_prefix() {
        crate::init_tracing();
        for _ in 0..3 {
            let oracle = SecretSuffixOracle::with_random_prefix(SECRET.to_vec());

            let recovery = ByteAtATime::new(&oracle)
                .recover_suffix_after_prefix()
                .unwrap();

            assert_eq!(recovery.secret, SECRET);
        }
    }

    #[test]
    fn cut_and_paste_admin_profile() {
        crate::init_tracing();
        let forger = crate::ProfileForger::new_random();

        let forged = escalate(&forger, "me@test.com", &Limits::default()).unwrap();

        let profile = forger.decrypt(&forged).unwrap();
        assert_eq!(profile.role, "admin");
    }
}
