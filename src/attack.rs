//! Byte-at-a-time recovery of the secret an ECB oracle appends to attacker input.
//!
//! The oracle encrypts `prefix || input || suffix` and is deterministic. By choosing how many
//! filler bytes go in front of the suffix we can line up a block whose plaintext we know except
//! for its last byte, which is the next unknown suffix byte. Trying all 256 values for that byte
//! and comparing ciphertext blocks tells us which one it is.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, trace, warn};

use crate::bytes_ext::BytesExt;
use crate::crypto::mode::{guess_mode, Mode};
use crate::error::{Error, Precondition, Result};
use crate::hex::hex_encode;
use crate::oracle::{Growth, Limits, Oracle, FILLER};

/// Second filler, used to re-derive a byte during the alignment sanity round.
const ALT_FILLER: u8 = b'B';
/// Fills the gap between an unknown prefix and the next block boundary.
const GAP: u8 = 0x00;
/// Two distinct markers for locating the block boundary after an unknown prefix. Requiring both
/// to agree rules out collisions with prefix or suffix bytes that happen to equal one marker.
const MARKERS: [u8; 2] = [b'X', b'Y'];

/// A position where more than one candidate byte reproduced the target block. The smallest
/// candidate was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ambiguity {
    pub position: usize,
    pub candidates: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub secret: Vec<u8>,
    pub ambiguities: Vec<Ambiguity>,
}

/// Where attacker input lands after an unknown prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixGeometry {
    pub prefix_len: usize,
    /// Filler bytes that take the prefix up to a block boundary.
    pub fill: usize,
    /// Whole blocks occupied by the prefix and its fill.
    pub skip_blocks: usize,
}

/// Checks the cancel flag before every call it forwards.
struct Guarded<'a, O: ?Sized> {
    inner: &'a O,
    cancel: Option<&'a AtomicBool>,
}

impl<O: Oracle<Vec<u8>> + ?Sized> Oracle<Vec<u8>> for Guarded<'_, O> {
    fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
        if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(Error::Cancelled);
        }
        self.inner.encrypt(plaintext)
    }
}

/// Presents an oracle with a known prefix geometry as if it had no prefix: every input is
/// preceded by the fill and the prefix blocks are cut from every output.
pub struct AlignedOracle<'a, O: ?Sized> {
    inner: &'a O,
    geometry: PrefixGeometry,
    block_size: usize,
}

impl<'a, O: Oracle<Vec<u8>> + ?Sized> AlignedOracle<'a, O> {
    pub fn new(inner: &'a O, geometry: PrefixGeometry, block_size: usize) -> Self {
        AlignedOracle {
            inner,
            geometry,
            block_size,
        }
    }
}

impl<O: Oracle<Vec<u8>> + ?Sized> Oracle<Vec<u8>> for AlignedOracle<'_, O> {
    fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
        let input = [vec![GAP; self.geometry.fill], plaintext.clone()].concat();
        let mut ciphertext = self.inner.encrypt(&input)?;

        let skip = self.geometry.skip_blocks * self.block_size;
        if ciphertext.len() < skip {
            return Err(Error::Shape {
                len: ciphertext.len(),
                block_size: self.block_size,
            });
        }
        Ok(ciphertext.split_off(skip))
    }
}

/// Chosen-plaintext attack against an oracle that ECB-encrypts attacker input followed by a
/// secret, optionally behind an unknown prefix.
pub struct ByteAtATime<'a, O: ?Sized> {
    oracle: &'a O,
    limits: Limits,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, O: Oracle<Vec<u8>> + ?Sized> ByteAtATime<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        ByteAtATime {
            oracle,
            limits: Limits::default(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Abort with `Error::Cancelled` at the next oracle call once `flag` is set.
    #[must_use]
    pub fn cancel_on(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn guarded(&self) -> Guarded<'a, O> {
        Guarded {
            inner: self.oracle,
            cancel: self.cancel,
        }
    }

    /// Recover the secret from an oracle that puts attacker input first.
    ///
    /// # Errors
    ///
    /// `Unattackable` when the block size can't be found, the output is not whole blocks, or the
    /// oracle isn't ECB. `DataInconsistency` when no candidate matches before the secret ends.
    /// `Cancelled` once the cancel flag is set.
    #[instrument(skip(self))]
    pub fn recover_suffix(&self) -> Result<Recovery> {
        recover(&self.guarded(), &self.limits)
    }

    /// Recover the secret from an oracle that puts a fixed unknown prefix before attacker input.
    ///
    /// # Errors
    ///
    /// As [`ByteAtATime::recover_suffix`], plus `Alignment` when the end of the prefix can't be
    /// located or the located boundary fails the sanity round.
    #[instrument(skip(self))]
    pub fn recover_suffix_after_prefix(&self) -> Result<Recovery> {
        let oracle = self.guarded();
        let growth = check_attackable(&oracle, &self.limits)?;
        let geometry = locate_prefix(&oracle, growth.block_size)?;

        let aligned = AlignedOracle::new(&oracle, geometry, growth.block_size);
        confirm_alignment(&aligned, growth.block_size, &self.limits)?;

        recover(&aligned, &self.limits)
    }

    /// Find where attacker input starts behind the oracle's prefix.
    ///
    /// # Errors
    ///
    /// As [`ByteAtATime::recover_suffix_after_prefix`].
    pub fn locate_prefix(&self) -> Result<PrefixGeometry> {
        let oracle = self.guarded();
        let growth = check_attackable(&oracle, &self.limits)?;
        locate_prefix(&oracle, growth.block_size)
    }
}

/// Block size, whole-block output and ECB: everything that has to hold before any byte can be
/// recovered.
fn check_attackable<O: Oracle<Vec<u8>> + ?Sized>(oracle: &O, limits: &Limits) -> Result<Growth> {
    let growth = oracle.growth(limits)?;
    let block_size = growth.block_size;

    if growth.base_len % block_size != 0 {
        return Err(Precondition::RaggedOutput {
            len: growth.base_len,
            block_size,
        }
        .into());
    }
    if guess_mode(oracle, block_size)? != Mode::Ecb {
        return Err(Precondition::NotEcb.into());
    }

    debug!(block_size, hidden_len = growth.hidden_len(), "oracle is attackable");
    Ok(growth)
}

fn recover<O: Oracle<Vec<u8>> + ?Sized>(oracle: &O, limits: &Limits) -> Result<Recovery> {
    let growth = check_attackable(oracle, limits)?;
    let block_size = growth.block_size;

    let mut secret_len = growth.hidden_len();
    if secret_len > limits.max_suffix_len {
        warn!(secret_len, limit = limits.max_suffix_len, "secret truncated to limit");
        secret_len = limits.max_suffix_len;
    }

    let mut recovered = Vec::with_capacity(secret_len);
    let mut ambiguities = Vec::new();

    for position in 0..secret_len {
        let candidates = candidates_at(oracle, block_size, recovered.clone(), FILLER)?;
        let byte = match candidates[..] {
            [] => {
                return Err(Error::DataInconsistency {
                    position,
                    candidates: 0,
                })
            }
            [byte] => byte,
            [byte, ..] => {
                warn!(position, ?candidates, "several candidates matched, keeping the smallest");
                ambiguities.push(Ambiguity {
                    position,
                    candidates: candidates.clone(),
                });
                byte
            }
        };
        recovered.push(byte);
    }

    debug!(len = recovered.len(), "secret recovered");
    Ok(Recovery {
        secret: recovered,
        ambiguities,
    })
}

/// Every byte value that reproduces the ciphertext block holding secret byte `recovered.len()`.
fn candidates_at<O: Oracle<Vec<u8>> + ?Sized>(
    oracle: &O,
    block_size: usize,
    recovered: Vec<u8>,
    filler: u8,
) -> Result<Vec<u8>> {
    let position = recovered.len();
    let block_idx = position / block_size;
    // cycles from block_size - 1 down to 0, pushing the next unknown byte to the end of a block
    let fill_size = block_size - 1 - position % block_size;

    let ciphertext = oracle.encrypt(&vec![filler; fill_size])?;
    let target = ciphertext
        .nth_block(block_size, block_idx)
        .ok_or(Error::DataInconsistency {
            position,
            candidates: 0,
        })?
        .to_vec();

    // the last block_size - 1 known plaintext bytes in front of the unknown one, plus a slot for
    // the guess
    let mut input = [vec![filler; fill_size], recovered].concat();
    input.drain(..input.len() - (block_size - 1));
    input.push(0);

    let mut candidates = Vec::new();
    for byte in u8::MIN..=u8::MAX {
        input[block_size - 1] = byte;
        let ciphertext = oracle.encrypt(&input)?;
        if ciphertext.nth_block(block_size, 0) == Some(target.as_slice()) {
            candidates.push(byte);
        }
    }

    trace!(position, block = %hex_encode(&target), ?candidates, "tested candidates");
    Ok(candidates)
}

fn locate_prefix<O: Oracle<Vec<u8>> + ?Sized>(
    oracle: &O,
    block_size: usize,
) -> Result<PrefixGeometry> {
    // the first attacker byte sits in the first block that changes with it
    let first_block = oracle
        .encrypt(&vec![0])?
        .first_differing_block(oracle.encrypt(&vec![1])?, block_size)
        .ok_or(Error::Alignment { attempts: 1 })?;

    // grow a gap in front of two marker blocks until the markers fill two whole blocks
    for fill in 0..block_size {
        let mut runs = Vec::with_capacity(MARKERS.len());
        for marker in MARKERS {
            let input = [vec![GAP; fill], vec![marker; block_size * 2]].concat();
            let ciphertext = oracle.encrypt(&input)?;
            runs.push(marker_run_start(&ciphertext, block_size, first_block));
        }

        let [Some(a), Some(b)] = runs[..] else {
            continue;
        };
        let geometry = PrefixGeometry {
            prefix_len: a * block_size - fill,
            fill,
            skip_blocks: a,
        };
        if a != b || geometry.prefix_len / block_size != first_block {
            continue;
        }
        debug!(?geometry, "located prefix");
        return Ok(geometry);
    }

    Err(Error::Alignment {
        attempts: block_size,
    })
}

/// Where a run of two identical blocks starts, looking only where the marker run can start: the
/// block holding the first attacker byte or the one after it. Repeats further on belong to the
/// secret.
fn marker_run_start(ciphertext: &[u8], block_size: usize, first_block: usize) -> Option<usize> {
    let blocks = ciphertext.chunks_exact(block_size).collect::<Vec<_>>();
    (first_block..=first_block + 1)
        .find(|&i| i + 1 < blocks.len() && blocks[i] == blocks[i + 1])
}

/// Re-derive the first secret byte with two different fillers. A wrong boundary makes the two
/// disagree or find nothing.
fn confirm_alignment<O: Oracle<Vec<u8>> + ?Sized>(
    aligned: &O,
    block_size: usize,
    limits: &Limits,
) -> Result<()> {
    if aligned.growth(limits)?.hidden_len() == 0 {
        return Ok(());
    }

    let first = candidates_at(aligned, block_size, Vec::new(), FILLER)?;
    let second = candidates_at(aligned, block_size, Vec::new(), ALT_FILLER)?;
    match (first.first(), second.first()) {
        (Some(a), Some(b)) if a == b => Ok(()),
        _ => Err(Error::Alignment { attempts: 1 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes_128;
    use crate::oracle::SecretSuffixOracle;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    const KEY: &[u8] = b"YELLOW SUBMARINE";
    const SECRET: &[u8] = b"Rollin' in my 5.0\nDid you stop? No, I just drove by\n";

    fn oracle_with_prefix(prefix_len: usize) -> SecretSuffixOracle {
        let prefix = (0..prefix_len).map(|i| (i * 31 % 251) as u8).collect();
        SecretSuffixOracle::with_parts(KEY.to_vec(), prefix, SECRET.to_vec()).unwrap()
    }

    #[test]
    fn recovers_suffix_without_prefix() {
        crate::init_tracing();
        let oracle = oracle_with_prefix(0);

        let recovery = ByteAtATime::new(&oracle).recover_suffix().unwrap();

        assert_eq!(recovery.secret, SECRET);
        assert!(recovery.ambiguities.is_empty());
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(15)]
    #[case(16)]
    #[case(17)]
    #[case(40)]
    fn recovers_suffix_behind_prefix(#[case] prefix_len: usize) {
        let oracle = oracle_with_prefix(prefix_len);

        let recovery = ByteAtATime::new(&oracle)
            .recover_suffix_after_prefix()
            .unwrap();

        assert_eq!(recovery.secret, SECRET);
    }

    #[rstest]
    #[case(5)]
    #[case(16)]
    #[case(27)]
    fn recovers_secret_with_repeated_blocks_behind_prefix(#[case] prefix_len: usize) {
        let secret = [vec![b'Z'; 64], b"tail".to_vec()].concat();
        let oracle =
            SecretSuffixOracle::with_parts(KEY.to_vec(), vec![3; prefix_len], secret.clone())
                .unwrap();

        let recovery = ByteAtATime::new(&oracle)
            .recover_suffix_after_prefix()
            .unwrap();

        assert_eq!(recovery.secret, secret);
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(1, 15, 1)]
    #[case(16, 0, 1)]
    #[case(21, 11, 2)]
    fn locates_prefix(
        #[case] prefix_len: usize,
        #[case] fill: usize,
        #[case] skip_blocks: usize,
    ) {
        let oracle = oracle_with_prefix(prefix_len);

        let geometry = ByteAtATime::new(&oracle).locate_prefix().unwrap();

        assert_eq!(
            geometry,
            PrefixGeometry {
                prefix_len,
                fill,
                skip_blocks
            }
        );
    }

    #[test]
    fn prefix_made_of_marker_bytes_does_not_fool_locator() {
        let oracle = SecretSuffixOracle::with_parts(
            KEY.to_vec(),
            vec![MARKERS[0]; 7],
            vec![MARKERS[1]; 20],
        )
        .unwrap();

        let geometry = ByteAtATime::new(&oracle).locate_prefix().unwrap();

        assert_eq!(geometry.prefix_len, 7);
    }

    struct CbcSuffixOracle;

    impl Oracle<Vec<u8>> for CbcSuffixOracle {
        fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
            let message = [plaintext.as_slice(), SECRET].concat();
            aes_128::encrypt_cbc(&message, KEY, &[0; aes_128::BLOCK_SIZE])
        }
    }

    #[test]
    fn refuses_non_ecb_oracle() {
        let result = ByteAtATime::new(&CbcSuffixOracle).recover_suffix();
        assert!(matches!(
            result,
            Err(Error::Unattackable(Precondition::NotEcb))
        ));
    }

    /// Appends a stray byte to every ciphertext.
    struct RaggedOracle(SecretSuffixOracle);

    impl Oracle<Vec<u8>> for RaggedOracle {
        fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
            let mut ciphertext = self.0.encrypt(plaintext)?;
            ciphertext.push(0);
            Ok(ciphertext)
        }
    }

    #[test]
    fn refuses_ragged_output() {
        let oracle = RaggedOracle(oracle_with_prefix(0));
        let result = ByteAtATime::new(&oracle).recover_suffix();
        assert!(matches!(
            result,
            Err(Error::Unattackable(Precondition::RaggedOutput { block_size: 16, .. }))
        ));
    }

    /// Lowercases attacker input but not the secret, so an uppercase secret byte can never be
    /// reproduced.
    struct LowercasingOracle(SecretSuffixOracle);

    impl Oracle<Vec<u8>> for LowercasingOracle {
        fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
            self.0.encrypt(&plaintext.to_ascii_lowercase())
        }
    }

    #[test]
    fn unmatched_byte_is_a_data_inconsistency() {
        let oracle = LowercasingOracle(
            SecretSuffixOracle::with_parts(KEY.to_vec(), Vec::new(), b"abc Def".to_vec()).unwrap(),
        );

        let result = ByteAtATime::new(&oracle).recover_suffix();

        assert!(matches!(
            result,
            Err(Error::DataInconsistency {
                position: 4,
                candidates: 0
            })
        ));
    }

    /// Drops the high bit of attacker bytes, so `b` and `b | 0x80` encrypt the same.
    struct SevenBitOracle(SecretSuffixOracle);

    impl Oracle<Vec<u8>> for SevenBitOracle {
        fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
            let masked = plaintext.iter().map(|b| b & 0x7f).collect();
            self.0.encrypt(&masked)
        }
    }

    #[test]
    fn colliding_candidates_keep_the_smallest_and_are_reported() {
        let oracle = SevenBitOracle(
            SecretSuffixOracle::with_parts(KEY.to_vec(), Vec::new(), b"hi".to_vec()).unwrap(),
        );

        let recovery = ByteAtATime::new(&oracle).recover_suffix().unwrap();

        assert_eq!(recovery.secret, b"hi");
        assert_eq!(
            recovery.ambiguities,
            vec![
                Ambiguity {
                    position: 0,
                    candidates: vec![b'h', b'h' | 0x80]
                },
                Ambiguity {
                    position: 1,
                    candidates: vec![b'i', b'i' | 0x80]
                },
            ]
        );
    }

    #[test]
    fn set_flag_cancels_before_first_call() {
        let oracle = oracle_with_prefix(0);
        let flag = AtomicBool::new(true);

        let result = ByteAtATime::new(&oracle).cancel_on(&flag).recover_suffix();

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    /// Raises the cancel flag after a fixed number of calls.
    struct TrippingOracle<'a> {
        inner: SecretSuffixOracle,
        calls: AtomicUsize,
        trip_after: usize,
        flag: &'a AtomicBool,
    }

    impl Oracle<Vec<u8>> for TrippingOracle<'_> {
        fn encrypt(&self, plaintext: &Vec<u8>) -> Result<Vec<u8>> {
            if self.calls.fetch_add(1, Ordering::Relaxed) + 1 >= self.trip_after {
                self.flag.store(true, Ordering::Relaxed);
            }
            self.inner.encrypt(plaintext)
        }
    }

    #[test]
    fn flag_raised_mid_attack_stops_between_calls() {
        let flag = AtomicBool::new(false);
        let oracle = TrippingOracle {
            inner: oracle_with_prefix(0),
            calls: AtomicUsize::new(0),
            trip_after: 500,
            flag: &flag,
        };

        let result = ByteAtATime::new(&oracle).cancel_on(&flag).recover_suffix();

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(oracle.calls.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn suffix_limit_bounds_recovery() {
        let oracle = oracle_with_prefix(0);
        let limits = Limits {
            max_suffix_len: 5,
            ..Limits::default()
        };

        let recovery = ByteAtATime::new(&oracle).limits(limits).recover_suffix().unwrap();

        assert_eq!(recovery.secret, &SECRET[..5]);
    }
}
