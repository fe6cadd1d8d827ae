//! `key=value&...` user profiles, an ECB oracle that hands them out as opaque tokens, and a
//! cut-and-paste forgery that turns a `user` token into an `admin` one.

use rand::Rng;
use tracing::{debug, instrument};

use crate::bytes_ext::BytesExt;
use crate::crypto::{aes_128, gen_random_bytes};
use crate::error::{Error, Result};
use crate::oracle::{Limits, Oracle, Plaintext};
use crate::padding::{pad, unpad};

pub const DEFAULT_ROLE: &str = "user";
pub const ADMIN_ROLE: &str = "admin";

/// Everything in front of the email in an encoded profile.
const EMAIL_PREFIX: &str = "email=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub email: String,
    pub uid: String,
    pub role: String,
}

/// Drop every `&` and `=`, so an email can't add pairs of its own.
#[must_use]
pub fn sanitize(value: &str) -> String {
    value.replace(['&', '='], "")
}

impl Profile {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    /// `email=..&uid=..&role=..`, always in that order, with the email sanitized.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{EMAIL_PREFIX}{}&uid={}&role={}",
            sanitize(&self.email),
            self.uid,
            self.role
        )
    }

    /// Parse `key=value` pairs separated by `&`. Values run to the end of the pair, so only the
    /// first `=` splits. Unknown keys are ignored and the last occurrence of a key wins.
    ///
    /// # Errors
    ///
    /// `Profile` when `email`, `uid` or `role` is missing.
    pub fn decode(s: &str) -> Result<Self> {
        let mut email = None;
        let mut uid = None;
        let mut role = None;

        for (key, value) in s.split('&').filter_map(|pair| pair.split_once('=')) {
            match key {
                "email" => email = Some(value),
                "uid" => uid = Some(value),
                "role" => role = Some(value),
                _ => (),
            }
        }

        let missing = |field: &str| Error::Profile(format!("no {field} in {s:?}"));
        Ok(Profile {
            email: email.ok_or_else(|| missing("email"))?.to_owned(),
            uid: uid.ok_or_else(|| missing("uid"))?.to_owned(),
            role: role.ok_or_else(|| missing("role"))?.to_owned(),
        })
    }
}

fn random_uid() -> String {
    rand::thread_rng().gen_range(1000..=9999).to_string()
}

/// Hands out ECB-encrypted profile tokens under a key only it knows.
pub struct ProfileForger {
    key: Vec<u8>,
    uid: fn() -> String,
}

impl ProfileForger {
    /// Random key, random four digit uids.
    #[must_use]
    pub fn new_random() -> Self {
        ProfileForger {
            key: gen_random_bytes(aes_128::KEY_SIZE),
            uid: random_uid,
        }
    }

    /// # Errors
    ///
    /// `KeyLength` if `key` is not an AES-128 key.
    pub fn with_uid_generator(key: Vec<u8>, uid: fn() -> String) -> Result<Self> {
        if key.len() != aes_128::KEY_SIZE {
            return Err(Error::KeyLength {
                expected: aes_128::KEY_SIZE,
                actual: key.len(),
            });
        }
        Ok(ProfileForger { key, uid })
    }

    /// A fresh `user` profile for `email`.
    #[must_use]
    pub fn profile_for(&self, email: &str) -> Profile {
        Profile {
            email: email.to_owned(),
            uid: (self.uid)(),
            role: DEFAULT_ROLE.to_owned(),
        }
    }

    /// # Errors
    ///
    /// Only if encryption itself fails.
    pub fn new_token(&self, email: &str) -> Result<Vec<u8>> {
        let profile = self.profile_for(email);
        aes_128::encrypt_ecb(profile.encode().as_bytes(), &self.key)
    }

    /// Decrypt and parse a token, forged or not.
    ///
    /// # Errors
    ///
    /// `Shape` or `PaddingInvalid` for a broken ciphertext, `Profile` when the plaintext is not a
    /// profile.
    pub fn decrypt(&self, token: &[u8]) -> Result<Profile> {
        let padded = aes_128::decrypt_ecb(token, &self.key)?;
        let encoded = unpad(&padded, aes_128::BLOCK_SIZE)?;
        let encoded =
            String::from_utf8(encoded).map_err(|e| Error::Profile(format!("not utf-8: {e}")))?;
        Profile::decode(&encoded)
    }
}

impl Oracle<String> for ProfileForger {
    fn encrypt(&self, email: &String) -> Result<Vec<u8>> {
        self.new_token(email)
    }
}

/// An email that pushes `base_email` `fill` bytes further along.
fn shaped(fill: usize, base_email: &str) -> String {
    String::filler(fill) + base_email
}

/// Forge a token for an admin profile using nothing but the token oracle.
///
/// Two tokens are requested. The first has an email that puts `admin` plus valid padding in a block
/// of its own. The second has an email that pushes the `user` role value into a final block of its
/// own. Swapping that final block for the `admin` block gives a token that decrypts to the second
/// profile with `role=admin`.
///
/// # Errors
///
/// `Unattackable(BlockSize)` if the oracle's block size can't be found, `Alignment` if the
/// blocks can't be lined up within the limits.
#[instrument(skip(oracle, limits))]
pub fn escalate<O: Oracle<String> + ?Sized>(
    oracle: &O,
    base_email: &str,
    limits: &Limits,
) -> Result<Vec<u8>> {
    let block_size = oracle.key_size(limits)?;
    let admin_block = isolate_admin_block(oracle, block_size)?;

    for attempt in 1..=limits.forge_attempts {
        if let Some(forged) = splice(oracle, base_email, block_size, &admin_block, limits)? {
            debug!(attempt, "forged admin token");
            return Ok(forged);
        }
        debug!(attempt, "token length drifted between requests, retrying");
    }

    Err(Error::Alignment {
        attempts: limits.forge_attempts,
    })
}

/// Ciphertext of the block `admin` + padding, cut out of a token whose email places it at a block
/// boundary.
fn isolate_admin_block<O: Oracle<String> + ?Sized>(
    oracle: &O,
    block_size: usize,
) -> Result<Vec<u8>> {
    let fill = (block_size - EMAIL_PREFIX.len() % block_size) % block_size;
    let block_idx = (EMAIL_PREFIX.len() + fill) / block_size;

    // padding bytes past 0x7f wouldn't survive as an email string
    let payload = String::from_utf8(pad(ADMIN_ROLE.as_bytes(), block_size)?)
        .ok()
        .filter(|payload| payload.is_ascii() && payload.len() == block_size)
        .ok_or(Error::Alignment { attempts: 1 })?;

    let token = oracle.encrypt(&shaped(fill, &payload))?;
    Ok(token
        .nth_block(block_size, block_idx)
        .ok_or(Error::Alignment { attempts: 1 })?
        .to_vec())
}

/// A `user` token whose final block holds only the role value, with that block replaced. `None`
/// when the token didn't come out at the length the alignment predicts.
fn splice<O: Oracle<String> + ?Sized>(
    oracle: &O,
    base_email: &str,
    block_size: usize,
    admin_block: &[u8],
    limits: &Limits,
) -> Result<Option<Vec<u8>>> {
    let base_len = oracle.encrypt(&shaped(0, base_email))?.len();

    // the shortest fill that grows the token ends the encoded profile exactly on a block boundary
    let mut grown = None;
    for fill in 1..=limits.max_input_len {
        let len = oracle.encrypt(&shaped(fill, base_email))?.len();
        if len > base_len {
            grown = Some((fill, len));
            break;
        }
    }
    let (boundary_fill, grown_len) = grown.ok_or(Error::Alignment {
        attempts: limits.max_input_len,
    })?;

    // shift by the role value's length so that only it spills into the final block
    let boundary_len = grown_len - block_size;
    let fill = (boundary_fill + DEFAULT_ROLE.len()) % block_size;
    let encoded_len = boundary_len + fill - boundary_fill;
    let expected_len = (encoded_len / block_size + 1) * block_size;

    let token = oracle.encrypt(&shaped(fill, base_email))?;
    if token.len() != expected_len {
        return Ok(None);
    }

    let mut forged = token[..token.len() - block_size].to_vec();
    forged.extend_from_slice(admin_block);
    Ok(Some(forged))
}
