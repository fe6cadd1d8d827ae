use thiserror::Error;

/// The precondition an attack found unmet before it started recovering anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("block size not found: ciphertext length never changed over {attempts} inputs")]
    BlockSize { attempts: usize },

    #[error("oracle is not ECB: no repeated ciphertext block for repeated plaintext")]
    NotEcb,

    #[error("ciphertext length {len} is not a multiple of block size {block_size}")]
    RaggedOutput { len: usize, block_size: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("nothing to pad: data and block size must both be non-empty")]
    NothingToPad,

    #[error("invalid padding")]
    PaddingInvalid,

    #[error("length {len} does not fit block size {block_size}")]
    Shape { len: usize, block_size: usize },

    #[error("key must be {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("unattackable oracle: {0}")]
    Unattackable(Precondition),

    #[error("could not establish block alignment within {attempts} attempts")]
    Alignment { attempts: usize },

    #[error("data inconsistency at byte {position}: {candidates} candidates matched")]
    DataInconsistency { position: usize, candidates: usize },

    #[error("attack cancelled")]
    Cancelled,

    #[error("malformed profile: {0}")]
    Profile(String),

    #[error(transparent)]
    Primitive(#[from] openssl::error::ErrorStack),
}

impl From<Precondition> for Error {
    fn from(precondition: Precondition) -> Self {
        Error::Unattackable(precondition)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
