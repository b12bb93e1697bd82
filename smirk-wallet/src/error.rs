//! Wallet error kinds.
//!
//! Every failure an engine can produce collapses into one of these
//! variants; the router serializes them as `{success: false, error}` and
//! nothing here ever crosses a boundary as a panic. Remote failures are
//! retryable; broadcast failures come with engine-specific rollback
//! already performed.

use common::asset::Asset;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("wallet is locked")]
    Locked,

    #[error("invalid password")]
    BadPassword,

    #[error("no wallet has been created yet")]
    NoWallet,

    #[error("not authenticated with the backend")]
    NotAuthenticated,

    #[error("key bundle for {0} is missing or corrupted")]
    MissingKey(Asset),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient funds: need {needed} atoms, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("no unspent outputs available")]
    NoUtxos,

    #[error("balance does not cover the network fee")]
    BalanceBelowFee,

    #[error("no unspent outputs reported by the server")]
    NoUnspent,

    #[error("every reported output is already spent")]
    AllSpent,

    #[error("server returned too few decoys for ring assembly")]
    InsufficientDecoys,

    #[error("transaction signing failed: {0}")]
    SigningFailed(String),

    #[error("stale state: {0}")]
    StaleState(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("remote call failed: {0}")]
    RemoteFailure(String),

    #[error("broadcast rejected by the chain: {0}")]
    BroadcastFailed(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn remote(msg: impl std::fmt::Display) -> Self {
        Error::RemoteFailure(msg.to_string())
    }
}

/// A bad AEAD open during unlock means a bad password; the two are
/// indistinguishable by design.
impl From<common::aes::DecryptError> for Error {
    fn from(_: common::aes::DecryptError) -> Self {
        Error::BadPassword
    }
}

impl From<common::password::Error> for Error {
    fn from(err: common::password::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

impl From<common::address::Error> for Error {
    fn from(err: common::address::Error) -> Self {
        match err {
            common::address::Error::WrongNetwork =>
                Error::VerificationFailed(err.to_string()),
            _ => Error::InvalidInput(err.to_string()),
        }
    }
}

impl From<common::seed::Error> for Error {
    fn from(err: common::seed::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
