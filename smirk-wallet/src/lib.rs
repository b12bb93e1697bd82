//! The Smirk wallet engines.
//!
//! Everything stateful about the wallet lives here: the encrypted key
//! vault, the per-chain transaction engines, the pending-transaction
//! ledger and the social-tip escrow. External services (Electrum proxy,
//! CryptoNote light-wallet server, application backend) are abstract
//! [`client`] traits; this crate never talks to the network itself.
//!
//! The locking model is compile-time: engine entry points take a
//! [`vault::Unlocked`] capability, which can only be obtained from
//! [`vault::Vault::unlock`] (or a session restore). There is no runtime
//! "is the wallet locked?" check to forget.

pub mod client;
pub mod cryptonote;
pub mod error;
pub mod grin;
pub mod pending;
pub mod store;
pub mod tips;
pub mod utxo;
pub mod vault;

pub use error::Error;
