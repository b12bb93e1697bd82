//! The Smirk background worker.
//!
//! Owns the mutable core state (unlocked keys, approvals, the CryptoNote
//! spent shield), persists the session, runs the auto-lock timer, and
//! routes typed requests from the popup / content scripts to the wallet
//! engines. Everything here assumes the single-threaded cooperative
//! model: one event loop, handlers suspended only at awaits.

pub mod approvals;
pub mod autolock;
pub mod router;
pub mod session;
pub mod sites;
pub mod state;
