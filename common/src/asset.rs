//! The five supported chains and their per-chain constant tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A supported asset. Three chain families: UTXO (BTC, LTC), CryptoNote
/// (XMR, WOW) and Mimblewimble (GRIN).
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Btc,
    Ltc,
    Xmr,
    Wow,
    Grin,
}

/// The chain family an [`Asset`] belongs to. Engines dispatch on this.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChainFamily {
    Utxo,
    CryptoNote,
    Mimblewimble,
}

impl Asset {
    pub const ALL: [Asset; 5] =
        [Asset::Btc, Asset::Ltc, Asset::Xmr, Asset::Wow, Asset::Grin];

    pub fn family(self) -> ChainFamily {
        match self {
            Asset::Btc | Asset::Ltc => ChainFamily::Utxo,
            Asset::Xmr | Asset::Wow => ChainFamily::CryptoNote,
            Asset::Grin => ChainFamily::Mimblewimble,
        }
    }

    /// Number of decimal places in one whole coin.
    pub fn decimals(self) -> u32 {
        match self {
            Asset::Btc | Asset::Ltc => 8,
            Asset::Xmr => 12,
            Asset::Wow => 11,
            Asset::Grin => 9,
        }
    }

    /// How long an outgoing tx stays in the pending ledger before the
    /// chain service is expected to have surfaced it. UTXO chains have
    /// direct mempool visibility, so their TTL is zero.
    pub fn pending_tx_ttl_ms(self) -> i64 {
        match self {
            Asset::Btc | Asset::Ltc | Asset::Grin => 0,
            Asset::Xmr => 30 * 60 * 1000,
            Asset::Wow => 5 * 60 * 1000,
        }
    }

    /// RingCT ring size (decoys + 1). Post-HFv9 value for Wownero.
    pub fn ring_size(self) -> usize {
        match self {
            Asset::Xmr => 16,
            Asset::Wow => 22,
            _ => 0,
        }
    }

    /// CryptoNote mainnet standard-address prefix.
    pub fn cn_address_prefix(self) -> u64 {
        match self {
            Asset::Xmr => 18,
            Asset::Wow => 4146,
            _ => 0,
        }
    }

    /// Bech32 human-readable part for the chains that use one.
    pub fn bech32_hrp(self) -> Option<&'static str> {
        match self {
            Asset::Btc => Some("bc"),
            Asset::Ltc => Some("ltc"),
            Asset::Grin => Some("grin"),
            _ => None,
        }
    }

    pub fn ticker(self) -> &'static str {
        match self {
            Asset::Btc => "btc",
            Asset::Ltc => "ltc",
            Asset::Xmr => "xmr",
            Asset::Wow => "wow",
            Asset::Grin => "grin",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

impl FromStr for Asset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btc" => Ok(Asset::Btc),
            "ltc" => Ok(Asset::Ltc),
            "xmr" => Ok(Asset::Xmr),
            "wow" => Ok(Asset::Wow),
            "grin" => Ok(Asset::Grin),
            _ => Err(anyhow::format_err!("unknown asset: {s}")),
        }
    }
}
