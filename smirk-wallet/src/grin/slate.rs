//! The slate: a partially-built Mimblewimble transaction passed between
//! the two parties of an interactive send.
//!
//! Serialization is JSON inside base64. The compact S2 slate a recipient
//! returns omits the sender's inputs and change (they never left the
//! sender's machine); the sender re-attaches them from the stored
//! [`GrinSendContext`](super::keychain::GrinSendContext) at S3.

use common::rng::Crng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Error;

/// SRS states plus the RSR (invoice) variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SlateState {
    S1,
    S2,
    S3,
    I1,
    I2,
    I3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFeatures {
    Plain,
    Coinbase,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlateInput {
    pub commitment: String,
    pub features: OutputFeatures,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlateOutput {
    pub commitment: String,
    /// Range proof, hex. Mandatory: an output without a proof cannot be
    /// finalized.
    pub proof: String,
    pub features: OutputFeatures,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantData {
    /// 0 = initiator, 1 = counterparty.
    pub id: u8,
    pub public_blind_excess: String,
    pub public_nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_sig: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlateKernel {
    pub excess: String,
    pub excess_sig: String,
    pub fee: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slate {
    pub id: String,
    pub state: SlateState,
    pub amount: u64,
    pub fee: u64,
    /// Kernel offset, hex 32 bytes. Preserved verbatim from S1 through
    /// finalization; never normalized.
    pub offset: String,
    pub num_participants: u8,
    #[serde(default)]
    pub participant_data: Vec<ParticipantData>,
    #[serde(default)]
    pub inputs: Vec<SlateInput>,
    #[serde(default)]
    pub outputs: Vec<SlateOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<SlateKernel>,
}

impl Slate {
    pub fn new(id: String, state: SlateState, amount: u64, fee: u64) -> Self {
        Self {
            id,
            state,
            amount,
            fee,
            offset: String::new(),
            num_participants: 2,
            participant_data: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            kernel: None,
        }
    }

    pub fn participant(&self, id: u8) -> Option<&ParticipantData> {
        self.participant_data.iter().find(|p| p.id == id)
    }

    pub fn to_base64(&self) -> String {
        base64::encode(
            serde_json::to_vec(self).expect("slate always serializes"),
        )
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::decode(encoded)
            .map_err(|_| Error::invalid_input("slate is not valid base64"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| Error::invalid_input("slate JSON is malformed"))
    }
}

/// A fresh v4-shaped slate id.
pub fn new_slate_id(rng: &mut impl Crng) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let h = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32],
    )
}

#[cfg(test)]
mod test {
    use common::rng::FastRng;

    use super::*;

    #[test]
    fn base64_roundtrip() {
        let mut slate = Slate::new(
            "b8e2e0f4-0000-4aaa-8bbb-000000000001".into(),
            SlateState::S1,
            5_000_000_000,
            23_500_000,
        );
        slate.offset = hex::encode([9u8; 32]);
        slate.inputs.push(SlateInput {
            commitment: hex::encode([1u8; 33]),
            features: OutputFeatures::Plain,
        });
        slate.participant_data.push(ParticipantData {
            id: 0,
            public_blind_excess: hex::encode([2u8; 33]),
            public_nonce: hex::encode([3u8; 33]),
            part_sig: None,
        });

        let decoded = Slate::from_base64(&slate.to_base64()).unwrap();
        assert_eq!(decoded, slate);
    }

    #[test]
    fn slate_ids_are_v4_shaped_and_unique() {
        let mut rng = FastRng::from_u64(3);
        let a = new_slate_id(&mut rng);
        let b = new_slate_id(&mut rng);
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.as_bytes()[14], b'4');
    }

    #[test]
    fn garbage_rejected() {
        assert!(Slate::from_base64("not base64 at all!").is_err());
        assert!(Slate::from_base64(&base64::encode(b"{\"nope\":1}")).is_err());
    }
}
