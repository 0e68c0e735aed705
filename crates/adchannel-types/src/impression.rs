//! Impression beacons and the peer messages that carry them.

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::{Address, ChannelId, ImpressionId, Signature, Update};

/// One billable ad-serving event, as reported by the browser beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impression {
    pub impression_id: ImpressionId,
    pub price: U256,
    pub supply_id: Address,
    pub demand_id: Address,
    pub timestamp: DateTime<Utc>,
}

/// Demand → supply/market message: the impression and the signed update
/// that folds it into the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub impression: Impression,
    pub update: Update,
}

impl ChannelUpdate {
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.update.identity.channel_id
    }
}

/// The market's signed statement that it observed an impression.
///
/// The signature covers `H(impression_id)` under the ledger message prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub impression: Impression,
    pub signature: Signature,
}

#[cfg(any(test, feature = "test-helpers"))]
impl Impression {
    /// Impression between the dummy identity's parties.
    #[must_use]
    pub fn dummy(id_byte: u8, price: u64) -> Self {
        let identity = crate::ChannelIdentity::dummy();
        Self {
            impression_id: ImpressionId(crate::Bytes32([id_byte; 32])),
            price: U256::from(price),
            supply_id: identity.supply,
            demand_id: identity.demand,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impression_serde_roundtrip() {
        let imp = Impression::dummy(3, 5);
        let json = serde_json::to_string(&imp).unwrap();
        let back: Impression = serde_json::from_str(&json).unwrap();
        assert_eq!(imp, back);
    }
}
