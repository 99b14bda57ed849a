pub mod curve;

use std::fmt;

use serde::{Deserialize, Serialize};

pub type DeviceId = u32;

/// Address of a single peer device: a stable user identifier plus a device id.
///
/// Sessions, key bundles and per-peer locks are all keyed by this address.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    user: String,
    device_id: DeviceId,
}

impl PeerAddress {
    pub fn new(user: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            user: user.into(),
            device_id,
        }
    }

    #[inline]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[inline]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.user, self.device_id)
    }
}
