//! Signal protocol addressing.

use std::fmt;

use crate::types::Jid;

/// Address of one remote device: `(user, device_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalAddress {
    name: String,
    device_id: u32,
}

impl SignalAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl From<&Jid> for SignalAddress {
    fn from(jid: &Jid) -> Self {
        let name = if jid.agent != 0 {
            format!("{}_{}", jid.user, jid.agent)
        } else {
            jid.user.clone()
        };
        Self::new(name, jid.device as u32)
    }
}

impl fmt::Display for SignalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}
