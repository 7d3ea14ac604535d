//! WhatsApp JIDs.
//!
//! A JID addresses a user, group or broadcast list. Primary JIDs have
//! `device == 0`; companion devices always carry `device > 0` and are the
//! unit of per-session encryption, while group participant lists reference
//! members by their primary JID.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Known JID servers.
pub mod server {
    /// Primary user server.
    pub const WHATSAPP: &str = "s.whatsapp.net";
    /// Group chats.
    pub const GROUP: &str = "g.us";
    /// Broadcast lists and the status feed.
    pub const BROADCAST: &str = "broadcast";
    /// Legacy user server.
    pub const USER: &str = "c.us";
    /// Hidden-user (companion-linked) server.
    pub const LID: &str = "lid";
}

/// A WhatsApp identity triple `(user, device, server)` plus the agent
/// discriminator used by AD-form JIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub agent: u8,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// A primary JID on the given server.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Default::default()
        }
    }

    /// A device JID on the primary user server.
    pub fn device(user: impl Into<String>, device: u16) -> Self {
        Self {
            user: user.into(),
            device,
            server: server::WHATSAPP.to_string(),
            ..Default::default()
        }
    }

    /// The status broadcast feed.
    pub fn status_broadcast() -> Self {
        Self::new("status", server::BROADCAST)
    }

    /// True when the server part is empty.
    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    pub fn is_group(&self) -> bool {
        self.server == server::GROUP
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == server::BROADCAST
    }

    /// True for the `status@broadcast` feed specifically.
    pub fn is_status(&self) -> bool {
        self.server == server::BROADCAST && self.user == "status"
    }

    /// True for 1:1 conversation targets.
    pub fn is_user(&self) -> bool {
        self.server == server::WHATSAPP || self.server == server::USER
    }

    /// True for companion devices (never the primary).
    pub fn is_companion_device(&self) -> bool {
        self.device > 0
    }

    /// Strips agent and device, yielding the primary JID.
    pub fn to_primary(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: if self.server == server::USER {
                server::WHATSAPP.to_string()
            } else {
                self.server.clone()
            },
            ..Default::default()
        }
    }

    /// True when both JIDs refer to the same account, ignoring device.
    pub fn same_user(&self, other: &Jid) -> bool {
        self.user == other.user
    }

    /// The address string used to key Signal sessions: `user.device` with
    /// the agent folded in for non-default servers.
    pub fn signal_address(&self) -> String {
        if self.agent != 0 {
            format!("{}_{}.{}", self.user, self.agent, self.device)
        } else {
            format!("{}.{}", self.user, self.device)
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agent > 0 {
            write!(f, "{}.{}:{}@{}", self.user, self.agent, self.device, self.server)
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error produced when a JID string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JidParseError(pub String);

impl fmt::Display for JidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid jid: {}", self.0)
    }
}

impl std::error::Error for JidParseError {}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, srv) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            None => return Ok(Jid::new("", s)),
        };

        let mut jid = Jid::new("", srv);

        // AD form: user.agent:device@server, device form: user:device@server.
        if let Some((user, ad)) = user_part.split_once('.') {
            jid.user = user.to_string();
            let (agent, device) = match ad.split_once(':') {
                Some((a, d)) => (a, Some(d)),
                None => (ad, None),
            };
            jid.agent = agent
                .parse()
                .map_err(|_| JidParseError(format!("bad agent in {s:?}")))?;
            if let Some(device) = device {
                jid.device = device
                    .parse()
                    .map_err(|_| JidParseError(format!("bad device in {s:?}")))?;
            }
        } else if let Some((user, device)) = user_part.split_once(':') {
            jid.user = user.to_string();
            jid.device = device
                .parse()
                .map_err(|_| JidParseError(format!("bad device in {s:?}")))?;
        } else {
            jid.user = user_part.to_string();
        }

        Ok(jid)
    }
}
