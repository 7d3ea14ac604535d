//! Local device identity.

use rand::Rng;

use crate::crypto::{KeyPair, SignedPreKey};
use crate::proto::handshake::DevicePairingData;
use crate::types::Jid;

/// Keys and identity of this client instance.
#[derive(Clone)]
pub struct Device {
    /// Noise static key pair, pinned by the server at registration.
    pub noise_key: KeyPair,
    /// Long-term Signal identity.
    pub identity_key: KeyPair,
    /// Current signed prekey.
    pub signed_pre_key: SignedPreKey,
    /// 14-bit registration id.
    pub registration_id: u32,
    /// Account JID once registered.
    pub jid: Option<Jid>,
    pub push_name: Option<String>,
    pub platform: String,
}

impl Device {
    /// Fresh device with newly generated key material.
    pub fn generate() -> Self {
        let identity_key = KeyPair::generate();
        let signed_pre_key = SignedPreKey::generate(1, &identity_key);
        Self {
            noise_key: KeyPair::generate(),
            identity_key,
            signed_pre_key,
            registration_id: rand::thread_rng().gen_range(1..0x3FFF),
            jid: None,
            push_name: None,
            platform: "web".to_string(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.jid.is_some()
    }

    /// Registration bundle advertised in the handshake payload of an
    /// unregistered client.
    pub fn pairing_data(&self) -> DevicePairingData {
        let spk_id = self.signed_pre_key.id;
        DevicePairingData {
            e_regid: Some(self.registration_id.to_be_bytes().to_vec()),
            e_keytype: Some(vec![crate::crypto::KEY_TYPE_DJB]),
            e_ident: Some(self.identity_key.public_with_prefix().to_vec()),
            e_skey_id: Some(vec![
                (spk_id >> 16) as u8,
                (spk_id >> 8) as u8,
                spk_id as u8,
            ]),
            e_skey_val: Some(self.signed_pre_key.key_pair.public_with_prefix().to_vec()),
            e_skey_sig: Some(self.signed_pre_key.signature.to_vec()),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("jid", &self.jid)
            .field("registration_id", &self.registration_id)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}
