//! Noise handshake and client payload protobufs.
//!
//! Field tags must match the deployed schema byte for byte; they are the
//! wire contract of the handshake.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct HandshakeMessage {
    #[prost(message, optional, tag = "2")]
    pub client_hello: Option<ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: Option<ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: Option<ClientFinish>,
}

impl HandshakeMessage {
    pub fn hello(ephemeral: [u8; 32]) -> Self {
        Self {
            client_hello: Some(ClientHello {
                ephemeral: Some(ephemeral.to_vec()),
            }),
            server_hello: None,
            client_finish: None,
        }
    }

    pub fn finish(static_ciphertext: Vec<u8>, payload_ciphertext: Vec<u8>) -> Self {
        Self {
            client_hello: None,
            server_hello: None,
            client_finish: Some(ClientFinish {
                r#static: Some(static_ciphertext),
                payload: Some(payload_ciphertext),
            }),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(bytes, optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerHello {
    #[prost(bytes, optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientFinish {
    #[prost(bytes, optional, tag = "1")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
}

/// User identity payload carried encrypted inside `ClientFinish`.
#[derive(Clone, PartialEq, Message)]
pub struct ClientPayload {
    /// Phone number of a registered session (resume path).
    #[prost(uint64, optional, tag = "1")]
    pub username: Option<u64>,
    #[prost(bool, optional, tag = "3")]
    pub passive: Option<bool>,
    #[prost(message, optional, tag = "5")]
    pub user_agent: Option<UserAgent>,
    #[prost(message, optional, tag = "6")]
    pub web_info: Option<WebInfo>,
    #[prost(string, optional, tag = "7")]
    pub push_name: Option<String>,
    #[prost(int32, optional, tag = "9")]
    pub session_id: Option<i32>,
    #[prost(bool, optional, tag = "10")]
    pub short_connect: Option<bool>,
    #[prost(int32, optional, tag = "12")]
    pub connect_type: Option<i32>,
    #[prost(int32, optional, tag = "13")]
    pub connect_reason: Option<i32>,
    /// Device id of a registered session (resume path).
    #[prost(uint32, optional, tag = "18")]
    pub device: Option<u32>,
    /// Registration bundle of an unregistered session.
    #[prost(message, optional, tag = "19")]
    pub device_pairing_data: Option<DevicePairingData>,
    #[prost(uint32, optional, tag = "16")]
    pub connect_attempt_count: Option<u32>,
    #[prost(bool, optional, tag = "23")]
    pub oc: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UserAgent {
    #[prost(int32, optional, tag = "1")]
    pub platform: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub app_version: Option<AppVersion>,
    #[prost(int32, optional, tag = "3")]
    pub release_channel: Option<i32>,
    #[prost(string, optional, tag = "4")]
    pub mcc: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub os_version: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub device: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub lc: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub locale: Option<String>,
    #[prost(string, optional, tag = "15")]
    pub manufacturer: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppVersion {
    #[prost(uint32, optional, tag = "1")]
    pub primary: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub secondary: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub tertiary: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WebInfo {
    #[prost(string, optional, tag = "2")]
    pub version: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub web_sub_platform: Option<i32>,
}

/// Registration bundle advertised by an unregistered client.
#[derive(Clone, PartialEq, Message)]
pub struct DevicePairingData {
    #[prost(bytes, optional, tag = "1")]
    pub e_regid: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub e_keytype: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub e_ident: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub e_skey_id: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "5")]
    pub e_skey_val: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "6")]
    pub e_skey_sig: Option<Vec<u8>>,
}

pub mod platform {
    pub const ANDROID: i32 = 0;
    pub const IOS: i32 = 1;
    pub const WEB: i32 = 14;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trip() {
        let msg = HandshakeMessage::hello([7u8; 32]);
        let bytes = msg.encode_to_vec();
        let back = HandshakeMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.client_hello.unwrap().ephemeral.unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn hello_wire_layout() {
        // client_hello is tag 2 (field header 0x12); ephemeral is tag 1
        // inside (0x0a). Pinning the outer bytes guards the wire contract.
        let bytes = HandshakeMessage::hello([0u8; 32]).encode_to_vec();
        assert_eq!(bytes[0], 0x12);
        assert_eq!(bytes[2], 0x0a);
        assert_eq!(bytes[3], 32);
    }

    #[test]
    fn server_hello_round_trip() {
        let msg = HandshakeMessage {
            client_hello: None,
            server_hello: Some(ServerHello {
                ephemeral: Some(vec![1; 32]),
                r#static: Some(vec![2; 48]),
                payload: Some(vec![3; 64]),
            }),
            client_finish: None,
        };
        let back = HandshakeMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(back, msg);
    }
}
