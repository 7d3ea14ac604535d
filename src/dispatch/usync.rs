//! Device discovery and session bundle queries.

use crate::binary::Node;
use crate::crypto::strip_key_prefix;
use crate::error::{Error, Result};
use crate::signal::PreKeyBundle;
use crate::types::Jid;

/// `<usync>` query enumerating the devices of the given users.
pub fn build_device_query(recipients: &[Jid], sid: &str) -> Node {
    let users = recipients
        .iter()
        .map(|jid| Node::new("user").attr("jid", jid.to_primary()))
        .collect();
    Node::new("iq")
        .attr("type", "get")
        .attr("xmlns", "usync")
        .child(
            Node::new("usync")
                .attr("sid", sid)
                .attr("mode", "query")
                .attr("last", "true")
                .attr("index", "0")
                .attr("context", "message")
                .child(Node::new("query").child(Node::new("devices").attr("version", "2")))
                .child(Node::new("list").children(users)),
        )
}

/// Extracts device JIDs from a `<usync>` reply.
///
/// Our own sending device is always skipped; primaries (device 0) are
/// included only when `exclude_self` is false; companion devices must
/// advertise a key index.
pub fn parse_device_list(reply: &Node, own_jid: &Jid, exclude_self: bool) -> Vec<Jid> {
    let mut devices = Vec::new();
    for usync in reply.find_children("usync") {
        let Some(list) = usync.find_child("list") else {
            continue;
        };
        for user in list.find_children("user") {
            let Some(jid) = user.attr_jid("jid") else {
                continue;
            };
            let Some(device_list) = user.find_path(&["devices", "device-list"]) else {
                continue;
            };
            for device in device_list.find_children("device") {
                let Some(id) = device.attr_int("id") else {
                    continue;
                };
                let id = id as u16;
                if exclude_self && id == 0 {
                    continue;
                }
                if jid.user == own_jid.user && own_jid.device == id {
                    continue;
                }
                if id != 0 && device.attrs.get("key-index").is_none() {
                    continue;
                }
                devices.push(Jid::device(jid.user.clone(), id));
            }
        }
    }
    devices
}

/// `<iq type="get" xmlns="encrypt">` fetching prekey bundles for the
/// addresses without sessions.
pub fn build_session_query(jids: &[Jid]) -> Node {
    let users = jids
        .iter()
        .map(|jid| Node::new("user").attr("jid", jid.clone()))
        .collect();
    Node::new("iq")
        .attr("type", "get")
        .attr("xmlns", "encrypt")
        .child(Node::new("key").children(users))
}

/// Parses the bundles out of an `encrypt` reply.
pub fn parse_prekey_bundles(reply: &Node) -> Result<Vec<(Jid, PreKeyBundle)>> {
    let list = reply
        .find_child("list")
        .ok_or_else(|| Error::Protocol("bundle reply missing list".into()))?;
    let mut bundles = Vec::new();
    for user in list.find_children("user") {
        if user.has_child("error") {
            return Err(Error::Protocol("erroneous session node".into()));
        }
        let jid = user
            .attr_jid("jid")
            .ok_or_else(|| Error::Protocol("bundle user missing jid".into()))?;

        let registration_id = user
            .find_child("registration")
            .and_then(Node::content_bytes)
            .filter(|b| b.len() == 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| Error::Protocol("bundle missing registration id".into()))?;

        let identity = user
            .find_child("identity")
            .and_then(Node::content_bytes)
            .and_then(strip_key_prefix)
            .ok_or_else(|| Error::Protocol("bundle missing identity".into()))?;

        let (signed_pre_key_id, signed_pre_key, signature) = parse_signed_key(
            user.find_child("skey")
                .ok_or_else(|| Error::Protocol("bundle missing skey".into()))?,
        )?;
        let signature =
            signature.ok_or_else(|| Error::Protocol("signed prekey missing signature".into()))?;

        let pre_key = match user.find_child("key") {
            Some(node) => {
                let (id, public, _) = parse_signed_key(node)?;
                Some((id, public))
            }
            None => None,
        };

        bundles.push((
            jid,
            PreKeyBundle {
                registration_id,
                identity,
                signed_pre_key_id,
                signed_pre_key,
                signed_pre_key_signature: signature,
                pre_key,
            },
        ));
    }
    Ok(bundles)
}

fn parse_signed_key(node: &Node) -> Result<(u32, [u8; 32], Option<[u8; 64]>)> {
    let id = node
        .find_child("id")
        .and_then(Node::content_bytes)
        .filter(|b| b.len() == 3)
        .map(|b| u32::from_be_bytes([0, b[0], b[1], b[2]]))
        .ok_or_else(|| Error::Protocol("key node missing id".into()))?;
    let public = node
        .find_child("value")
        .and_then(Node::content_bytes)
        .and_then(strip_key_prefix)
        .ok_or_else(|| Error::Protocol("key node missing value".into()))?;
    let signature = node
        .find_child("signature")
        .and_then(Node::content_bytes)
        .and_then(|b| <[u8; 64]>::try_from(b).ok());
    Ok((id, public, signature))
}
