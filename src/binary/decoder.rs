//! Node decoder.
//!
//! Round-trips any output of the encoder; an unknown leading opcode or a
//! truncated buffer is a protocol error, never a panic.

use super::node::{AttrValue, Attrs, Node, NodeContent};
use super::tags;
use super::token;
use crate::error::{Error, Result};
use crate::types::Jid;

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decodes one node and requires the buffer to be fully consumed.
    pub fn decode(data: &[u8]) -> Result<Node> {
        let mut dec = Decoder::new(data);
        let node = dec.read_node()?;
        if dec.pos != dec.data.len() {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after node",
                dec.data.len() - dec.pos
            )));
        }
        Ok(node)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Protocol("unexpected end of node data".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::Protocol("unexpected end of node data".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_uint(&mut self, n: usize) -> Result<usize> {
        let mut out = 0usize;
        for _ in 0..n {
            out = (out << 8) | self.read_byte()? as usize;
        }
        Ok(out)
    }

    fn read_node(&mut self) -> Result<Node> {
        let opcode = self.read_byte()?;
        let size = self.read_list_size(opcode)?;
        if size == 0 {
            return Err(Error::Protocol("empty list where node expected".into()));
        }

        let tag_opcode = self.read_byte()?;
        let tag = self.read_string(tag_opcode)?;

        let mut attrs = Attrs::new();
        for _ in 0..(size - 1) / 2 {
            let key_opcode = self.read_byte()?;
            let key = self.read_string(key_opcode)?;
            let value = self.read_attr_value()?;
            attrs.insert(key, value);
        }

        let content = if (size - 1) % 2 == 1 {
            self.read_content()?
        } else {
            NodeContent::None
        };

        Ok(Node { tag, attrs, content })
    }

    fn read_content(&mut self) -> Result<NodeContent> {
        let opcode = self.read_byte()?;
        match opcode {
            tags::LIST_EMPTY | tags::LIST_8 | tags::LIST_16 => {
                let len = self.read_list_size(opcode)?;
                let mut children = Vec::with_capacity(len);
                for _ in 0..len {
                    children.push(self.read_node()?);
                }
                Ok(NodeContent::Children(children))
            }
            tags::BINARY_8 | tags::BINARY_20 | tags::BINARY_32 => {
                let len = self.read_binary_len(opcode)?;
                Ok(NodeContent::Bytes(self.read_bytes(len)?.to_vec()))
            }
            other => {
                // Token or packed string content arrives as bytes.
                let s = self.read_string(other)?;
                Ok(NodeContent::Bytes(s.into_bytes()))
            }
        }
    }

    fn read_attr_value(&mut self) -> Result<AttrValue> {
        let opcode = self.read_byte()?;
        match opcode {
            tags::JID_PAIR | tags::COMPANION_JID => Ok(AttrValue::Jid(self.read_jid(opcode)?)),
            other => Ok(AttrValue::String(self.read_string(other)?)),
        }
    }

    fn read_list_size(&mut self, opcode: u8) -> Result<usize> {
        match opcode {
            tags::LIST_EMPTY => Ok(0),
            tags::LIST_8 => Ok(self.read_byte()? as usize),
            tags::LIST_16 => self.read_uint(2),
            other => Err(Error::Protocol(format!("invalid list opcode 0x{other:02x}"))),
        }
    }

    fn read_binary_len(&mut self, opcode: u8) -> Result<usize> {
        match opcode {
            tags::BINARY_8 => Ok(self.read_byte()? as usize),
            tags::BINARY_20 => {
                let len = self.read_uint(3)?;
                Ok(len & 0x000F_FFFF)
            }
            tags::BINARY_32 => self.read_uint(4),
            other => Err(Error::Protocol(format!("invalid binary opcode 0x{other:02x}"))),
        }
    }

    fn read_string(&mut self, opcode: u8) -> Result<String> {
        match opcode {
            tags::BINARY_8 | tags::BINARY_20 | tags::BINARY_32 => {
                let len = self.read_binary_len(opcode)?;
                String::from_utf8(self.read_bytes(len)?.to_vec())
                    .map_err(|e| Error::Protocol(format!("invalid utf-8 string: {e}")))
            }
            tags::NIBBLE_8 => self.read_packed(unpack_nibble),
            tags::HEX_8 => self.read_packed(unpack_hex),
            tags::DICTIONARY_0..=tags::DICTIONARY_3 => {
                let dict = opcode - tags::DICTIONARY_0;
                let index = self.read_byte()?;
                token::double(dict, index).map(str::to_string).ok_or_else(|| {
                    Error::Protocol(format!("unknown dictionary token {dict}/{index}"))
                })
            }
            index if index < tags::DICTIONARY_0 => token::single(index)
                .map(str::to_string)
                .ok_or_else(|| Error::Protocol(format!("unknown token {index}"))),
            other => Err(Error::Protocol(format!("unknown string opcode 0x{other:02x}"))),
        }
    }

    fn read_packed(&mut self, unpack: fn(u8) -> Result<char>) -> Result<String> {
        let header = self.read_byte()?;
        let byte_count = (header & 0x7F) as usize;
        let mut out = String::with_capacity(byte_count * 2);
        for _ in 0..byte_count {
            let b = self.read_byte()?;
            out.push(unpack(b >> 4)?);
            out.push(unpack(b & 0x0F)?);
        }
        if header & 0x80 != 0 {
            out.pop();
        }
        Ok(out)
    }

    fn read_jid(&mut self, opcode: u8) -> Result<Jid> {
        match opcode {
            tags::JID_PAIR => {
                let user_opcode = self.read_byte()?;
                let user = if user_opcode == tags::LIST_EMPTY {
                    String::new()
                } else {
                    self.read_string(user_opcode)?
                };
                let server_opcode = self.read_byte()?;
                let server = self.read_string(server_opcode)?;
                Ok(Jid::new(user, server))
            }
            tags::COMPANION_JID => {
                let agent = self.read_byte()?;
                let device = self.read_byte()?;
                let user_opcode = self.read_byte()?;
                let user = self.read_string(user_opcode)?;
                Ok(Jid {
                    user,
                    agent,
                    device: device as u16,
                    server: crate::types::server::WHATSAPP.to_string(),
                })
            }
            other => Err(Error::Protocol(format!("invalid jid opcode 0x{other:02x}"))),
        }
    }
}

fn unpack_nibble(n: u8) -> Result<char> {
    match n {
        0..=9 => Ok((b'0' + n) as char),
        10 => Ok('-'),
        11 => Ok('.'),
        15 => Ok('\0'),
        other => Err(Error::Protocol(format!("invalid nibble value {other}"))),
    }
}

fn unpack_hex(n: u8) -> Result<char> {
    match n {
        0..=9 => Ok((b'0' + n) as char),
        10..=15 => Ok((b'A' + n - 10) as char),
        _ => unreachable!("nibble is four bits"),
    }
}
