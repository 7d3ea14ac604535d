//! The `Node` wire unit.
//!
//! Nodes are tagged trees with scalar attributes and optional content
//! (bytes or child nodes). Attribute order is preserved so that encoding
//! is deterministic; equality is structural with byte-wise content
//! comparison.

use crate::types::Jid;

/// Attribute scalar values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Bool(bool),
    Jid(Jid),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<u64> for AttrValue {
    fn from(n: u64) -> Self {
        AttrValue::Int(n as i64)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<Jid> for AttrValue {
    fn from(jid: Jid) -> Self {
        AttrValue::Jid(jid)
    }
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_jid(&self) -> Option<&Jid> {
        match self {
            AttrValue::Jid(jid) => Some(jid),
            _ => None,
        }
    }

    /// The string rendered onto the wire for non-JID values.
    pub fn wire_string(&self) -> String {
        match self {
            AttrValue::String(s) => s.clone(),
            AttrValue::Int(n) => n.to_string(),
            AttrValue::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
            AttrValue::Jid(jid) => jid.to_string(),
        }
    }
}

/// Insertion-ordered attribute map. The protocol never carries duplicate
/// keys, and preserving order keeps the encoder deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs(Vec<(String, AttrValue)>);

impl Attrs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Node content: nothing, raw bytes, or child nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeContent {
    #[default]
    None,
    Bytes(Vec<u8>),
    Children(Vec<Node>),
}

/// A binary-XML element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: NodeContent,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            content: NodeContent::None,
        }
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key, value);
        self
    }

    /// Builder-style child append.
    pub fn child(mut self, node: Node) -> Self {
        self.push_child(node);
        self
    }

    /// Builder-style children replacement.
    pub fn children(mut self, nodes: Vec<Node>) -> Self {
        self.content = NodeContent::Children(nodes);
        self
    }

    /// Builder-style byte content.
    pub fn bytes(mut self, data: Vec<u8>) -> Self {
        self.content = NodeContent::Bytes(data);
        self
    }

    pub fn push_child(&mut self, node: Node) {
        match &mut self.content {
            NodeContent::Children(children) => children.push(node),
            _ => self.content = NodeContent::Children(vec![node]),
        }
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key, value);
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_str)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).and_then(|v| v.as_int())
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attrs.get(key).and_then(|v| v.as_bool())
    }

    /// JID attribute, whether encoded as a JID or as a plain string.
    pub fn attr_jid(&self, key: &str) -> Option<Jid> {
        match self.attrs.get(key)? {
            AttrValue::Jid(jid) => Some(jid.clone()),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn child_nodes(&self) -> &[Node] {
        match &self.content {
            NodeContent::Children(children) => children,
            _ => &[],
        }
    }

    /// First child with the given tag.
    pub fn find_child(&self, tag: &str) -> Option<&Node> {
        self.child_nodes().iter().find(|n| n.tag == tag)
    }

    /// All children with the given tag.
    pub fn find_children(&self, tag: &str) -> Vec<&Node> {
        self.child_nodes().iter().filter(|n| n.tag == tag).collect()
    }

    /// Walks a nested tag path.
    pub fn find_path(&self, tags: &[&str]) -> Option<&Node> {
        let mut current = self;
        for tag in tags {
            current = current.find_child(tag)?;
        }
        Some(current)
    }

    pub fn has_child(&self, tag: &str) -> bool {
        self.find_child(tag).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_order_preserved() {
        let node = Node::new("iq")
            .attr("id", "abc")
            .attr("type", "get")
            .attr("xmlns", "w:p");
        let keys: Vec<&str> = node.attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["id", "type", "xmlns"]);
    }

    #[test]
    fn attr_overwrite_keeps_slot() {
        let mut attrs = Attrs::new();
        attrs.insert("a", "1");
        attrs.insert("b", "2");
        attrs.insert("a", "3");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("a").unwrap().as_str(), Some("3"));
    }

    #[test]
    fn child_lookup() {
        let node = Node::new("message")
            .child(Node::new("enc").attr("type", "pkmsg"))
            .child(Node::new("enc").attr("type", "skmsg"))
            .child(Node::new("device-identity"));
        assert_eq!(node.find_children("enc").len(), 2);
        assert!(node.has_child("device-identity"));
        assert!(node.find_child("body").is_none());
    }

    #[test]
    fn path_walk() {
        let node = Node::new("iq").child(
            Node::new("sync").child(Node::new("collection").attr("name", "regular")),
        );
        let collection = node.find_path(&["sync", "collection"]).unwrap();
        assert_eq!(collection.attr_str("name"), Some("regular"));
    }

    #[test]
    fn typed_attrs() {
        let node = Node::new("receipt")
            .attr("t", 1234i64)
            .attr("offline", true)
            .attr("from", Jid::device("123", 2));
        assert_eq!(node.attr_int("t"), Some(1234));
        assert_eq!(node.attr_bool("offline"), Some(true));
        assert_eq!(node.attr_jid("from").unwrap().device, 2);
    }
}
