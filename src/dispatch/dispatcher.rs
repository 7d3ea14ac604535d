//! Inbound node routing.
//!
//! The reader task hands every decoded node here. Nothing in this module
//! blocks: messages go to the serial message queue, iq replies complete
//! their waiters, everything else turns into an event plus the `<ack>`
//! the server expects.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::binary::Node;
use crate::dispatch::router::RequestRouter;
use crate::dispatch::Context;
use crate::types::{DisconnectReason, Event, Jid, ReceiptEvent, ReceiptType, SharedSink};

pub struct Dispatcher {
    router: Arc<RequestRouter>,
    ctx: Arc<dyn Context>,
    sink: SharedSink,
    message_tx: mpsc::UnboundedSender<Node>,
}

impl Dispatcher {
    pub fn new(
        router: Arc<RequestRouter>,
        ctx: Arc<dyn Context>,
        sink: SharedSink,
        message_tx: mpsc::UnboundedSender<Node>,
    ) -> Self {
        Self {
            router,
            ctx,
            sink,
            message_tx,
        }
    }

    /// Routes one decoded node.
    pub fn dispatch(&self, node: Node) {
        match node.tag.as_str() {
            "iq" => self.dispatch_iq(node),
            "message" => {
                if self.message_tx.send(node).is_err() {
                    warn!("message queue gone, dropping inbound message");
                }
            }
            "receipt" => {
                self.send_ack(&node);
                if let Some(event) = parse_receipt(&node) {
                    self.sink.on_event(Event::Receipt(event));
                }
            }
            "notification" => {
                self.send_ack(&node);
                let kind = node.attr_str("type").unwrap_or("unknown").to_string();
                self.sink.on_event(Event::Notification { kind });
            }
            "call" => {
                self.send_ack(&node);
                let from = node.attr_jid("from").unwrap_or_default();
                let id = node
                    .find_child("offer")
                    .and_then(|o| o.attr_str("call-id"))
                    .or(node.attr_str("id"))
                    .unwrap_or_default()
                    .to_string();
                self.sink.on_event(Event::Call { from, id });
            }
            // never ack an ack
            "ack" => debug!(id = node.attr_str("id"), "server ack"),
            "success" => self.sink.on_event(Event::Connected { resumed: false }),
            "failure" => {
                let reason = node.attr_str("reason").unwrap_or("unknown").to_string();
                self.sink
                    .on_event(Event::Disconnected(DisconnectReason::StreamError(reason)));
            }
            "stream:error" => {
                let code = node.attr_str("code").unwrap_or("unknown").to_string();
                self.sink
                    .on_event(Event::Disconnected(DisconnectReason::StreamError(code)));
            }
            other => debug!(tag = other, "dropping unhandled node"),
        }
    }

    fn dispatch_iq(&self, node: Node) {
        let Some(id) = node.attr_str("id") else {
            warn!("iq without id");
            return;
        };
        if !self.router.complete(id, node.clone()) {
            debug!(id, "iq reply without matching waiter");
        }
    }

    fn send_ack(&self, node: &Node) {
        let Some(id) = node.attr_str("id") else {
            return;
        };
        let mut ack = Node::new("ack")
            .attr("id", id)
            .attr("class", node.tag.clone());
        if let Some(from) = node.attr_jid("from") {
            ack.set_attr("to", from);
        }
        if let Some(participant) = node.attr_str("participant") {
            ack.set_attr("participant", participant);
        }
        if let Some(receipt_type) = node.attr_str("type") {
            ack.set_attr("type", receipt_type);
        }
        if let Err(e) = self.ctx.send_node(ack) {
            warn!(error = %e, "failed to ack node");
        }
    }
}

fn parse_receipt(node: &Node) -> Option<ReceiptEvent> {
    let chat = node.attr_jid("from")?;
    let sender = node.attr_jid("participant").unwrap_or_else(|| chat.clone());
    let mut ids = vec![node.attr_str("id")?.to_string()];
    if let Some(list) = node.find_child("list") {
        ids.extend(
            list.find_children("item")
                .iter()
                .filter_map(|item| item.attr_str("id"))
                .map(str::to_string),
        );
    }
    Some(ReceiptEvent {
        message_ids: ids,
        chat,
        sender,
        receipt_type: ReceiptType::from_attr(node.attr_str("type")),
        timestamp: node.attr_int("t").unwrap_or(0) as u64,
    })
}

/// Builds the receipt we owe for every inbound message, decryptable or
/// not.
pub fn build_receipt(
    id: &str,
    chat: &Jid,
    participant: Option<&Jid>,
    receipt_type: ReceiptType,
) -> Node {
    let mut node = Node::new("receipt").attr("id", id).attr("to", chat.clone());
    if let Some(p) = participant {
        node.set_attr("participant", p.clone());
    }
    if let Some(attr) = receipt_type.as_attr() {
        node.set_attr("type", attr);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::store::BoxFuture;
    use crate::types::EventSink;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Captured {
        nodes: Mutex<Vec<Node>>,
        events: Mutex<Vec<Event>>,
    }

    impl Context for Captured {
        fn send_iq(&self, _node: Node) -> BoxFuture<'_, Result<Node>> {
            Box::pin(async { Ok(Node::new("iq")) })
        }

        fn send_node(&self, node: Node) -> Result<()> {
            self.nodes.lock().unwrap().push(node);
            Ok(())
        }
    }

    impl EventSink for Captured {
        fn on_event(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn harness() -> (Arc<Captured>, Dispatcher, mpsc::UnboundedReceiver<Node>, Arc<RequestRouter>) {
        let captured = Arc::new(Captured::default());
        let router = Arc::new(RequestRouter::new(Duration::from_secs(1)));
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(router.clone(), captured.clone(), captured.clone(), tx);
        (captured, dispatcher, rx, router)
    }

    #[tokio::test]
    async fn iq_completes_waiter() {
        let (_cap, dispatcher, _rx, router) = harness();
        let waiter = router.register("AA11");
        dispatcher.dispatch(Node::new("iq").attr("id", "AA11").attr("type", "result"));
        let reply = router.wait("AA11", waiter).await.unwrap();
        assert_eq!(reply.attr_str("type"), Some("result"));
    }

    #[tokio::test]
    async fn message_goes_to_queue() {
        let (_cap, dispatcher, mut rx, _router) = harness();
        dispatcher.dispatch(Node::new("message").attr("id", "M1"));
        assert_eq!(rx.recv().await.unwrap().attr_str("id"), Some("M1"));
    }

    #[tokio::test]
    async fn receipt_is_acked_and_reported() {
        let (cap, dispatcher, _rx, _router) = harness();
        dispatcher.dispatch(
            Node::new("receipt")
                .attr("id", "R1")
                .attr("from", Jid::new("peer", "s.whatsapp.net"))
                .attr("type", "read"),
        );
        let nodes = cap.nodes.lock().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].tag, "ack");
        assert_eq!(nodes[0].attr_str("class"), Some("receipt"));
        assert_eq!(nodes[0].attr_str("type"), Some("read"));

        let events = cap.events.lock().unwrap();
        assert!(matches!(
            &events[0],
            Event::Receipt(r) if r.receipt_type == ReceiptType::Read && r.message_ids == ["R1"]
        ));
    }

    #[tokio::test]
    async fn ack_is_never_acked() {
        let (cap, dispatcher, _rx, _router) = harness();
        dispatcher.dispatch(Node::new("ack").attr("id", "A1"));
        assert!(cap.nodes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_node_dropped() {
        let (cap, dispatcher, _rx, _router) = harness();
        dispatcher.dispatch(Node::new("mystery"));
        assert!(cap.nodes.lock().unwrap().is_empty());
        assert!(cap.events.lock().unwrap().is_empty());
    }

    #[test]
    fn receipt_builder_variants() {
        let chat = Jid::new("peer", "s.whatsapp.net");
        let plain = build_receipt("ID", &chat, None, ReceiptType::Delivered);
        assert!(plain.attr_str("type").is_none());
        let sender = build_receipt("ID", &chat, None, ReceiptType::Sender);
        assert_eq!(sender.attr_str("type"), Some("sender"));
    }
}
