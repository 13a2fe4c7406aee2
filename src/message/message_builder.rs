use std::sync::Arc;

use bytes::Bytes;

use crate::config::OverlayConfig;
use crate::message::forwarding_header::ForwardingHeader;
use crate::message::forwarding_option::ForwardingOption;
use crate::message::message::{Content, Message, MessageCode};
use crate::message::routable_id::RoutableId;

/// Creates outbound messages with header fields populated from the overlay's configuration
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    config: Arc<OverlayConfig>,
}

impl MessageBuilder {
    pub fn new(config: Arc<OverlayConfig>) -> MessageBuilder {
        MessageBuilder { config }
    }

    fn header(&self, transaction_id: u64, destination_list: Vec<RoutableId>, forwarding_options: Vec<ForwardingOption>) -> ForwardingHeader {
        ForwardingHeader {
            overlay_hash: self.config.overlay_hash,
            config_sequence: self.config.config_sequence,
            version: self.config.protocol_version,
            ttl: self.config.initial_ttl,
            is_last_fragment: true,
            fragment_offset: 0,
            transaction_id,
            max_response_length: 0,
            via_list: Vec::new(),
            destination_list,
            forwarding_options,
        }
    }

    /// Builds a request. A transaction id of 0 leaves it to the correlator to pick one.
    pub fn request(&self, destination: impl Into<RoutableId>, content: Content) -> Message {
        self.request_with_options(vec![destination.into()], content, Vec::new())
    }

    pub fn request_with_options(&self, destination_list: Vec<RoutableId>, content: Content, forwarding_options: Vec<ForwardingOption>) -> Message {
        Message {
            header: self.header(0, destination_list, forwarding_options),
            content,
            security_block: Bytes::new(),
        }
    }

    /// Builds the answer to a received request: it travels back along the request's via list
    ///  and carries the request's transaction id.
    pub fn answer_for(&self, request: &Message, body: impl Into<Bytes>) -> Message {
        let destination_list = request.header.via_list.iter()
            .rev()
            .cloned()
            .collect();

        Message {
            header: self.header(request.header.transaction_id, destination_list, Vec::new()),
            content: Content::new(request.content.message_code.answer_code(), body),
            security_block: Bytes::new(),
        }
    }

    pub fn error_answer_for(&self, request: &Message, body: impl Into<Bytes>) -> Message {
        let mut answer = self.answer_for(request, body);
        answer.content.message_code = MessageCode::ERROR;
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::node::{test_bind_addr, test_node_id_from_number, test_resource_id_from_number};

    fn builder() -> MessageBuilder {
        let mut config = OverlayConfig::new(test_node_id_from_number(1), "overlay", test_bind_addr());
        config.config_sequence = 3;
        MessageBuilder::new(Arc::new(config))
    }

    #[test]
    fn test_request() {
        let msg = builder().request(test_resource_id_from_number(7), Content::new(MessageCode(21), b"fetch".to_vec()));

        assert_eq!(msg.header.overlay_hash, OverlayConfig::hash_overlay_name("overlay"));
        assert_eq!(msg.header.config_sequence, 3);
        assert_eq!(msg.header.version, 0x0a);
        assert_eq!(msg.header.ttl, 100);
        assert!(!msg.header.is_fragment());
        assert_eq!(msg.header.transaction_id, 0);
        assert!(msg.header.via_list.is_empty());
        assert_eq!(msg.header.destination_list, vec![RoutableId::from(test_resource_id_from_number(7))]);
        assert!(msg.is_request());
    }

    #[test]
    fn test_answer_for() {
        let b = builder();
        let mut request = b.request(test_resource_id_from_number(7), Content::new(MessageCode(21), Bytes::new()));
        request.header.transaction_id = 42;
        request.header.via_list = vec![
            test_node_id_from_number(5).into(),
            test_node_id_from_number(6).into(),
        ];

        let answer = b.answer_for(&request, b"value".to_vec());
        assert_eq!(answer.header.transaction_id, 42);
        assert_eq!(answer.header.destination_list, vec![
            RoutableId::from(test_node_id_from_number(6)),
            RoutableId::from(test_node_id_from_number(5)),
        ]);
        assert!(answer.header.via_list.is_empty());
        assert_eq!(answer.content.message_code, MessageCode(22));
        assert_eq!(answer.content.body, Bytes::from_static(b"value"));
        assert!(answer.is_answer());

        let error = b.error_answer_for(&request, Bytes::new());
        assert!(error.content.message_code.is_error());
        assert!(error.is_answer());
    }
}
