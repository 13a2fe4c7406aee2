pub mod forwarding_header;
pub mod forwarding_option;
pub mod fragmentation;
pub mod message;
pub mod message_builder;
pub mod routable_id;
