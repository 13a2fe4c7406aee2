pub mod connection;
pub mod correlator;
pub mod inbound_dispatcher;
pub mod router;
pub mod routing_table;
