pub mod end_point;
pub mod frame;
pub mod frame_sink;
pub mod link_state;
pub mod message_dispatcher;
pub mod receive_history;
pub mod reliable_link;
pub mod rtt_estimator;
