use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::OverlayConfig;
use crate::link::frame::Frame;
use crate::link::receive_history::ReceiveHistory;
use crate::link::rtt_estimator::RttEstimator;
use crate::util::safe_converter::PrecheckedCast;

struct InFlight {
    sent_at: Instant,
    on_ack: oneshot::Sender<()>,
}

/// The sender and receiver bookkeeping of a single neighbor link. This is a plain state machine:
///  it does no I/O and takes the current time as a parameter, leaving the actual sending and
///  waiting to [crate::link::reliable_link::ReliableLink].
pub struct LinkState {
    sequence_modulus: u64,
    next_sequence: u32,
    last_acked_sequence: Option<u32>,
    rtt: RttEstimator,
    receive_history: ReceiveHistory,
    in_flight: FxHashMap<u32, InFlight>,
}

impl LinkState {
    pub fn new(config: &OverlayConfig) -> LinkState {
        LinkState {
            sequence_modulus: config.sequence_modulus,
            next_sequence: 0,
            last_acked_sequence: None,
            rtt: RttEstimator::new(config.initial_ack_timeout, config.min_ack_timeout, config.max_ack_timeout),
            receive_history: ReceiveHistory::new(config.receive_history_len, config.sequence_modulus),
            in_flight: Default::default(),
        }
    }

    /// Allocates the next sequence number and registers it as in flight. The returned receiver
    ///  completes when the frame is acknowledged, and it fails if the link gives up on the frame.
    pub fn register_send(&mut self, now: Instant) -> (u32, oneshot::Receiver<()>) {
        let sequence = self.next_sequence;
        self.next_sequence = ((sequence as u64 + 1) % self.sequence_modulus).prechecked_cast();

        let (on_ack, ack_receiver) = oneshot::channel();
        if self.in_flight.insert(sequence, InFlight { sent_at: now, on_ack }).is_some() {
            debug!("sequence number {} wrapped around while still in flight", sequence);
        }
        (sequence, ack_receiver)
    }

    /// Called when the ack for a frame did not arrive in time. Returns `false` if the frame was
    ///  acknowledged concurrently.
    pub fn on_ack_timeout(&mut self, sequence: u32) -> bool {
        self.in_flight.remove(&sequence).is_some()
    }

    /// Resolves all in-flight frames covered by an ack, returning the number of frames resolved.
    ///  Only the explicitly acknowledged frame yields an RTT sample: the timing of frames covered
    ///  by the selective bits is ambiguous.
    pub fn on_ack(&mut self, ack_sequence: u32, received_mask: u32, now: Instant) -> usize {
        let mut num_resolved = 0;

        if let Some(in_flight) = self.in_flight.remove(&ack_sequence) {
            let rtt = now.saturating_duration_since(in_flight.sent_at);
            self.rtt.on_sample(rtt);
            trace!("ack for frame {}: rtt {:?}, timeout now {:?}", ack_sequence, rtt, self.rtt.timeout());

            let _ = in_flight.on_ack.send(());
            self.last_acked_sequence = Some(ack_sequence);
            num_resolved += 1;
        }
        else {
            trace!("ack for frame {} that is not in flight", ack_sequence);
        }

        for i in 1..ReceiveHistory::MASK_BITS {
            if received_mask & (1 << i) == 0 {
                continue;
            }
            let sequence: u32 = ((ack_sequence as u64 + self.sequence_modulus - i as u64) % self.sequence_modulus).prechecked_cast();
            if let Some(in_flight) = self.in_flight.remove(&sequence) {
                trace!("selective ack for frame {}", sequence);
                let _ = in_flight.on_ack.send(());
                num_resolved += 1;
            }
        }
        num_resolved
    }

    /// Records a received data frame and returns the ack to send for it, and whether the frame
    ///  is new (as opposed to a duplicate that must not be delivered again)
    pub fn on_data(&mut self, sequence: u32) -> (Frame, bool) {
        let is_new = !self.receive_history.contains(sequence);
        let received_mask = self.receive_history.on_received(sequence);
        (Frame::Ack { ack_sequence: sequence, received_mask }, is_new)
    }

    /// Drops all in-flight frames, failing their pending sends
    pub fn close(&mut self) {
        self.in_flight.clear();
    }

    pub fn ack_timeout(&self) -> Duration {
        self.rtt.timeout()
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.rtt.smoothed_rtt()
    }

    pub fn rtt_variance(&self) -> Duration {
        self.rtt.rtt_variance()
    }

    pub fn last_acked_sequence(&self) -> Option<u32> {
        self.last_acked_sequence
    }

    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
