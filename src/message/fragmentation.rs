use std::collections::BTreeMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::CodecError;
use crate::message::forwarding_header::HeaderCodec;
use crate::message::message::RawMessage;
use crate::message::routable_id::NodeId;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// Splits messages that exceed a link's size limit into fragments. All fragments share the
///  original message's header except for the fragmentation fields.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    header_codec: HeaderCodec,
    safety_margin: usize,
}

impl Fragmenter {
    pub fn new(header_codec: HeaderCodec, safety_margin: usize) -> Fragmenter {
        Fragmenter {
            header_codec,
            safety_margin,
        }
    }

    /// Returns the message unchanged if its encoded size fits into `max_size`, and a list of
    ///  fragments otherwise.
    pub fn split(&self, raw: &RawMessage, max_size: usize) -> Result<Vec<RawMessage>, CodecError> {
        let header_len = self.header_codec.encoded_len(&raw.header)?;
        let total_len = header_len + raw.payload.len();
        if total_len <= max_size {
            return Ok(vec![raw.clone()]);
        }

        let chunk_size = max_size.saturating_sub(header_len + self.safety_margin);
        if chunk_size == 0 {
            return Err(CodecError::MessageTooLarge { size: total_len, max: max_size });
        }

        let num_chunks = raw.payload.len().div_ceil(chunk_size);
        let last_offset = (num_chunks - 1) * chunk_size;
        if last_offset > u16::MAX as usize {
            return Err(CodecError::FragmentOffsetOverflow(last_offset));
        }

        trace!("splitting message {} of {} bytes into {} fragments", raw.header.transaction_id, total_len, num_chunks);

        let mut result = Vec::with_capacity(num_chunks);
        let mut offset = 0;
        while offset < raw.payload.len() {
            let end = (offset + chunk_size).min(raw.payload.len());

            let mut header = raw.header.clone();
            header.fragment_offset = offset.prechecked_cast();
            header.is_last_fragment = end == raw.payload.len();

            result.push(RawMessage {
                header,
                invalid_token: raw.invalid_token,
                payload: raw.payload.slice(offset..end),
            });
            offset = end;
        }
        Ok(result)
    }
}

struct PartialMessage {
    first: RawMessage,
    fragments: BTreeMap<usize, Bytes>,
    /// known once the last fragment arrived
    total_len: Option<usize>,
    last_activity: Instant,
}

impl PartialMessage {
    fn add(&mut self, offset: usize, data: Bytes) {
        let is_longer = self.fragments.get(&offset)
            .map_or(true, |existing| existing.len() < data.len());
        if is_longer {
            self.fragments.insert(offset, data);
        }
    }

    /// the end of the furthest fragment received so far
    fn received_end(&self) -> usize {
        self.fragments.iter()
            .map(|(offset, data)| offset + data.len())
            .max()
            .unwrap_or(0)
    }

    /// the number of gap-free bytes from offset 0
    fn contiguous_len(&self) -> usize {
        let mut covered = 0;
        for (&offset, data) in &self.fragments {
            if offset > covered {
                break;
            }
            covered = covered.max(offset + data.len());
        }
        covered
    }

    fn assemble(self, total_len: usize) -> RawMessage {
        let mut buf = BytesMut::with_capacity(total_len);
        for (offset, data) in self.fragments {
            if offset > buf.len() {
                break;
            }
            let end = offset + data.len();
            if end <= buf.len() {
                continue;
            }
            buf.extend_from_slice(&data[buf.len() - offset..]);
        }
        buf.truncate(total_len);

        let mut header = self.first.header;
        header.is_last_fragment = true;
        header.fragment_offset = 0;
        RawMessage {
            header,
            invalid_token: self.first.invalid_token,
            payload: buf.freeze(),
        }
    }
}

/// Collects fragments per sender and transaction id until a message's payload is covered without
///  gaps. Duplicate, overlapping and out-of-order fragments are fine.
pub struct Reassembler {
    max_message_size: usize,
    timeout: Duration,
    pending: FxHashMap<(NodeId, u64), PartialMessage>,
}

impl Reassembler {
    pub fn new(max_message_size: usize, timeout: Duration) -> Reassembler {
        Reassembler {
            max_message_size,
            timeout,
            pending: Default::default(),
        }
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the complete message if this fragment completes it. Non-fragmented messages are
    ///  passed through unchanged.
    pub fn on_fragment(&mut self, sender: &NodeId, raw: RawMessage, now: Instant) -> Result<Option<RawMessage>, CodecError> {
        if !raw.header.is_fragment() {
            return Ok(Some(raw));
        }

        let key = (sender.clone(), raw.header.transaction_id);
        let offset: usize = raw.header.fragment_offset.safe_cast();
        let end = offset + raw.payload.len();
        if end > self.max_message_size {
            debug!("fragment of message {} from {:?} exceeds the maximum message size - discarding", key.1, sender);
            self.pending.remove(&key);
            return Err(CodecError::MessageTooLarge { size: end, max: self.max_message_size });
        }

        let is_last = raw.header.is_last_fragment;
        let payload = raw.payload.clone();
        let partial = self.pending.entry(key.clone())
            .or_insert_with(|| PartialMessage {
                first: raw,
                fragments: BTreeMap::new(),
                total_len: None,
                last_activity: now,
            });
        partial.last_activity = now;

        // all fragments must agree on where the payload ends
        let is_inconsistent = match partial.total_len {
            Some(total_len) => end > total_len || (is_last && end != total_len),
            None => is_last && partial.received_end() > end,
        };
        if is_inconsistent {
            let declared = partial.total_len.unwrap_or(end);
            let actual = partial.received_end().max(end);
            debug!("fragments of message {} from {:?} disagree on its length - discarding", key.1, sender);
            self.pending.remove(&key);
            return Err(CodecError::LengthMismatch { declared, actual });
        }

        if is_last {
            partial.total_len = Some(end);
        }
        partial.add(offset, payload);

        trace!("received fragment {}..{} of message {} from {:?}", offset, end, key.1, sender);

        let total_len = match partial.total_len {
            Some(total_len) if partial.contiguous_len() >= total_len => total_len,
            _ => return Ok(None),
        };

        match self.pending.remove(&key) {
            Some(partial) => Ok(Some(partial.assemble(total_len))),
            None => Ok(None),
        }
    }

    /// Discards messages that did not receive a fragment for longer than the configured timeout
    pub fn expire(&mut self, now: Instant) -> Vec<(NodeId, CodecError)> {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        self.pending.retain(|(sender, transaction_id), partial| {
            if now.saturating_duration_since(partial.last_activity) > timeout {
                debug!("reassembly of message {} from {:?} timed out", transaction_id, sender);
                expired.push((sender.clone(), CodecError::ReassemblyTimeout(*transaction_id)));
                false
            }
            else {
                true
            }
        });
        expired
    }
}
