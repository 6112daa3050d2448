//! Sequenced command channel multiplexing opcode groups over one endpoint.
//!
//! Writes are `{seq, group_hi, group_lo, payload…}` with `seq` wrapping at
//! 256. Responses echo the sequence byte and group code, and a response is
//! matched on both. A response for another pending request is stashed until
//! that request is awaited; anything else (acks of fire-and-forget writes,
//! late replies to abandoned requests) is dropped.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use spectro_traits::Transport;
use spectro_traits::channels::GENERIC;
use tracing::{debug, trace};

use crate::error::DeviceError;
use crate::hw_error::{map_transport_error, map_write_status};

/// Reads attempted while waiting for one response before giving up.
pub const MAX_RESPONSE_READS: usize = 4;
/// Posted requests remembered at once; the oldest is forgotten beyond this.
pub const MAX_PENDING: usize = 16;

pub type GroupCode = [u8; 2];

/// A posted request: its group code and the sequence byte it carried.
pub type Tag = (GroupCode, u8);

#[derive(Debug, Default)]
pub struct GenericChannel {
    seq: u8,
    pending: VecDeque<Tag>,
    stash: HashMap<Tag, Vec<u8>>,
}

impl GenericChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u8 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }

    /// Sequence byte the next write will carry.
    pub fn peek_seq(&self) -> u8 {
        self.seq
    }

    /// Build the next outbound frame, consuming a sequence number.
    pub fn frame(&mut self, group: GroupCode, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + payload.len());
        out.push(self.next_seq());
        out.extend_from_slice(&group);
        out.extend_from_slice(payload);
        out
    }

    /// Fire-and-forget write. The caller holds the transaction gate.
    pub fn send(
        &mut self,
        transport: &dyn Transport,
        group: GroupCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), DeviceError> {
        let frame = self.frame(group, payload);
        let status = transport
            .write(GENERIC, &frame, timeout)
            .map_err(|e| map_transport_error(e.as_ref()))?;
        map_write_status(GENERIC, status)
    }

    /// Write a request whose response will be awaited later with [`Self::await_reply`].
    pub fn post(
        &mut self,
        transport: &dyn Transport,
        group: GroupCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Tag, DeviceError> {
        let tag = (group, self.peek_seq());
        self.send(transport, group, payload, timeout)?;
        self.pending.push_back(tag);
        if self.pending.len() > MAX_PENDING
            && let Some(old) = self.pending.pop_front()
        {
            debug!(group = ?old.0, seq = old.1, "generic: forgetting unawaited request");
            self.stash.remove(&old);
        }
        Ok(tag)
    }

    /// Write and wait for the response carrying the same group and sequence.
    /// Returns the payload after the 3-byte header.
    pub fn request(
        &mut self,
        transport: &dyn Transport,
        group: GroupCode,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        let tag = self.post(transport, group, payload, timeout)?;
        self.await_reply(transport, tag, timeout)
    }

    /// Wait for the response to a posted request. The request is no longer
    /// pending afterwards, whether or not it was answered.
    pub fn await_reply(
        &mut self,
        transport: &dyn Transport,
        tag: Tag,
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        let result = self.read_reply(transport, tag, timeout);
        self.pending.retain(|t| *t != tag);
        self.stash.remove(&tag);
        result
    }

    fn read_reply(
        &mut self,
        transport: &dyn Transport,
        tag: Tag,
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        if let Some(stashed) = self.stash.remove(&tag) {
            trace!(group = ?tag.0, seq = tag.1, "generic: response served from stash");
            return Ok(stashed);
        }
        for _ in 0..MAX_RESPONSE_READS {
            let resp = transport
                .read(GENERIC, timeout)
                .map_err(|e| map_transport_error(e.as_ref()))?;
            let [rseq, g0, g1, body @ ..] = resp.as_slice() else {
                return Err(DeviceError::ProtocolViolation(format!(
                    "generic response of {} bytes",
                    resp.len()
                )));
            };
            let rtag = ([*g0, *g1], *rseq);
            if rtag == tag {
                return Ok(body.to_vec());
            }
            if self.pending.contains(&rtag) {
                trace!(group = ?rtag.0, seq = rtag.1, "generic: stashing out-of-order response");
                self.stash.insert(rtag, body.to_vec());
            } else {
                debug!(
                    group = ?rtag.0,
                    seq = rtag.1,
                    expected_seq = tag.1,
                    "generic: dropping unsolicited or stale response"
                );
            }
        }
        Err(DeviceError::TransportTimeout(format!(
            "no generic response for group {:02X}{:02X} seq {}",
            tag.0[0], tag.0[1], tag.1
        )))
    }

    /// Number of stashed responses awaiting a requester.
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    /// Number of posted requests not yet awaited.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
