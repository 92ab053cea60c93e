use std::collections::VecDeque;

use crate::extensions::ExpansionKind;
use crate::input::{AcknowledgeData, MemoryData};
use crate::output::Addressing;

/// Opaque identifier of a queued read or write request.
pub type RequestHandle = u32;

/// What to do once a queued request completes.
///
/// Multi-step sequences (handshake, expansion handshake, IR configuration)
/// chain by enqueueing their next request from the poll loop when the
/// continuation of the previous one is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Continuation {
    /// Nothing to resume, the request was fire-and-forget.
    None,
    /// Factory accelerometer calibration block arrived.
    HandshakeCalibration,
    /// First expansion-disable write of the handshake was acknowledged.
    HandshakeDisableFirst,
    /// Second expansion-disable write of the handshake was acknowledged.
    HandshakeDisableSecond,
    /// First expansion init write was acknowledged.
    ExpansionInitFirst,
    /// Second expansion init write was acknowledged.
    ExpansionInitSecond,
    /// The 6-byte expansion identification block arrived.
    ExpansionIdentify,
    /// The peripheral calibration block for the given kind arrived.
    ExpansionCalibration(ExpansionKind),
    /// The balance board main calibration block arrived.
    BoardCalibrationBlock,
    /// The balance board reference temperature arrived.
    BoardReferenceTemperature,
    /// The motion sensor activation write was acknowledged.
    MotionSensorEnabled,
    /// First write of the motion sensor deactivation pair was acknowledged.
    MotionSensorDisableFirst,
    /// Second write of the motion sensor deactivation pair was acknowledged.
    MotionSensorDisableSecond,
    /// The last register write of the IR camera setup was acknowledged.
    IrConfigured,
    /// A read issued through the public register access API.
    UserRead,
    /// A write issued through the public register access API.
    UserWrite,
}

impl Continuation {
    /// Steps of the expansion insertion handshake. Their completions are
    /// stale once the peripheral is pulled mid-sequence and must not be
    /// dispatched.
    pub fn is_expansion_step(self) -> bool {
        matches!(
            self,
            Self::ExpansionInitFirst
                | Self::ExpansionInitSecond
                | Self::ExpansionIdentify
                | Self::ExpansionCalibration(_)
                | Self::BoardCalibrationBlock
                | Self::BoardReferenceTemperature
                | Self::MotionSensorEnabled
        )
    }
}

#[derive(Debug)]
struct ReadRequest {
    handle: RequestHandle,
    addressing: Addressing,
    buffer: Vec<u8>,
    remaining: u16,
    continuation: Continuation,
    sent: bool,
}

#[derive(Debug)]
struct WriteRequest {
    handle: RequestHandle,
    addressing: Addressing,
    data: [u8; 16],
    continuation: Continuation,
    sent: bool,
}

#[derive(Debug)]
pub(crate) struct CompletedRead {
    pub handle: RequestHandle,
    pub data: Vec<u8>,
    pub error: u8,
    pub continuation: Continuation,
}

#[derive(Debug)]
pub(crate) struct CompletedWrite {
    pub handle: RequestHandle,
    pub error: u8,
    pub continuation: Continuation,
}

/// Pending register access, serialized against the single outstanding
/// operation per kind that the device firmware accepts.
///
/// Reads and writes are independent FIFOs. Only the head of each queue is
/// ever on the wire; completion reports are matched to it and requests of
/// the same kind complete in submission order.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    reads: VecDeque<ReadRequest>,
    writes: VecDeque<WriteRequest>,
    next_handle: RequestHandle,
}

impl RequestQueue {
    pub fn enqueue_read(
        &mut self,
        addressing: Addressing,
        continuation: Continuation,
    ) -> RequestHandle {
        let handle = self.take_handle();
        self.reads.push_back(ReadRequest {
            handle,
            addressing,
            buffer: vec![0u8; addressing.size as usize],
            remaining: addressing.size,
            continuation,
            sent: false,
        });
        handle
    }

    pub fn enqueue_write(
        &mut self,
        addressing: Addressing,
        data: &[u8],
        continuation: Continuation,
    ) -> RequestHandle {
        let handle = self.take_handle();
        let mut padded = [0u8; 16];
        let length = usize::min(data.len(), 16);
        padded[..length].copy_from_slice(&data[..length]);
        self.writes.push_back(WriteRequest {
            handle,
            addressing,
            data: padded,
            continuation,
            sent: false,
        });
        handle
    }

    /// Returns the read request to put on the wire, if the head of the read
    /// queue has not been sent yet, and marks it sent.
    pub fn next_read_to_send(&mut self) -> Option<Addressing> {
        let request = self.reads.front_mut().filter(|request| !request.sent)?;
        request.sent = true;
        Some(request.addressing)
    }

    /// Returns the write request to put on the wire, if the head of the
    /// write queue has not been sent yet, and marks it sent.
    pub fn next_write_to_send(&mut self) -> Option<(Addressing, [u8; 16])> {
        let request = self.writes.front_mut().filter(|request| !request.sent)?;
        request.sent = true;
        Some((request.addressing, request.data))
    }

    /// Feeds one read-data report into the head-of-line read request.
    ///
    /// Bytes are copied at the offset derived from the reported address and
    /// the request only completes once all requested bytes arrived. Returns
    /// the finished request, or `None` while chunks are still outstanding.
    pub fn complete_read_chunk(&mut self, memory: &MemoryData) -> Option<CompletedRead> {
        let request = self.reads.front_mut().filter(|request| request.sent)?;

        if memory.error_flag() != 0 {
            // The device refuses the rest of the read, finish it as-is.
            return self.pop_read(memory.error_flag());
        }

        let base = (request.addressing.address & 0xFFFF) as u16;
        let offset = usize::from(memory.address_offset().wrapping_sub(base));
        let size = usize::from(memory.size());
        if offset >= request.buffer.len() {
            return self.pop_read(0);
        }
        let length = usize::min(size, request.buffer.len() - offset);
        request.buffer[offset..offset + length].copy_from_slice(&memory.data[..length]);
        request.remaining = request.remaining.saturating_sub(length as u16);

        if request.remaining == 0 {
            self.pop_read(0)
        } else {
            None
        }
    }

    /// Feeds an acknowledge report into the head-of-line write request.
    pub fn complete_write(&mut self, acknowledge: &AcknowledgeData) -> Option<CompletedWrite> {
        _ = self.writes.front().filter(|request| request.sent)?;
        self.writes.pop_front().map(|request| CompletedWrite {
            handle: request.handle,
            error: acknowledge.error_code(),
            continuation: request.continuation,
        })
    }

    /// Drops every queued request without running continuations, used on
    /// session teardown.
    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    fn pop_read(&mut self, error: u8) -> Option<CompletedRead> {
        self.reads.pop_front().map(|request| CompletedRead {
            handle: request.handle,
            data: request.buffer,
            error,
            continuation: request.continuation,
        })
    }

    fn take_handle(&mut self) -> RequestHandle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }
}
