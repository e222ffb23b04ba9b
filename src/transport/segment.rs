//! Fragmentation and partial delivery shared by the bundled transports.
//!
//! The sending half splits each message into fragments no larger than the
//! fragmentation point and stamps them with stream sequence and
//! transmission sequence numbers. The receiving half hands a fragment to
//! the application in pieces no larger than the caller's buffer.

use crate::frame::{FrameHeader, FLAG_END_OF_RECORD, MAX_FRAME_PAYLOAD};
use crate::protocol::{Ordering, Reliability, RecvEvent, RecvInfo, SendInfo};
use crate::{Error, Result};

/// Sequence numbering for the outbound direction of one association.
#[derive(Debug)]
pub struct Segmenter {
    fragment_point: usize,
    ssn: Vec<u16>,
    next_tsn: u32,
}

impl Segmenter {
    /// `fragment_point == 0` means no fragmentation below the record limit.
    pub fn new(streams: u16, fragment_point: usize) -> Self {
        let limit = MAX_FRAME_PAYLOAD as usize;
        let fragment_point = if fragment_point == 0 || fragment_point > limit {
            limit
        } else {
            fragment_point
        };
        Self {
            fragment_point,
            ssn: vec![0; streams as usize],
            next_tsn: 0,
        }
    }

    pub fn streams(&self) -> u16 {
        self.ssn.len() as u16
    }

    pub fn fragment_point(&self) -> usize {
        self.fragment_point
    }

    /// Plans the fragments of one message of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` when `info.stream` is not an outbound stream.
    pub fn segment(&mut self, len: usize, info: &SendInfo) -> Result<Fragments> {
        let streams = self.streams();
        let slot = self.ssn.get_mut(info.stream as usize).ok_or_else(|| {
            Error::Transport(format!(
                "stream {} out of range, association has {} streams",
                info.stream, streams
            ))
        })?;

        let ssn = match info.ordering {
            Ordering::Ordered => {
                let ssn = *slot;
                *slot = slot.wrapping_add(1);
                ssn
            }
            Ordering::Unordered => 0,
        };

        let count = fragment_count(len, self.fragment_point);
        let first_tsn = self.next_tsn;
        self.next_tsn = self.next_tsn.wrapping_add(count);

        let template = FrameHeader::data(
            info.stream,
            ssn,
            info.ppid,
            first_tsn,
            false,
            info.ordering.is_unordered(),
            info.reliability.code(),
            info.reliability.value(),
            0,
        );

        Ok(Fragments {
            template,
            remaining: len,
            offset: 0,
            max: self.fragment_point,
            done: false,
        })
    }
}

fn fragment_count(len: usize, fragment_point: usize) -> u32 {
    if len == 0 {
        1
    } else {
        len.div_ceil(fragment_point) as u32
    }
}

/// Fragment headers of one message, each paired with its payload range.
#[derive(Debug)]
pub struct Fragments {
    template: FrameHeader,
    remaining: usize,
    offset: usize,
    max: usize,
    done: bool,
}

impl Iterator for Fragments {
    type Item = (FrameHeader, std::ops::Range<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let len = self.remaining.min(self.max);
        let range = self.offset..self.offset + len;
        self.remaining -= len;
        self.offset += len;

        let mut header = self.template;
        header.length = len as u32;
        if self.remaining == 0 {
            header.flags |= FLAG_END_OF_RECORD;
            self.done = true;
        }
        self.template.tsn = self.template.tsn.wrapping_add(1);

        Some((header, range))
    }
}

/// A data fragment being handed to the application.
#[derive(Debug)]
pub struct Inbound {
    header: FrameHeader,
    remaining: usize,
}

impl Inbound {
    pub fn new(header: FrameHeader) -> Self {
        Self {
            remaining: header.length as usize,
            header,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Takes the next piece for a buffer of `capacity` bytes.
    ///
    /// The end-of-record flag is only reported with the last piece of a
    /// fragment that completes its message.
    pub fn take(&mut self, capacity: usize) -> RecvEvent {
        let len = self.remaining.min(capacity);
        self.remaining -= len;
        RecvEvent::Data {
            len,
            info: RecvInfo {
                ppid: self.header.ppid,
                stream: self.header.stream,
                ssn: self.header.ssn,
                tsn: self.header.tsn,
                ordering: Ordering::from_unordered(self.header.is_unordered()),
                reliability: Reliability::from_wire(self.header.policy, self.header.pr_value),
                end_of_record: self.remaining == 0 && self.header.is_end_of_record(),
            },
        }
    }
}

/// Checks an inbound data fragment against the negotiated stream count.
pub fn check_stream(header: &FrameHeader, streams: u16) -> Result<()> {
    if header.stream >= streams {
        return Err(Error::Protocol(format!(
            "data on stream {} but only {} streams negotiated",
            header.stream, streams
        )));
    }
    Ok(())
}
