//! Per-flow parsing state
//!
//! Every flow carries one [`FlowData`] holding a [`DirectionState`] for each
//! [`SourceId`]. Only the `update_flow` step of a section mutates it.

use crate::transaction::TransactionQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Direction a chunk travelled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Client,
    Server,
}

impl SourceId {
    pub const ALL: [SourceId; 2] = [SourceId::Client, SourceId::Server];

    pub fn index(self) -> usize {
        match self {
            SourceId::Client => 0,
            SourceId::Server => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            SourceId::Client => SourceId::Server,
            SourceId::Server => SourceId::Client,
        }
    }

    /// Section that starts a fresh message in this direction
    pub fn start_section(self) -> SectionType {
        match self {
            SourceId::Client => SectionType::Request,
            SourceId::Server => SectionType::Status,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::Client => "client",
            SourceId::Server => "server",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the next chunk in a direction will be interpreted as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Request,
    Status,
    Header,
    Body,
    ChunkHead,
    ChunkBody,
    Trailer,
    /// Data in this direction is dropped unexamined
    Discard,
    /// The transport closed
    Closed,
    /// Framing is unrecoverable
    Abort,
}

impl SectionType {
    /// Section types that construct a message section
    pub const SECTIONS: [SectionType; 7] = [
        SectionType::Request,
        SectionType::Status,
        SectionType::Header,
        SectionType::Body,
        SectionType::ChunkHead,
        SectionType::ChunkBody,
        SectionType::Trailer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionType::Request => "request",
            SectionType::Status => "status",
            SectionType::Header => "header",
            SectionType::Body => "body",
            SectionType::ChunkHead => "chunk_head",
            SectionType::ChunkBody => "chunk_body",
            SectionType::Trailer => "trailer",
            SectionType::Discard => "discard",
            SectionType::Closed => "closed",
            SectionType::Abort => "abort",
        }
    }

    /// Absorbing states never leave without a new flow
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SectionType::Discard | SectionType::Closed | SectionType::Abort
        )
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing state of one direction of a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionState {
    pub expected: SectionType,
    /// Body octets consumed for the current message (or current chunk)
    pub body_octets: u64,
    pub num_chunks: u32,
    /// Declared body or chunk length, -1 when unset
    pub data_length: i64,
}

impl DirectionState {
    pub fn new(source: SourceId) -> Self {
        Self {
            expected: source.start_section(),
            body_octets: 0,
            num_chunks: 0,
            data_length: -1,
        }
    }

    /// Clears body bookkeeping without touching `expected`
    pub fn half_reset(&mut self) {
        self.body_octets = 0;
        self.num_chunks = 0;
        self.data_length = -1;
    }

    /// Octets still owed by the current body or chunk, if a length is set
    pub fn remaining(&self) -> Option<u64> {
        u64::try_from(self.data_length)
            .ok()
            .map(|len| len.saturating_sub(self.body_octets))
    }
}

/// Application state stored in a flow's session slot
#[derive(Debug)]
pub struct FlowData {
    directions: [DirectionState; 2],
    pub transactions: TransactionQueue,
}

impl FlowData {
    pub fn new(max_pipeline_depth: usize) -> Self {
        Self {
            directions: [
                DirectionState::new(SourceId::Client),
                DirectionState::new(SourceId::Server),
            ],
            transactions: TransactionQueue::new(max_pipeline_depth),
        }
    }

    pub fn expected(&self, source: SourceId) -> SectionType {
        self[source].expected
    }

    /// Moves `source` to `next` and clears its body bookkeeping
    pub fn finish_message(&mut self, source: SourceId, next: SectionType) {
        let state = &mut self[source];
        state.expected = next;
        state.half_reset();
    }
}

impl Index<SourceId> for FlowData {
    type Output = DirectionState;

    fn index(&self, source: SourceId) -> &DirectionState {
        &self.directions[source.index()]
    }
}

impl IndexMut<SourceId> for FlowData {
    fn index_mut(&mut self, source: SourceId) -> &mut DirectionState {
        &mut self.directions[source.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let flow = FlowData::new(8);
        assert_eq!(flow.expected(SourceId::Client), SectionType::Request);
        assert_eq!(flow.expected(SourceId::Server), SectionType::Status);
        assert_eq!(flow[SourceId::Client].data_length, -1);
    }

    #[test]
    fn test_finish_message_half_resets() {
        let mut flow = FlowData::new(8);
        flow[SourceId::Server].expected = SectionType::Body;
        flow[SourceId::Server].data_length = 10;
        flow[SourceId::Server].body_octets = 4;
        flow[SourceId::Server].num_chunks = 2;

        flow.finish_message(SourceId::Server, SectionType::Status);

        let state = &flow[SourceId::Server];
        assert_eq!(state.expected, SectionType::Status);
        assert_eq!(state.body_octets, 0);
        assert_eq!(state.num_chunks, 0);
        assert_eq!(state.data_length, -1);
        // The other direction is untouched
        assert_eq!(flow.expected(SourceId::Client), SectionType::Request);
    }

    #[test]
    fn test_remaining() {
        let mut state = DirectionState::new(SourceId::Client);
        assert_eq!(state.remaining(), None);
        state.data_length = 10;
        state.body_octets = 3;
        assert_eq!(state.remaining(), Some(7));
        state.body_octets = 12;
        assert_eq!(state.remaining(), Some(0));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SectionType::Discard.is_terminal());
        assert!(SectionType::Abort.is_terminal());
        assert!(SectionType::Closed.is_terminal());
        assert!(SectionType::SECTIONS.iter().all(|t| !t.is_terminal()));
    }
}
