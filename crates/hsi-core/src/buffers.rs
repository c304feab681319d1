//! Named detection buffers
//!
//! Sections that are worth inspecting copy their interesting fields into
//! these slots. The detection engine reads them after `process` returns;
//! the inspector itself never does.

use crate::field::Field;
use serde::{Deserialize, Serialize};

/// Buffer slots exposed to rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferId {
    Uri,
    Method,
    Version,
    StatusCode,
    StatusMessage,
    Header,
    Cookie,
    Body,
}

impl BufferId {
    pub const ALL: [BufferId; 8] = [
        BufferId::Uri,
        BufferId::Method,
        BufferId::Version,
        BufferId::StatusCode,
        BufferId::StatusMessage,
        BufferId::Header,
        BufferId::Cookie,
        BufferId::Body,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Generic buffer classes requested by the detection engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InspectionBufferType {
    Key,
    Header,
    Body,
}

/// The slots filled for the chunk most recently processed
#[derive(Debug, Clone, Default)]
pub struct DetectionBuffers {
    slots: [Option<Vec<u8>>; 8],
}

impl DetectionBuffers {
    pub fn set(&mut self, id: BufferId, bytes: &[u8]) {
        let slot = &mut self.slots[id.index()];
        match slot {
            Some(existing) => {
                existing.clear();
                existing.extend_from_slice(bytes);
            }
            None => *slot = Some(bytes.to_vec()),
        }
    }

    /// Copies a field into a slot; sentinel fields leave the slot empty
    pub fn set_field(&mut self, id: BufferId, field: Field<'_>) {
        match field.bytes() {
            Some(bytes) => self.set(id, bytes),
            None => self.slots[id.index()] = None,
        }
    }

    pub fn get(&self, id: BufferId) -> Option<&[u8]> {
        self.slots[id.index()].as_deref()
    }

    pub fn get_buf(&self, kind: InspectionBufferType) -> Option<&[u8]> {
        let id = match kind {
            InspectionBufferType::Key => BufferId::Uri,
            InspectionBufferType::Header => BufferId::Header,
            InspectionBufferType::Body => BufferId::Body,
        };
        self.get(id)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Filled slots in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &[u8])> {
        BufferId::ALL
            .into_iter()
            .filter_map(move |id| self.get(id).map(|bytes| (id, bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let mut buffers = DetectionBuffers::default();
        assert!(buffers.is_empty());

        buffers.set(BufferId::Uri, b"/index.html");
        buffers.set_field(BufferId::Body, Field::new(b"payload"));
        assert_eq!(buffers.get_buf(InspectionBufferType::Key), Some(&b"/index.html"[..]));
        assert_eq!(buffers.get_buf(InspectionBufferType::Body), Some(&b"payload"[..]));
        assert_eq!(buffers.get_buf(InspectionBufferType::Header), None);
        assert_eq!(buffers.iter().count(), 2);

        buffers.clear();
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_sentinel_field_empties_slot() {
        let mut buffers = DetectionBuffers::default();
        buffers.set(BufferId::Cookie, b"a=1");
        buffers.set_field(BufferId::Cookie, Field::not_present());
        assert_eq!(buffers.get(BufferId::Cookie), None);
    }
}
