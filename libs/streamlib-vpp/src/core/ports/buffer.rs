// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Buffer headers moved across ownership boundaries.
//!
//! A [`BufferHeader`] is deliberately not `Clone`: handing one to the
//! component, the accelerator or a peer moves it, so at most one party can
//! ever touch the storage. The ownership ledger mirrors that move with a tag.

use bitflags::bitflags;
use uuid::Uuid;

use super::PortIndex;

bitflags! {
    /// Per-buffer flags carried through processing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        const END_OF_STREAM = 0x0000_0001;
        const START_TIME = 0x0000_0002;
        const DECODE_ONLY = 0x0000_0004;
        const DATA_CORRUPT = 0x0000_0008;
        const END_OF_FRAME = 0x0000_0010;
        const SYNC_FRAME = 0x0000_0020;
        const EXTRA_DATA = 0x0000_0040;
        const CODEC_CONFIG = 0x0000_0080;
    }
}

/// Identity of a component instance. Used as mark target and to reject
/// buffers that were allocated by a different instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(Uuid);

impl ComponentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque client token attached by a mark-buffer command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkToken(pub u64);

/// A mark travelling with a buffer until it reaches `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub target: ComponentId,
    pub token: MarkToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub component: ComponentId,
    pub port: PortIndex,
    pub slot: usize,
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.port, self.slot)
    }
}

/// Where the backing storage of a buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOrigin {
    SelfAllocated,
    External,
}

pub struct BufferHeader {
    id: BufferId,
    origin: StorageOrigin,
    data: Vec<u8>,
    pub filled_len: usize,
    pub offset: usize,
    pub flags: BufferFlags,
    pub timestamp: i64,
    pub tick_count: u32,
    pub mark: Option<Mark>,
}

impl BufferHeader {
    pub(crate) fn new(id: BufferId, origin: StorageOrigin, data: Vec<u8>) -> Self {
        Self {
            id,
            origin,
            data,
            filled_len: 0,
            offset: 0,
            flags: BufferFlags::empty(),
            timestamp: 0,
            tick_count: 0,
            mark: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn port(&self) -> PortIndex {
        self.id.port
    }

    pub fn origin(&self) -> StorageOrigin {
        self.origin
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The filled region of the buffer.
    pub fn payload(&self) -> &[u8] {
        let start = self.offset.min(self.data.len());
        let end = start.saturating_add(self.filled_len).min(self.data.len());
        &self.data[start..end]
    }

    /// Copy `bytes` into the buffer from the start, truncating to capacity.
    /// Returns the number of bytes written.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(self.data.len());
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.offset = 0;
        self.filled_len = len;
        len
    }

    /// True when flags, mark, tick count or timestamp differ from their defaults.
    pub fn has_metadata(&self) -> bool {
        !self.flags.is_empty() || self.mark.is_some() || self.timestamp != 0 || self.tick_count != 0
    }

    pub fn clear_metadata(&mut self) {
        self.flags = BufferFlags::empty();
        self.mark = None;
        self.timestamp = 0;
        self.tick_count = 0;
    }

    pub(crate) fn into_storage(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHeader")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("capacity", &self.data.len())
            .field("filled_len", &self.filled_len)
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .field("timestamp", &self.timestamp)
            .field("tick_count", &self.tick_count)
            .field("mark", &self.mark)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(len: usize) -> BufferHeader {
        let id = BufferId {
            component: ComponentId::new(),
            port: PortIndex::Input,
            slot: 0,
        };
        BufferHeader::new(id, StorageOrigin::SelfAllocated, vec![0; len])
    }

    #[test]
    fn test_fill_truncates_to_capacity() {
        let mut buf = header(4);
        assert_eq!(buf.fill(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(buf.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_in_place_writes_with_offset() {
        let mut buf = header(6);
        buf.data_mut()[2..5].copy_from_slice(&[9, 8, 7]);
        buf.offset = 2;
        buf.filled_len = 3;
        assert_eq!(buf.payload(), &[9, 8, 7]);
    }

    #[test]
    fn test_payload_clamps_bad_offsets() {
        let mut buf = header(4);
        buf.offset = 3;
        buf.filled_len = 10;
        assert_eq!(buf.payload().len(), 1);
    }

    #[test]
    fn test_metadata_detection() {
        let mut buf = header(1);
        assert!(!buf.has_metadata());
        buf.flags |= BufferFlags::END_OF_STREAM;
        assert!(buf.has_metadata());
        buf.clear_metadata();
        assert!(!buf.has_metadata());
        buf.timestamp = 33_000;
        assert!(buf.has_metadata());
    }
}
