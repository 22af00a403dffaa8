// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::ports::{BufferFlags, BufferHeader, Mark, OutputClass};

/// Metadata copied from an input buffer onto a derived output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inherited {
    pub flags: BufferFlags,
    pub mark: Option<Mark>,
    pub tick_count: u32,
    pub timestamp: i64,
}

impl Inherited {
    pub fn from_buffer(buffer: &BufferHeader) -> Self {
        Self {
            flags: buffer.flags,
            mark: buffer.mark,
            tick_count: buffer.tick_count,
            timestamp: buffer.timestamp,
        }
    }
}

/// One slot of a propagation ring.
///
/// A record is free when every correlation counter is `None`; it is never
/// removed from the ring.
#[derive(Debug, Clone, Default)]
pub struct PropagationRecord {
    metadata: Inherited,
    correlation: [Option<u64>; OutputClass::COUNT],
}

impl PropagationRecord {
    pub fn is_free(&self) -> bool {
        self.correlation.iter().all(Option::is_none)
    }

    pub fn correlation(&self, class: OutputClass) -> Option<u64> {
        self.correlation[class.slot()]
    }

    pub fn metadata(&self) -> &Inherited {
        &self.metadata
    }

    pub(crate) fn fill(&mut self, metadata: Inherited, correlation: [Option<u64>; OutputClass::COUNT]) {
        self.metadata = metadata;
        self.correlation = correlation;
    }

    /// Consume the counter for `class`, returning the metadata. The record
    /// is cleared once no counter remains.
    pub(crate) fn release(&mut self, class: OutputClass) -> Inherited {
        let metadata = self.metadata;
        self.correlation[class.slot()] = None;
        if self.is_free() {
            self.metadata = Inherited::default();
        }
        metadata
    }
}
