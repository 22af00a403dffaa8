// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Propagation ledger.
//!
//! Re-associates accelerator output buffers with the flags, mark, tick count
//! and timestamp of the input buffers they were derived from. Every input
//! accepted on a port advances a per-class submission counter; every output
//! completion advances a per-class completion counter. A tagged input leaves
//! a record keyed by its submission counter, and the output completion whose
//! counter matches picks the metadata up.

use crate::core::ports::{BufferHeader, OutputClass, PortIndex};
use crate::core::{Result, VppError};

use super::{Inherited, PropagationRecord};

/// Fixed-size ring of records for one input port, reused in place.
#[derive(Debug, Clone, Default)]
pub struct PropagationRing {
    records: Vec<PropagationRecord>,
}

impl PropagationRing {
    pub fn new(size: usize) -> Self {
        Self {
            records: vec![PropagationRecord::default(); size],
        }
    }

    pub fn reset(&mut self, size: usize) {
        self.records.clear();
        self.records.resize(size, PropagationRecord::default());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn in_use(&self) -> usize {
        self.records.iter().filter(|r| !r.is_free()).count()
    }

    pub fn records(&self) -> &[PropagationRecord] {
        &self.records
    }

    /// Write into the first free record. `None` when the ring is full.
    fn record(
        &mut self,
        metadata: Inherited,
        correlation: [Option<u64>; OutputClass::COUNT],
    ) -> Option<usize> {
        let slot = self.records.iter().position(PropagationRecord::is_free)?;
        self.records[slot].fill(metadata, correlation);
        Some(slot)
    }

    fn take(&mut self, class: OutputClass, sequence: u64) -> Option<Inherited> {
        self.records
            .iter_mut()
            .find(|r| r.correlation(class) == Some(sequence))
            .map(|r| r.release(class))
    }
}

#[derive(Debug, Clone)]
pub struct PropagationLedger {
    /// Rings for the primary and overlay inputs.
    rings: [PropagationRing; 2],
    submitted: [[u64; OutputClass::COUNT]; 2],
    completed: [u64; OutputClass::COUNT],
}

fn ring_slot(port: PortIndex) -> Result<usize> {
    match port {
        PortIndex::Input => Ok(0),
        PortIndex::Overlay => Ok(1),
        other => Err(VppError::BadPort(format!(
            "{} does not feed the propagation ledger",
            other
        ))),
    }
}

impl PropagationLedger {
    pub fn new(input_size: usize, overlay_size: usize) -> Self {
        Self {
            rings: [
                PropagationRing::new(input_size),
                PropagationRing::new(overlay_size),
            ],
            submitted: [[0; OutputClass::COUNT]; 2],
            completed: [0; OutputClass::COUNT],
        }
    }

    pub fn ring(&self, port: PortIndex) -> Option<&PropagationRing> {
        ring_slot(port).ok().map(|i| &self.rings[i])
    }

    /// Reinitialize a port's ring to all-free, sized to its buffer count.
    pub fn reset_port(&mut self, port: PortIndex, size: usize) {
        if let Ok(i) = ring_slot(port) {
            self.rings[i].reset(size);
        }
    }

    /// Drop every record of `port` and line its submission counters up with
    /// the completions so far. Only valid once nothing the port fed is left
    /// inside the accelerator.
    pub fn realign_port(&mut self, port: PortIndex, size: usize) {
        if let Ok(i) = ring_slot(port) {
            self.rings[i].reset(size);
            self.submitted[i] = self.completed;
        }
    }

    pub fn reset_counters(&mut self) {
        self.submitted = [[0; OutputClass::COUNT]; 2];
        self.completed = [0; OutputClass::COUNT];
    }

    /// Account for an input buffer accepted on `buffer.port()` feeding
    /// `classes`. Tagged buffers leave a record.
    ///
    /// # Errors
    ///
    /// [`VppError::PropagationRingExhausted`] when no record is free. No
    /// counter moves in that case.
    pub fn on_input_accepted(
        &mut self,
        buffer: &BufferHeader,
        classes: &[OutputClass],
    ) -> Result<()> {
        let port = buffer.port();
        let ring = ring_slot(port)?;

        let mut correlation = [None; OutputClass::COUNT];
        for class in classes {
            correlation[class.slot()] = Some(self.submitted[ring][class.slot()]);
        }

        if buffer.has_metadata() {
            if correlation.iter().all(Option::is_none) {
                tracing::debug!("{} carries metadata but feeds no enabled output", buffer.id());
            } else {
                let slot = self.rings[ring]
                    .record(Inherited::from_buffer(buffer), correlation)
                    .ok_or(VppError::PropagationRingExhausted(port))?;
                tracing::trace!(
                    "{} metadata recorded in slot {} with correlation {:?}",
                    buffer.id(),
                    slot,
                    correlation
                );
            }
        }

        for class in classes {
            self.submitted[ring][class.slot()] += 1;
        }
        Ok(())
    }

    /// Apply inherited metadata to a completed output buffer of `class`.
    ///
    /// The buffer's own metadata is cleared first. The primary input's
    /// record wins the mark and timestamp; the overlay's flags are OR-ed in.
    /// Returns whether any record matched.
    pub fn on_output_completed(&mut self, class: OutputClass, buffer: &mut BufferHeader) -> bool {
        let sequence = self.completed[class.slot()];
        self.completed[class.slot()] += 1;

        buffer.clear_metadata();
        let primary = self.rings[0].take(class, sequence);
        let overlay = self.rings[1].take(class, sequence);

        if let Some(p) = primary {
            buffer.flags = p.flags;
            buffer.mark = p.mark;
            buffer.tick_count = p.tick_count;
            buffer.timestamp = p.timestamp;
        }
        if let Some(o) = overlay {
            buffer.flags |= o.flags;
            if buffer.mark.is_none() {
                buffer.mark = o.mark;
            }
            if primary.is_none() {
                buffer.tick_count = o.tick_count;
                buffer.timestamp = o.timestamp;
            }
        }
        primary.is_some() || overlay.is_some()
    }
}
