//! Sliding window of decoded alignments overlapping the scan position.
//!
//! Decoded alignments live in an arena of generation-tagged slots. Alleles are
//! addressed from outside through [`AlleleHandle`]s, which stop resolving as
//! soon as their alignment is evicted and the slot reused.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use super::allele::Allele;
use super::config::ParserConfig;
use super::decoder::AlleleDecoder;
use super::parser::ParserError;
use super::read_groups::ReadGroups;
use super::reference::{ReferenceProvider, ReferenceWindow};
use super::source::AlignmentSource;
use super::types::AlignedRead;

/// One alignment together with the alleles it produced.
#[derive(Debug, Clone)]
pub struct RegisteredAlignment {
    /// Source alignment.
    pub read: AlignedRead,
    /// Alleles in CIGAR order.
    pub alleles: Vec<Allele>,
    /// Indel bases and mismatches at or above the countable quality.
    pub mismatches: u32,
}

impl RegisteredAlignment {
    /// Exclusive end of the alignment footprint.
    pub fn end(&self) -> u32 {
        self.read.end()
    }
}

/// Stable, non-owning reference to an allele held by the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlleleHandle {
    slot: u32,
    generation: u32,
    index: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    alignment: Option<RegisteredAlignment>,
}

/// Collaborators consulted while admitting alignments.
#[derive(Debug)]
pub struct Admission<'a, R: ?Sized> {
    /// Reference used to grow the window when a read runs past it.
    pub provider: &'a R,
    /// Read group to sample resolution.
    pub read_groups: &'a ReadGroups,
    /// CIGAR decoder.
    pub decoder: &'a AlleleDecoder,
    /// Admission filters.
    pub config: &'a ParserConfig,
}

/// Queue of decoded alignments ordered by start position.
#[derive(Debug, Default)]
pub struct AlignmentWindow {
    slots: Vec<Slot>,
    free: Vec<u32>,
    queue: VecDeque<u32>,
    pending: Option<AlignedRead>,
}

impl AlignmentWindow {
    /// Empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident alignments.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no alignment is resident.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every alignment and the pending read; outstanding handles go stale.
    pub fn clear(&mut self) {
        for slot in self.queue.drain(..) {
            let entry = &mut self.slots[slot as usize];
            entry.alignment = None;
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(slot);
        }
        self.pending = None;
    }

    /// Read pulled from the source but not yet due for admission.
    pub fn pending(&self) -> Option<&AlignedRead> {
        self.pending.as_ref()
    }

    /// Stash the next unread alignment.
    pub fn set_pending(&mut self, read: Option<AlignedRead>) {
        self.pending = read;
    }

    /// Push a decoded alignment and return handles to its alleles.
    pub fn insert(&mut self, alignment: RegisteredAlignment) -> Vec<AlleleHandle> {
        let count = alignment.alleles.len() as u32;
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        entry.alignment = Some(alignment);
        let generation = entry.generation;
        self.queue.push_back(slot);
        (0..count)
            .map(|index| AlleleHandle {
                slot,
                generation,
                index,
            })
            .collect()
    }

    /// Remove every alignment whose end lies before `position`.
    pub fn evict(&mut self, position: u32) -> usize {
        let Self {
            slots, free, queue, ..
        } = self;
        let before = queue.len();
        queue.retain(|&slot| {
            let entry = &mut slots[slot as usize];
            let keep = entry
                .alignment
                .as_ref()
                .is_some_and(|alignment| alignment.end() >= position);
            if !keep {
                if let Some(alignment) = entry.alignment.take() {
                    trace!(read = %alignment.read.name, end = alignment.end(), position, "evicted alignment");
                }
                entry.generation = entry.generation.wrapping_add(1);
                free.push(slot);
            }
            keep
        });
        before - queue.len()
    }

    /// Resolve a handle; `None` once its alignment has left the window.
    pub fn get(&self, handle: AlleleHandle) -> Option<&Allele> {
        let entry = self.slots.get(handle.slot as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.alignment.as_ref()?.alleles.get(handle.index as usize)
    }

    /// Mutable [`AlignmentWindow::get`].
    pub fn get_mut(&mut self, handle: AlleleHandle) -> Option<&mut Allele> {
        let entry = self.slots.get_mut(handle.slot as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.alignment.as_mut()?.alleles.get_mut(handle.index as usize)
    }

    /// Resident alignments, oldest first.
    pub fn alignments(&self) -> impl Iterator<Item = &RegisteredAlignment> {
        self.queue
            .iter()
            .filter_map(|&slot| self.slots[slot as usize].alignment.as_ref())
    }

    /// Pull and decode every alignment starting at or before `position`.
    ///
    /// Returns handles to the alleles of newly admitted alignments.
    pub fn admit<S, R>(
        &mut self,
        position: u32,
        source: &mut S,
        reference: &mut ReferenceWindow,
        admission: &Admission<'_, R>,
    ) -> Result<Vec<AlleleHandle>, ParserError>
    where
        S: AlignmentSource + ?Sized,
        R: ReferenceProvider + ?Sized,
    {
        let config = admission.config;
        let mut handles = Vec::new();

        loop {
            let read = match self.pending.take() {
                Some(read) => read,
                None => match source.next_alignment()? {
                    Some(read) => read,
                    None => break,
                },
            };
            if read.pos > position {
                self.pending = Some(read);
                break;
            }

            let read_group = read
                .read_group
                .clone()
                .ok_or_else(|| ParserError::MissingReadGroup(read.name.to_string()))?;
            let Some(sample) = admission.read_groups.sample_for(&read_group).map(Arc::clone) else {
                trace!(read = %read.name, read_group = %read_group, "skipping read from sample not under analysis");
                continue;
            };
            if read.is_unmapped {
                trace!(read = %read.name, "skipping unmapped read");
                continue;
            }
            if read.is_duplicate && !config.use_duplicate_reads {
                trace!(read = %read.name, "skipping duplicate read");
                continue;
            }
            if read.mapq < config.min_mapping_quality {
                trace!(read = %read.name, mapq = read.mapq, "skipping low mapping quality read");
                continue;
            }

            if read.end() > reference.end() {
                reference.extend_right(admission.provider, read.end() - reference.end())?;
            }

            let decoded = admission.decoder.decode(read, sample, reference)?;
            if decoded.mismatches > config.max_mismatches {
                trace!(
                    read = %decoded.read.name,
                    mismatches = decoded.mismatches,
                    "discarding read over the mismatch ceiling"
                );
                continue;
            }
            trace!(read = %decoded.read.name, pos = decoded.read.pos, "admitted alignment");
            handles.extend(self.insert(decoded));
        }

        Ok(handles)
    }
}
