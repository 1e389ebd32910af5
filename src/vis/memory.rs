// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A visibility source held entirely in memory.

use std::collections::BTreeMap;

use log::debug;
use marlu::c32;
use ndarray::prelude::*;

use super::{
    DataMode, VirtualModelRecord, VisError, VisSelection, VisSource, VisibilityBuffer,
};

/// Visibilities in memory, grouped into chunks of buffers.
#[derive(Debug, Clone)]
pub struct MemoryVisSource {
    mode: DataMode,

    /// Everything this source was made with.
    all: Vec<Vec<VisibilityBuffer>>,

    /// The buffers of the current selection.
    selected: Vec<Vec<VisibilityBuffer>>,

    /// The model column of the current selection; `None` until written.
    model_column: Vec<Vec<Option<Array3<c32>>>>,

    /// Serialised virtual models, keyed by field.
    virtual_models: BTreeMap<usize, String>,

    chunk: usize,
    index: usize,
    lock_depth: usize,
    num_locks_taken: usize,
}

impl MemoryVisSource {
    /// Make a new source. Every buffer is initially selected.
    pub fn new(chunks: Vec<Vec<VisibilityBuffer>>, mode: DataMode) -> Result<Self, VisError> {
        for vb in chunks.iter().flatten() {
            vb.validate()?;
        }
        let model_column = chunks
            .iter()
            .map(|chunk| vec![None; chunk.len()])
            .collect();
        Ok(MemoryVisSource {
            mode,
            selected: chunks.clone(),
            all: chunks,
            model_column,
            virtual_models: BTreeMap::new(),
            chunk: 0,
            index: 0,
            lock_depth: 0,
            num_locks_taken: 0,
        })
    }

    /// The model column written for a buffer of the current selection.
    pub fn model_column(&self, chunk: usize, index: usize) -> Option<&Array3<c32>> {
        self.model_column.get(chunk)?.get(index)?.as_ref()
    }

    /// The virtual model stored for a field.
    pub fn virtual_model(&self, field: usize) -> Option<VirtualModelRecord> {
        self.virtual_models
            .get(&field)
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// How many times has a lock been taken on this source?
    pub fn num_locks_taken(&self) -> usize {
        self.num_locks_taken
    }

    /// All buffers of the current selection.
    pub fn selected_buffers(&self) -> impl Iterator<Item = &VisibilityBuffer> {
        self.selected.iter().flatten()
    }
}

impl VisSource for MemoryVisSource {
    fn mode(&self) -> DataMode {
        self.mode
    }

    fn select(&mut self, selection: &VisSelection) -> Result<usize, VisError> {
        let selected: Vec<Vec<VisibilityBuffer>> = self
            .all
            .iter()
            .map(|chunk| chunk.iter().filter_map(|vb| selection.apply(vb)).collect())
            .filter(|chunk: &Vec<VisibilityBuffer>| !chunk.is_empty())
            .collect();
        let num_rows = selected.iter().flatten().map(|vb| vb.num_rows()).sum();
        if num_rows == 0 {
            return Err(VisError::InvalidSelection(selection.describe()));
        }
        debug!(
            "Selected {num_rows} rows in {} chunks ({})",
            selected.len(),
            selection.describe()
        );

        self.model_column = selected
            .iter()
            .map(|chunk| vec![None; chunk.len()])
            .collect();
        self.selected = selected;
        self.chunk = 0;
        self.index = 0;
        Ok(num_rows)
    }

    fn num_selected_rows(&self) -> usize {
        self.selected_buffers().map(|vb| vb.num_rows()).sum()
    }

    fn has_corrected(&self) -> bool {
        self.selected_buffers().all(|vb| vb.corrected.is_some())
    }

    fn lock(&mut self) -> Result<(), VisError> {
        self.lock_depth += 1;
        self.num_locks_taken += 1;
        Ok(())
    }

    fn unlock(&mut self) {
        self.lock_depth = self.lock_depth.saturating_sub(1);
    }

    fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    fn origin_chunks(&mut self) {
        self.chunk = 0;
        self.index = 0;
    }

    fn more_chunks(&self) -> bool {
        self.chunk < self.selected.len()
    }

    fn next_chunk(&mut self) {
        self.chunk += 1;
        self.index = 0;
    }

    fn origin(&mut self) {
        self.index = 0;
    }

    fn more(&self) -> bool {
        self.selected
            .get(self.chunk)
            .map(|chunk| self.index < chunk.len())
            .unwrap_or(false)
    }

    fn next_buffer(&mut self) {
        self.index += 1;
    }

    fn buffer(&self) -> Option<&VisibilityBuffer> {
        self.selected.get(self.chunk)?.get(self.index)
    }

    fn buffer_mut(&mut self) -> Option<&mut VisibilityBuffer> {
        self.selected.get_mut(self.chunk)?.get_mut(self.index)
    }

    fn write_model_column(&mut self) -> Result<(), VisError> {
        if self.mode != DataMode::ScratchModelColumn {
            return Err(VisError::ReadOnly);
        }
        if !self.is_locked() {
            return Err(VisError::NotLocked);
        }
        let model = self.buffer().ok_or(VisError::NoBuffer)?.model.clone();
        let slot = self
            .model_column
            .get_mut(self.chunk)
            .and_then(|chunk| chunk.get_mut(self.index))
            .ok_or(VisError::NoBuffer)?;
        *slot = Some(model);
        Ok(())
    }

    fn save_virtual_model(
        &mut self,
        field: usize,
        record: &VirtualModelRecord,
    ) -> Result<(), VisError> {
        if self.mode != DataMode::VirtualModel {
            return Err(VisError::ReadOnly);
        }
        if !self.is_locked() {
            return Err(VisError::NotLocked);
        }
        let s = serde_json::to_string(record)?;
        self.virtual_models.insert(field, s);
        Ok(())
    }
}
