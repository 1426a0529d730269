// The Assembler couples a code Buffer with the label arena and an architecture-specific
// JumpPatcher. Branches to a label that is not bound yet record their code position with
// add_patch_at; the first such call threads the label onto a singly linked list of labels
// with pending patches, using indices stored in the label records themselves. bind() fixes
// the label's position and asks the patcher to rewrite every recorded site so it reaches
// the new position, then forgets the sites. Bound labels are remembered in bind order.
// Binding twice, binding to a negative position and asking for the position of an unbound
// label are invariant violations. finish() walks the pending list to make sure no branch is
// left pointing at an unbound label before the buffer is closed. reset() only touches the
// labels on the pending list and the bound ones, never the whole arena.

//! Label binder and patcher on top of a [`Buffer`].

use super::buffer::Buffer;
use super::label::{LabelData, LabelId, LabelState};
use crate::core::error::{CompileError, CompileResult};

/// Architecture hook that rewrites the placeholder at a branch site.
pub trait JumpPatcher {
    /// Make the instruction or data slot at `branch` refer to `target`.
    fn patch_jump_target(&self, buffer: &mut Buffer, branch: usize, target: usize) -> CompileResult<()>;
}

/// Patches a 4-byte slot at the site with `target - site`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rel32Patcher;

impl JumpPatcher for Rel32Patcher {
    fn patch_jump_target(&self, buffer: &mut Buffer, branch: usize, target: usize) -> CompileResult<()> {
        let displacement = target as i64 - branch as i64;
        let value = i32::try_from(displacement).map_err(|_| CompileError::BranchTargetOutOfBounds {
            site: branch,
            displacement,
        })?;
        buffer.emit_int_at(branch, value)
    }
}

pub struct Assembler<P: JumpPatcher> {
    buffer: Buffer,
    labels: Vec<LabelData>,
    pending_head: Option<LabelId>,
    bound: Vec<LabelId>,
    patcher: P,
    labels_bound: usize,
    patches_applied: usize,
}

impl<P: JumpPatcher> Assembler<P> {
    pub fn new(buffer: Buffer, patcher: P) -> Self {
        Self {
            buffer,
            labels: Vec::new(),
            pending_head: None,
            bound: Vec::new(),
            patcher,
            labels_bound: 0,
            patches_applied: 0,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub fn position(&self) -> usize {
        self.buffer.position()
    }

    pub fn labels_bound(&self) -> usize {
        self.labels_bound
    }

    pub fn patches_applied(&self) -> usize {
        self.patches_applied
    }

    pub fn create_label(&mut self, name: impl Into<String>) -> LabelId {
        let id = LabelId::new(self.labels.len() as u32);
        self.labels.push(LabelData::new(name.into()));
        id
    }

    fn label(&self, id: LabelId) -> CompileResult<&LabelData> {
        self.labels
            .get(id.index())
            .ok_or(CompileError::UnknownLabel { label: id })
    }

    fn label_mut(&mut self, id: LabelId) -> CompileResult<&mut LabelData> {
        self.labels
            .get_mut(id.index())
            .ok_or(CompileError::UnknownLabel { label: id })
    }

    pub fn label_name(&self, id: LabelId) -> CompileResult<&str> {
        Ok(&self.label(id)?.name)
    }

    pub fn label_state(&self, id: LabelId) -> CompileResult<LabelState> {
        Ok(self.label(id)?.state())
    }

    pub fn is_bound(&self, id: LabelId) -> CompileResult<bool> {
        Ok(self.label(id)?.is_bound())
    }

    /// Bound position of the label.
    pub fn label_position(&self, id: LabelId) -> CompileResult<usize> {
        let label = self.label(id)?;
        if !label.is_bound() {
            return Err(CompileError::LabelUnbound {
                label: id,
                name: label.name.clone(),
            });
        }
        Ok(label.position as usize)
    }

    /// Record a branch at `site` that must be patched when `id` is bound.
    pub fn add_patch_at(&mut self, id: LabelId, site: usize) -> CompileResult<()> {
        let head = self.pending_head;
        let label = self.label_mut(id)?;
        if label.is_bound() {
            return Err(CompileError::LabelAlreadyBound {
                label: id,
                name: label.name.clone(),
                position: label.position as usize,
            });
        }
        label.patch_sites.push(site);
        if !label.in_pending_list {
            label.in_pending_list = true;
            label.next_pending = head;
            self.pending_head = Some(id);
        }
        log::trace!("patch site {} waits for {}", site, id);
        Ok(())
    }

    /// Bind `id` to `position` and patch every branch waiting for it.
    pub fn bind(&mut self, id: LabelId, position: i64) -> CompileResult<()> {
        let label = self.label_mut(id)?;
        if label.is_bound() {
            return Err(CompileError::LabelAlreadyBound {
                label: id,
                name: label.name.clone(),
                position: label.position as usize,
            });
        }
        if position < 0 {
            return Err(CompileError::NegativeLabelPosition { label: id, position });
        }
        label.position = position;
        let sites = std::mem::take(&mut label.patch_sites);
        log::debug!("bind {} ({}) at {:#x}, {} pending", id, label.name, position, sites.len());
        for &site in &sites {
            self.patcher
                .patch_jump_target(&mut self.buffer, site, position as usize)?;
        }
        self.bound.push(id);
        self.labels_bound += 1;
        self.patches_applied += sites.len();
        Ok(())
    }

    /// Bind `id` at the current buffer position.
    pub fn bind_here(&mut self, id: LabelId) -> CompileResult<()> {
        let position = self.buffer.position() as i64;
        self.bind(id, position)
    }

    /// Labels on the pending list that are still unbound, most recent first.
    pub fn unresolved_labels(&self) -> Vec<LabelId> {
        let mut unresolved = Vec::new();
        let mut cursor = self.pending_head;
        while let Some(id) = cursor {
            let Some(label) = self.labels.get(id.index()) else {
                break;
            };
            if !label.is_bound() && !label.patch_sites.is_empty() {
                unresolved.push(id);
            }
            cursor = label.next_pending;
        }
        unresolved
    }

    /// Return every label to the unbound state and clear the buffer.
    pub fn reset(&mut self) {
        let mut cursor = self.pending_head.take();
        while let Some(id) = cursor {
            let Some(label) = self.labels.get_mut(id.index()) else {
                break;
            };
            cursor = label.next_pending;
            label.clear_patches();
        }
        for id in self.bound.drain(..) {
            if let Some(label) = self.labels.get_mut(id.index()) {
                label.unbind();
            }
        }
        self.buffer.reset();
    }

    /// Check that no branch still waits for a label, then close the buffer.
    pub fn finish(&mut self, trim: bool) -> CompileResult<Vec<u8>> {
        if let Some(&id) = self.unresolved_labels().first() {
            let label = self.label(id)?;
            return Err(CompileError::LabelUnbound {
                label: id,
                name: label.name.clone(),
            });
        }
        self.buffer.close(trim)
    }
}
