//! Forward-reference labels.
//!
//! Labels live in an arena owned by the [`Assembler`](super::Assembler) and
//! are referred to by [`LabelId`]. A label is either unbound, collecting the
//! code positions of branches that still need its address, or bound to a
//! final position that never changes.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);

impl LabelId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Observable state of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelState {
    Unbound { pending_patches: usize },
    Bound(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct LabelData {
    pub(crate) name: String,
    /// -1 while unbound.
    pub(crate) position: i64,
    pub(crate) patch_sites: Vec<usize>,
    /// Next label in the assembler's pending-patch list.
    pub(crate) next_pending: Option<LabelId>,
    pub(crate) in_pending_list: bool,
}

impl LabelData {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            position: -1,
            patch_sites: Vec::new(),
            next_pending: None,
            in_pending_list: false,
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.position >= 0
    }

    pub(crate) fn state(&self) -> LabelState {
        if self.is_bound() {
            LabelState::Bound(self.position as usize)
        } else {
            LabelState::Unbound {
                pending_patches: self.patch_sites.len(),
            }
        }
    }

    /// Drop the recorded sites and leave the pending list.
    pub(crate) fn clear_patches(&mut self) {
        self.patch_sites.clear();
        self.next_pending = None;
        self.in_pending_list = false;
    }

    pub(crate) fn unbind(&mut self) {
        self.position = -1;
    }
}
