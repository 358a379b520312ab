//! The chain of directory-table revisions behind undo/redo.
//!
//! Every commit writes a fresh table and records a [`Revision`]. Moving the
//! "current" index back and forth is all undo and redo need to do; committing
//! after an undo drops everything forward of the current revision.

use serde::{Deserialize, Serialize};

use super::format::WadHeader;
use crate::{FsError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub header: WadHeader,
    /// Logical end of file once this revision's table was written.
    pub eof: u64,
}

#[derive(Debug, Clone)]
pub struct RevisionChain {
    revisions: Vec<Revision>,
    current: usize,
}

impl RevisionChain {
    pub fn new(first: Revision) -> Self {
        Self {
            revisions: vec![first],
            current: 0,
        }
    }

    pub fn current(&self) -> &Revision {
        &self.revisions[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<&Revision> {
        self.revisions.get(index)
    }

    pub fn can_undo(&self) -> usize {
        self.current
    }

    pub fn can_redo(&self) -> usize {
        self.revisions.len() - 1 - self.current
    }

    /// Index of the revision `levels` steps back.
    pub fn undo_target(&self, levels: usize) -> Result<usize> {
        let available = self.can_undo();
        if levels > available {
            return Err(FsError::NoHistory {
                requested: levels,
                available,
            });
        }
        Ok(self.current - levels)
    }

    /// Index of the revision `levels` steps forward.
    pub fn redo_target(&self, levels: usize) -> Result<usize> {
        let available = self.can_redo();
        if levels > available {
            return Err(FsError::NoHistory {
                requested: levels,
                available,
            });
        }
        Ok(self.current + levels)
    }

    pub fn set_current(&mut self, index: usize) {
        debug_assert!(index < self.revisions.len());
        self.current = index;
    }

    /// Drop all redo history.
    pub fn truncate_forward(&mut self) {
        self.revisions.truncate(self.current + 1);
    }

    /// Drop redo history and make `revision` the new current one.
    pub fn push(&mut self, revision: Revision) {
        self.truncate_forward();
        self.revisions.push(revision);
        self.current = self.revisions.len() - 1;
    }

    /// Drop all undo history.
    pub fn discard_backward(&mut self) {
        self.revisions.drain(..self.current);
        self.current = 0;
    }
}

#[cfg(test)]
mod test_revision {
    use super::*;

    fn rev(n: u32) -> Revision {
        Revision {
            header: WadHeader::empty_pwad(n),
            eof: u64::from(n),
        }
    }

    #[test]
    fn test_push_discards_redo() {
        let mut chain = RevisionChain::new(rev(1));
        chain.push(rev(2));
        chain.push(rev(3));
        assert_eq!(chain.can_undo(), 2);

        let target = chain.undo_target(2).unwrap();
        chain.set_current(target);
        assert_eq!(chain.can_redo(), 2);

        chain.push(rev(4));
        assert_eq!(chain.can_redo(), 0);
        assert_eq!(chain.can_undo(), 1);
        assert_eq!(chain.current(), &rev(4));
    }

    #[test]
    fn test_out_of_history() {
        let chain = RevisionChain::new(rev(1));
        assert!(matches!(
            chain.undo_target(1),
            Err(FsError::NoHistory {
                requested: 1,
                available: 0
            })
        ));
        assert!(chain.redo_target(1).is_err());
        assert_eq!(chain.undo_target(0).unwrap(), 0);
    }

    #[test]
    fn test_discard_backward() {
        let mut chain = RevisionChain::new(rev(1));
        chain.push(rev(2));
        chain.push(rev(3));
        chain.discard_backward();
        assert_eq!(chain.can_undo(), 0);
        assert_eq!(chain.current(), &rev(3));
        assert!(chain.get(1).is_none());
    }
}
