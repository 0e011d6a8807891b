//! Method-update brackets.
//!
//! Installing compiled code or a relinked program is staged inside a
//! bracket opened by [`JitState::start_method_update`] and published all
//! at once by [`JitState::end_method_update`]. Brackets are mutually
//! exclusive. A bracket dropped without being ended publishes nothing.
//!
//! [`JitState::start_method_update`]: super::dispatch::JitState::start_method_update
//! [`JitState::end_method_update`]: super::dispatch::JitState::end_method_update

use std::sync::{Arc, MutexGuard};

use super::types::NativeCode;
use crate::machine_code::MachineCode;
use crate::program::LinkedProgram;

enum StagedChange {
    Native {
        method: Arc<MachineCode>,
        code: Arc<NativeCode>,
    },
    Program {
        method: Arc<MachineCode>,
        program: Arc<LinkedProgram>,
    },
}

/// An open bracket. Holds the update lock until ended or dropped.
pub struct MethodUpdate<'a> {
    _guard: MutexGuard<'a, ()>,
    staged: Vec<StagedChange>,
}

impl<'a> MethodUpdate<'a> {
    pub(crate) fn begin(guard: MutexGuard<'a, ()>) -> Self {
        Self {
            _guard: guard,
            staged: Vec::new(),
        }
    }

    /// Stage a native entry for `method`.
    pub fn install_native(&mut self, method: &Arc<MachineCode>, code: NativeCode) {
        self.staged.push(StagedChange::Native {
            method: Arc::clone(method),
            code: Arc::new(code),
        });
    }

    /// Stage a new program version for `method`. Frames already executing
    /// the method finish on the version they started with.
    pub fn replace_program(&mut self, method: &Arc<MachineCode>, program: LinkedProgram) {
        self.staged.push(StagedChange::Program {
            method: Arc::clone(method),
            program: Arc::new(program),
        });
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Publish every staged change, in staging order, and release the lock.
    pub(crate) fn commit(self) -> usize {
        let count = self.staged.len();
        for change in self.staged {
            match change {
                StagedChange::Native { method, code } => method.install_native(code),
                StagedChange::Program { method, program } => method.replace_program(program),
            }
        }
        count
    }
}

impl std::fmt::Debug for MethodUpdate<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodUpdate")
            .field("staged", &self.staged.len())
            .finish()
    }
}
