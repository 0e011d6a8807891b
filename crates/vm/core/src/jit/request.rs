//! Compile requests and the waiters blocked on them.
//!
//! A request is resolved exactly once. Completing it signals its waiter;
//! dropping it unresolved signals the waiter with
//! [`CompileOutcome::Abandoned`], so a blocked thread always wakes up.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::types::CompileOutcome;
use crate::machine_code::MachineCode;
use crate::scope::BlockEnvironment;
use crate::value::ClassId;

/// One-shot rendezvous between a requester and the compiler.
#[derive(Debug, Default)]
pub struct Waiter {
    outcome: Mutex<Option<CompileOutcome>>,
    signaled: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `outcome` and wake every waiting thread. Only the first
    /// signal counts; later ones return `false` and change nothing.
    pub fn signal(&self, outcome: CompileOutcome) -> bool {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut slot = self.outcome.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.signaled.notify_all();
        true
    }

    pub fn outcome(&self) -> Option<CompileOutcome> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let slot = self.outcome.lock().unwrap();
        *slot
    }

    /// Block until signaled.
    pub fn wait(&self) -> CompileOutcome {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let mut slot = self.outcome.lock().unwrap();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
            {
                slot = self.signaled.wait(slot).unwrap();
            }
        }
    }

    /// Block until signaled or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CompileOutcome> {
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let slot = self.outcome.lock().unwrap();
        #[expect(clippy::unwrap_used, reason = "Mutex poisoning is unrecoverable")]
        let (slot, _) = self
            .signaled
            .wait_timeout_while(slot, timeout, |outcome| outcome.is_none())
            .unwrap();
        *slot
    }
}

/// A request to compile one method, optionally specialized for a receiver
/// type or a block environment.
#[derive(Debug)]
pub struct CompileRequest {
    method: Arc<MachineCode>,
    receiver_class: Option<ClassId>,
    block_env: Option<Arc<BlockEnvironment>>,
    hits: u64,
    is_block: bool,
    waiter: Option<Arc<Waiter>>,
}

impl CompileRequest {
    pub fn create(
        method: Arc<MachineCode>,
        receiver_class: Option<ClassId>,
        hits: u64,
        block_env: Option<Arc<BlockEnvironment>>,
        is_block: bool,
    ) -> Self {
        Self {
            method,
            receiver_class,
            block_env,
            hits,
            is_block,
            waiter: None,
        }
    }

    pub fn set_waiter(&mut self, waiter: Arc<Waiter>) {
        self.waiter = Some(waiter);
    }

    pub fn waiter(&self) -> Option<&Arc<Waiter>> {
        self.waiter.as_ref()
    }

    pub fn method(&self) -> &Arc<MachineCode> {
        &self.method
    }

    pub fn receiver_class(&self) -> Option<ClassId> {
        self.receiver_class
    }

    pub fn block_env(&self) -> Option<&Arc<BlockEnvironment>> {
        self.block_env.as_ref()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn is_block(&self) -> bool {
        self.is_block
    }

    /// Resolve the request. Returns `false` if it was already resolved.
    pub fn complete(&self, outcome: CompileOutcome) -> bool {
        match &self.waiter {
            Some(waiter) => waiter.signal(outcome),
            None => true,
        }
    }
}

impl Drop for CompileRequest {
    fn drop(&mut self) {
        if let Some(waiter) = &self.waiter
            && waiter.signal(CompileOutcome::Abandoned)
        {
            tracing::warn!(
                method = %self.method.name(),
                hits = self.hits,
                "compile request dropped before completion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine_code::CompiledCode;
    use crate::opcodes::Opcode;

    fn request() -> CompileRequest {
        let code = CompiledCode::new(
            "hot",
            vec![i64::from(Opcode::PushNil), i64::from(Opcode::Ret)],
            vec![],
        );
        let method = code.internalize().unwrap();
        CompileRequest::create(method, Some(ClassId::INTEGER), 10, None, false)
    }

    #[test]
    fn test_waiter_is_signaled_once() {
        let waiter = Waiter::new();
        assert!(waiter.signal(CompileOutcome::Compiled));
        assert!(!waiter.signal(CompileOutcome::Failed));
        assert_eq!(waiter.wait(), CompileOutcome::Compiled);
    }

    #[test]
    fn test_dropping_an_unresolved_request_abandons_it() {
        let waiter = Arc::new(Waiter::new());
        let mut req = request();
        req.set_waiter(Arc::clone(&waiter));
        drop(req);
        assert_eq!(waiter.outcome(), Some(CompileOutcome::Abandoned));
    }

    #[test]
    fn test_completed_request_keeps_its_outcome_on_drop() {
        let waiter = Arc::new(Waiter::new());
        let mut req = request();
        req.set_waiter(Arc::clone(&waiter));
        assert!(req.complete(CompileOutcome::Failed));
        drop(req);
        assert_eq!(waiter.outcome(), Some(CompileOutcome::Failed));
    }

    #[test]
    fn test_wait_blocks_until_another_thread_signals() {
        let waiter = Arc::new(Waiter::new());
        let signaler = Arc::clone(&waiter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaler.signal(CompileOutcome::Compiled)
        });
        assert_eq!(waiter.wait(), CompileOutcome::Compiled);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_timeout_without_signal() {
        let waiter = Waiter::new();
        assert_eq!(waiter.wait_timeout(Duration::from_millis(5)), None);
    }
}
