//! Linked, immutable programs.
//!
//! A [`LinkedProgram`] is what the dispatcher runs: the decoded
//! instruction stream with literals resolved and registers offset, plus
//! the side tables of call sites, constant caches, unwind sites and
//! measurements keyed by instruction offset. It is assembled through a
//! [`ProgramBuilder`] and never mutated after `finish`.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::call_site::CallSite;
use crate::constant_cache::ConstantCache;
use crate::diagnostics::Counter;
use crate::errors::LinkError;
use crate::opcodes::Opcode;
use crate::unwind_site::UnwindSite;
use crate::value::{MethodId, Symbol, Value};

/// One word of a linked stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Word {
    Op(Opcode),
    Imm(i64),
    /// A value resolved at link time.
    Ref(Value),
}

impl Word {
    pub fn as_imm(&self) -> Option<i64> {
        match self {
            Word::Imm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&Value> {
        match self {
            Word::Ref(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct LinkedProgram {
    method: MethodId,
    name: Symbol,
    words: Vec<Word>,
    references: Box<[usize]>,
    call_sites: FxHashMap<usize, Arc<CallSite>>,
    constant_caches: FxHashMap<usize, Arc<ConstantCache>>,
    unwind_sites: FxHashMap<usize, UnwindSite>,
    measurements: FxHashMap<usize, Arc<Counter>>,
}

impl LinkedProgram {
    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, ip: usize) -> Option<&Word> {
        self.words.get(ip)
    }

    /// Opcode at `ip`, `None` if `ip` is out of range or mid-instruction.
    pub fn opcode(&self, ip: usize) -> Option<Opcode> {
        match self.words.get(ip)? {
            Word::Op(op) => Some(*op),
            _ => None,
        }
    }

    /// Offsets of every word that refers to a linked object, in stream
    /// order.
    pub fn references(&self) -> &[usize] {
        &self.references
    }

    pub fn call_site(&self, ip: usize) -> Option<&Arc<CallSite>> {
        self.call_sites.get(&ip)
    }

    pub fn constant_cache(&self, ip: usize) -> Option<&Arc<ConstantCache>> {
        self.constant_caches.get(&ip)
    }

    pub fn unwind_site(&self, ip: usize) -> Option<UnwindSite> {
        self.unwind_sites.get(&ip).copied()
    }

    pub fn measurement(&self, ip: usize) -> Option<&Arc<Counter>> {
        self.measurements.get(&ip)
    }

    /// Call sites ordered by instruction offset.
    pub fn call_sites(&self) -> Vec<&Arc<CallSite>> {
        let mut sites: Vec<_> = self.call_sites.values().collect();
        sites.sort_by_key(|site| site.ip());
        sites
    }

    pub fn call_site_count(&self) -> usize {
        self.call_sites.len()
    }

    pub fn constant_cache_count(&self) -> usize {
        self.constant_caches.len()
    }

    pub fn unwind_site_count(&self) -> usize {
        self.unwind_sites.len()
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.len()
    }
}

/// The only way to construct a [`LinkedProgram`].
#[derive(Debug)]
pub struct ProgramBuilder {
    method: MethodId,
    name: Symbol,
    words: Vec<Word>,
    reference_capacity: usize,
    references: Vec<usize>,
    call_sites: FxHashMap<usize, Arc<CallSite>>,
    constant_caches: FxHashMap<usize, Arc<ConstantCache>>,
    unwind_sites: FxHashMap<usize, UnwindSite>,
    measurements: FxHashMap<usize, Arc<Counter>>,
}

impl ProgramBuilder {
    /// Start from the decoded stream. `reference_capacity` is the number of
    /// reference slots counted ahead of time; `finish` checks it was met.
    pub fn new(method: MethodId, name: Symbol, words: Vec<Word>, reference_capacity: usize) -> Self {
        Self {
            method,
            name,
            words,
            reference_capacity,
            references: Vec::with_capacity(reference_capacity),
            call_sites: FxHashMap::default(),
            constant_caches: FxHashMap::default(),
            unwind_sites: FxHashMap::default(),
            measurements: FxHashMap::default(),
        }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn word(&self, ip: usize) -> Option<&Word> {
        self.words.get(ip)
    }

    /// Replace the word at `ip`. Out-of-range offsets are an operand error.
    pub fn set_word(&mut self, ip: usize, word: Word) -> Result<(), LinkError> {
        let slot = self
            .words
            .get_mut(ip)
            .ok_or(LinkError::InvalidOperand { ip, value: -1 })?;
        *slot = word;
        Ok(())
    }

    pub fn record_reference(&mut self, ip: usize) {
        self.references.push(ip);
    }

    pub fn install_call_site(&mut self, ip: usize, site: CallSite) {
        self.call_sites.insert(ip, Arc::new(site));
    }

    pub fn install_constant_cache(&mut self, ip: usize, cache: ConstantCache) {
        self.constant_caches.insert(ip, Arc::new(cache));
    }

    pub fn install_unwind_site(&mut self, ip: usize, site: UnwindSite) {
        self.unwind_sites.insert(ip, site);
    }

    pub fn install_measurement(&mut self, ip: usize, counter: Arc<Counter>) {
        self.measurements.insert(ip, counter);
    }

    pub fn finish(self) -> Result<LinkedProgram, LinkError> {
        if self.references.len() != self.reference_capacity {
            return Err(LinkError::ReferenceCountMismatch {
                counted: self.reference_capacity,
                filled: self.references.len(),
            });
        }
        Ok(LinkedProgram {
            method: self.method,
            name: self.name,
            words: self.words,
            references: self.references.into_boxed_slice(),
            call_sites: self.call_sites,
            constant_caches: self.constant_caches,
            unwind_sites: self.unwind_sites,
            measurements: self.measurements,
        })
    }
}
