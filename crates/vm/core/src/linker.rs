//! Bytecode linking.
//!
//! Linking turns a method's raw instruction stream into a
//! [`LinkedProgram`] in two passes. The first pass decodes every
//! instruction and counts the reference slots. The second pass patches
//! operands and creates the per-instruction runtime objects:
//!
//! - register operands are offset past the working stack,
//! - literal operands are replaced by the literal values,
//! - tagged-nil operands are replaced by nils carrying their origin,
//! - dispatch instructions get call sites, constant reads get caches,
//!   unwind instructions get unwind sites and `m_counter` gets a counter.

use crate::call_site::{CallKind, CallSite, SiteId};
use crate::constant_cache::ConstantCache;
use crate::diagnostics;
use crate::errors::LinkError;
use crate::machine_code::{CompiledCode, MachineCode};
use crate::opcodes::Opcode;
use crate::program::{LinkedProgram, ProgramBuilder, Word};
use crate::unwind_site::{UnwindKind, UnwindSite};
use crate::value::{MethodId, NilOrigin, Symbol, Value};

use std::sync::Arc;

/// Link `code` and publish the result on `machine_code`.
///
/// A method is linked at most once; linking again is an error.
pub fn prepare(code: &CompiledCode, machine_code: &MachineCode) -> Result<(), LinkError> {
    if machine_code.is_linked() {
        return Err(LinkError::AlreadyLinked(code.name().clone()));
    }
    let program = link(code, machine_code.id())?;
    machine_code.publish_initial(Arc::new(program))
}

/// Link `code` for the method identified by `method` without publishing.
pub fn link(code: &CompiledCode, method: MethodId) -> Result<LinkedProgram, LinkError> {
    let raw = code.iseq();
    let total = raw.len();

    let mut words = Vec::with_capacity(total);
    let mut rcount = 0usize;
    let mut ip = 0usize;
    while ip < total {
        let opcode = decode(raw, ip)?;
        words.push(Word::Op(opcode));
        words.extend(
            raw.iter()
                .skip(ip.saturating_add(1))
                .take(opcode.width().saturating_sub(1))
                .map(|&operand| Word::Imm(operand)),
        );
        if opcode.needs_reference() {
            rcount = rcount.saturating_add(1);
        }
        ip = ip.saturating_add(opcode.width());
    }

    let mut linker = Linker {
        code,
        method,
        raw,
        builder: ProgramBuilder::new(method, code.name().clone(), words, rcount),
        allow_private: false,
        is_super: false,
    };

    ip = 0;
    while ip < total {
        let opcode = decode(raw, ip)?;
        linker.offset_registers(opcode, ip)?;
        linker.resolve(opcode, ip)?;
        ip = ip.saturating_add(opcode.width());
    }

    let program = linker.builder.finish()?;
    tracing::debug!(
        method = %code.name(),
        id = %method,
        words = total,
        references = rcount,
        call_sites = program.call_site_count(),
        constant_caches = program.constant_cache_count(),
        unwind_sites = program.unwind_site_count(),
        "linked method"
    );
    Ok(program)
}

fn decode(raw: &[i64], ip: usize) -> Result<Opcode, LinkError> {
    let word = raw.get(ip).copied().ok_or(LinkError::InvalidOperand { ip, value: -1 })?;
    let opcode = Opcode::try_from(word).map_err(|word| LinkError::InvalidOpcode { ip, word })?;
    if ip.saturating_add(opcode.width()) > raw.len() {
        return Err(LinkError::Truncated {
            ip,
            opcode,
            width: opcode.width(),
            len: raw.len(),
        });
    }
    Ok(opcode)
}

struct Linker<'a> {
    code: &'a CompiledCode,
    method: MethodId,
    raw: &'a [i64],
    builder: ProgramBuilder,
    // Set by `allow_private`; applies to the next dispatch instruction only.
    allow_private: bool,
    is_super: bool,
}

impl Linker<'_> {
    fn operand(&self, at: usize) -> Result<i64, LinkError> {
        self.raw
            .get(at)
            .copied()
            .ok_or(LinkError::InvalidOperand { ip: at, value: -1 })
    }

    fn index_operand(&self, at: usize) -> Result<usize, LinkError> {
        let value = self.operand(at)?;
        usize::try_from(value).map_err(|_| LinkError::InvalidOperand { ip: at, value })
    }

    fn literal(&self, at: usize) -> Result<Value, LinkError> {
        let index = self.operand(at)?;
        let literals = self.code.literals();
        usize::try_from(index)
            .ok()
            .and_then(|i| literals.get(i))
            .cloned()
            .ok_or(LinkError::LiteralOutOfRange {
                ip: at,
                index,
                len: literals.len(),
            })
    }

    fn symbol_literal(&self, at: usize) -> Result<Symbol, LinkError> {
        match self.literal(at)? {
            Value::Symbol(symbol) => Ok(symbol),
            _ => Err(LinkError::LiteralKind {
                ip: at,
                expected: "a symbol",
            }),
        }
    }

    fn offset_register(&mut self, at: usize) -> Result<(), LinkError> {
        let value = self.operand(at)?;
        let stack_size = i64::try_from(self.code.stack_size())
            .map_err(|_| LinkError::InvalidOperand { ip: at, value })?;
        let offset = if value < 0 {
            None
        } else {
            value.checked_add(stack_size)
        };
        let offset = offset.ok_or(LinkError::InvalidOperand { ip: at, value })?;
        self.builder.set_word(at, Word::Imm(offset))
    }

    fn tagged_nil(&self, ip: usize) -> Word {
        Word::Ref(Value::TaggedNil(NilOrigin {
            method: self.method,
            ip,
        }))
    }

    fn site(&self, ip: usize) -> SiteId {
        SiteId {
            method: self.method,
            ip,
        }
    }

    fn offset_registers(&mut self, opcode: Opcode, ip: usize) -> Result<(), LinkError> {
        use Opcode::*;
        let first = ip.saturating_add(1);
        let second = ip.saturating_add(2);
        let third = ip.saturating_add(3);
        match opcode {
            BIfSerial => self.offset_register(second),
            BIf | RLoadLocal | RStoreLocal | RLoadLocalDepth | RStoreLocalDepth | RLoadStack
            | RStoreStack | RLoadSelf | RLoadNeg1 | RLoad0 | RLoad1 | RLoad2 | RLoadFalse
            | RLoadTrue | RRet | MLog => self.offset_register(first),
            RLoadNil => {
                self.offset_register(first)?;
                let tag = self.tagged_nil(ip);
                self.builder.set_word(second, tag)
            }
            RLoadLiteral => {
                self.builder.record_reference(second);
                let value = self.literal(second)?;
                self.builder.set_word(second, Word::Ref(value))?;
                self.offset_register(first)
            }
            NIneg | NIinc | NIdec | NInot | NDneg | RCopy => {
                self.offset_register(first)?;
                self.offset_register(second)
            }
            NIadd | NIsub | NImul | NIdiv | NImod | NIeq | NIne | NIlt | NIle | NIgt | NIge
            | NDadd | NDsub | NDmul | NDdiv | NDlt => {
                self.offset_register(first)?;
                self.offset_register(second)?;
                self.offset_register(third)
            }
            _ => Ok(()),
        }
    }

    fn resolve(&mut self, opcode: Opcode, ip: usize) -> Result<(), LinkError> {
        use Opcode::*;
        let first = ip.saturating_add(1);
        match opcode {
            PushInt => {
                let value = self.operand(first)?;
                self.builder.set_word(first, Word::Ref(Value::Integer(value)))?;
            }
            PushTaggedNil => {
                let tag = self.tagged_nil(ip);
                self.builder.set_word(first, tag)?;
            }
            CreateBlock => {
                self.builder.record_reference(first);
                let value = self.literal(first)?;
                if !matches!(value, Value::Code(_)) {
                    return Err(LinkError::LiteralKind {
                        ip: first,
                        expected: "compiled code",
                    });
                }
                self.builder.set_word(first, Word::Ref(value))?;
            }
            PushMemo | PushLiteral => {
                self.builder.record_reference(first);
                let value = self.literal(first)?;
                self.builder.set_word(first, Word::Ref(value))?;
            }
            SetIvar | PushIvar | SetConst | SetConstAt => {
                let name = self.symbol_literal(first)?;
                self.builder.set_word(first, Word::Ref(Value::Symbol(name)))?;
            }
            AllowPrivate => self.allow_private = true,
            op if op.is_dispatch() => self.install_call_site(op, ip)?,
            PushConst | FindConst => {
                self.builder.record_reference(first);
                let name = self.symbol_literal(first)?;
                let cache = ConstantCache::empty(name.clone(), self.site(ip));
                self.builder.install_constant_cache(ip, cache);
                self.builder.set_word(first, Word::Ref(Value::Symbol(name)))?;
            }
            SetupUnwind => {
                self.builder.record_reference(first);
                let handler = self.index_operand(first)?;
                let kind = UnwindKind::from_operand(
                    ip.saturating_add(2),
                    self.operand(ip.saturating_add(2))?,
                )?;
                self.builder
                    .install_unwind_site(ip, UnwindSite::new(handler, kind));
            }
            Unwind => {
                self.builder.record_reference(first);
                self.builder
                    .install_unwind_site(ip, UnwindSite::new(0, UnwindKind::None));
            }
            MCounter => {
                self.builder
                    .install_measurement(ip, diagnostics::counter(self.method, ip));
            }
            _ => {}
        }
        Ok(())
    }

    fn install_call_site(&mut self, opcode: Opcode, ip: usize) -> Result<(), LinkError> {
        let first = ip.saturating_add(1);
        if opcode.is_super_dispatch() {
            self.is_super = true;
        }
        self.builder.record_reference(first);

        let name = self.symbol_literal(first)?;
        if matches!(
            opcode,
            Opcode::SendVcall | Opcode::ObjectToS | Opcode::BIfSerial | Opcode::CheckSerialPrivate
        ) {
            self.allow_private = true;
        }

        let Some(kind) = CallKind::for_opcode(opcode) else {
            return Ok(());
        };
        let site = CallSite::create(name.clone(), kind, self.site(ip))
            .with_private(self.allow_private)
            .with_super(self.is_super);
        self.builder.install_call_site(ip, site);
        self.builder
            .set_word(first, Word::Ref(Value::Symbol(name)))?;

        self.is_super = false;
        self.allow_private = false;
        Ok(())
    }
}
