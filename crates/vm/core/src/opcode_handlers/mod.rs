//! Instruction handlers, one file per instruction family.
//!
//! Every handler has the shape `fn(&mut State, &mut CallFrame) ->
//! Result<OpcodeResult, VMError>` and is reached through the table built in
//! `opcodes.rs`. Operands are read relative to `frame.op_ip`; `frame.ip`
//! already points at the next instruction when a handler runs.

pub mod arithmetic;
pub mod comparison;
pub mod constants;
pub mod control;
pub mod registers;
pub mod send;
pub mod stack;
pub mod unwind;
