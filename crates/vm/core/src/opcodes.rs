use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    errors::{InternalError, OpcodeResult, VMError},
    frame::CallFrame,
    interpreter::Interpreter,
    state::State,
};

/// Instruction set of the interpreter.
///
/// Each instruction occupies `width()` words in a method's stream: the
/// opcode word followed by its operands.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, EnumString, Display, IntoStaticStr,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Opcode {
    // Stack operations
    Noop = 0x00,
    PushNil = 0x01,
    PushTrue = 0x02,
    PushFalse = 0x03,
    PushSelf = 0x04,
    PushInt = 0x05,
    PushTaggedNil = 0x06,
    PushLiteral = 0x07,
    PushMemo = 0x08,
    Pop = 0x09,
    DupTop = 0x0A,
    Swap = 0x0B,
    MakeArray = 0x0C,
    CreateBlock = 0x0D,
    PushIvar = 0x0E,
    SetIvar = 0x0F,

    // Stack arithmetic
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    LessThan = 0x13,
    Equal = 0x14,

    // Control flow
    Goto = 0x18,
    GotoIfTrue = 0x19,
    GotoIfFalse = 0x1A,
    Ret = 0x1B,

    // Constants
    PushConst = 0x20,
    FindConst = 0x21,
    SetConst = 0x22,
    SetConstAt = 0x23,

    // Dispatch
    AllowPrivate = 0x28,
    SendMethod = 0x29,
    SendStack = 0x2A,
    SendStackWithBlock = 0x2B,
    SendStackWithSplat = 0x2C,
    SendVcall = 0x2D,
    SendSuperStackWithBlock = 0x2E,
    SendSuperStackWithSplat = 0x2F,
    Zsuper = 0x30,
    ObjectToS = 0x31,
    CheckSerial = 0x32,
    CheckSerialPrivate = 0x33,
    YieldStack = 0x34,

    // Unwinding
    SetupUnwind = 0x38,
    Unwind = 0x39,
    RaiseExc = 0x3A,
    Reraise = 0x3B,
    PushCurrentException = 0x3C,
    ClearException = 0x3D,

    // Register branches
    BIf = 0x40,
    BIfSerial = 0x41,

    // Register loads and stores
    RLoadLocal = 0x48,
    RStoreLocal = 0x49,
    RLoadLocalDepth = 0x4A,
    RStoreLocalDepth = 0x4B,
    RLoadStack = 0x4C,
    RStoreStack = 0x4D,
    RLoadSelf = 0x4E,
    RLoadNeg1 = 0x4F,
    #[strum(serialize = "r_load_0")]
    RLoad0 = 0x50,
    #[strum(serialize = "r_load_1")]
    RLoad1 = 0x51,
    #[strum(serialize = "r_load_2")]
    RLoad2 = 0x52,
    RLoadFalse = 0x53,
    RLoadTrue = 0x54,
    RLoadNil = 0x55,
    RLoadLiteral = 0x56,
    RRet = 0x57,
    RCopy = 0x58,

    // Native integer operations on registers
    NIneg = 0x60,
    NIinc = 0x61,
    NIdec = 0x62,
    NInot = 0x63,
    NIadd = 0x68,
    NIsub = 0x69,
    NImul = 0x6A,
    NIdiv = 0x6B,
    NImod = 0x6C,
    NIeq = 0x6D,
    NIne = 0x6E,
    NIlt = 0x6F,
    NIle = 0x70,
    NIgt = 0x71,
    NIge = 0x72,

    // Native float operations on registers
    NDadd = 0x78,
    NDsub = 0x79,
    NDmul = 0x7A,
    NDdiv = 0x7B,
    NDlt = 0x7C,
    NDneg = 0x7D,

    // Diagnostics
    MCounter = 0x80,
    MLog = 0x81,
}

impl Opcode {
    /// Number of words the instruction occupies, opcode word included.
    pub const fn width(self) -> usize {
        use Opcode::*;
        match self {
            Noop | PushNil | PushTrue | PushFalse | PushSelf | Pop | DupTop | Swap | Add | Sub
            | Mul | LessThan | Equal | Ret | AllowPrivate | RaiseExc | Reraise
            | PushCurrentException | ClearException | MCounter => 1,

            PushInt | PushTaggedNil | PushLiteral | PushMemo | MakeArray | CreateBlock
            | PushIvar | SetIvar | Goto | GotoIfTrue | GotoIfFalse | PushConst | FindConst
            | SetConst | SetConstAt | SendMethod | SendVcall | Zsuper | ObjectToS | YieldStack
            | Unwind | RLoadStack | RStoreStack | RLoadSelf | RLoadNeg1 | RLoad0 | RLoad1
            | RLoad2 | RLoadFalse | RLoadTrue | RRet | MLog => 2,

            SendStack | SendStackWithBlock | SendStackWithSplat | SendSuperStackWithBlock
            | SendSuperStackWithSplat | CheckSerial | CheckSerialPrivate | SetupUnwind | BIf
            | RLoadLocal | RStoreLocal | RLoadNil | RLoadLiteral | RCopy | NIneg | NIinc
            | NIdec | NInot | NDneg => 3,

            BIfSerial | RLoadLocalDepth | RStoreLocalDepth | NIadd | NIsub | NImul | NIdiv
            | NImod | NIeq | NIne | NIlt | NIle | NIgt | NIge | NDadd | NDsub | NDmul | NDdiv
            | NDlt => 4,
        }
    }

    /// Instructions that occupy a slot in a linked program's reference
    /// table.
    pub const fn needs_reference(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            CreateBlock
                | PushLiteral
                | PushMemo
                | RLoadLiteral
                | SendMethod
                | SendStack
                | SendStackWithBlock
                | SendStackWithSplat
                | SendVcall
                | SendSuperStackWithBlock
                | SendSuperStackWithSplat
                | Zsuper
                | ObjectToS
                | CheckSerial
                | CheckSerialPrivate
                | BIfSerial
                | PushConst
                | FindConst
                | SetupUnwind
                | Unwind
        )
    }

    /// Instructions that get a call site at link time.
    pub const fn is_dispatch(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            SendMethod
                | SendStack
                | SendStackWithBlock
                | SendStackWithSplat
                | SendVcall
                | SendSuperStackWithBlock
                | SendSuperStackWithSplat
                | Zsuper
                | ObjectToS
                | CheckSerial
                | CheckSerialPrivate
                | BIfSerial
        )
    }

    /// Dispatch instructions that resolve against the superclass chain.
    pub const fn is_super_dispatch(self) -> bool {
        matches!(
            self,
            Opcode::SendSuperStackWithBlock | Opcode::SendSuperStackWithSplat | Opcode::Zsuper
        )
    }

    /// Instructions that get a constant cache at link time.
    pub const fn is_constant_access(self) -> bool {
        matches!(self, Opcode::PushConst | Opcode::FindConst)
    }

    /// Instructions that get an unwind site at link time.
    pub const fn is_unwind(self) -> bool {
        matches!(self, Opcode::SetupUnwind | Opcode::Unwind)
    }

    /// Instructions that load an entry of the literal pool.
    pub const fn is_literal_reference(self) -> bool {
        matches!(
            self,
            Opcode::CreateBlock | Opcode::PushLiteral | Opcode::PushMemo | Opcode::RLoadLiteral
        )
    }
}

impl From<Opcode> for u8 {
    #[allow(clippy::as_conversions)]
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

impl From<Opcode> for usize {
    #[allow(clippy::as_conversions)]
    fn from(opcode: Opcode) -> Self {
        opcode as usize
    }
}

impl From<Opcode> for i64 {
    fn from(opcode: Opcode) -> Self {
        i64::from(u8::from(opcode))
    }
}

impl TryFrom<i64> for Opcode {
    type Error = i64;

    /// Decode a raw stream word. Words outside the instruction set are
    /// returned as the error.
    fn try_from(word: i64) -> Result<Self, Self::Error> {
        // A lookup table keeps decoding branch-free for the sparse numbering.
        const OPCODE_TABLE: [Option<Opcode>; 256] = const {
            let mut table = [None; 256];
            table[0x00] = Some(Opcode::Noop);
            table[0x01] = Some(Opcode::PushNil);
            table[0x02] = Some(Opcode::PushTrue);
            table[0x03] = Some(Opcode::PushFalse);
            table[0x04] = Some(Opcode::PushSelf);
            table[0x05] = Some(Opcode::PushInt);
            table[0x06] = Some(Opcode::PushTaggedNil);
            table[0x07] = Some(Opcode::PushLiteral);
            table[0x08] = Some(Opcode::PushMemo);
            table[0x09] = Some(Opcode::Pop);
            table[0x0A] = Some(Opcode::DupTop);
            table[0x0B] = Some(Opcode::Swap);
            table[0x0C] = Some(Opcode::MakeArray);
            table[0x0D] = Some(Opcode::CreateBlock);
            table[0x0E] = Some(Opcode::PushIvar);
            table[0x0F] = Some(Opcode::SetIvar);
            table[0x10] = Some(Opcode::Add);
            table[0x11] = Some(Opcode::Sub);
            table[0x12] = Some(Opcode::Mul);
            table[0x13] = Some(Opcode::LessThan);
            table[0x14] = Some(Opcode::Equal);
            table[0x18] = Some(Opcode::Goto);
            table[0x19] = Some(Opcode::GotoIfTrue);
            table[0x1A] = Some(Opcode::GotoIfFalse);
            table[0x1B] = Some(Opcode::Ret);
            table[0x20] = Some(Opcode::PushConst);
            table[0x21] = Some(Opcode::FindConst);
            table[0x22] = Some(Opcode::SetConst);
            table[0x23] = Some(Opcode::SetConstAt);
            table[0x28] = Some(Opcode::AllowPrivate);
            table[0x29] = Some(Opcode::SendMethod);
            table[0x2A] = Some(Opcode::SendStack);
            table[0x2B] = Some(Opcode::SendStackWithBlock);
            table[0x2C] = Some(Opcode::SendStackWithSplat);
            table[0x2D] = Some(Opcode::SendVcall);
            table[0x2E] = Some(Opcode::SendSuperStackWithBlock);
            table[0x2F] = Some(Opcode::SendSuperStackWithSplat);
            table[0x30] = Some(Opcode::Zsuper);
            table[0x31] = Some(Opcode::ObjectToS);
            table[0x32] = Some(Opcode::CheckSerial);
            table[0x33] = Some(Opcode::CheckSerialPrivate);
            table[0x34] = Some(Opcode::YieldStack);
            table[0x38] = Some(Opcode::SetupUnwind);
            table[0x39] = Some(Opcode::Unwind);
            table[0x3A] = Some(Opcode::RaiseExc);
            table[0x3B] = Some(Opcode::Reraise);
            table[0x3C] = Some(Opcode::PushCurrentException);
            table[0x3D] = Some(Opcode::ClearException);
            table[0x40] = Some(Opcode::BIf);
            table[0x41] = Some(Opcode::BIfSerial);
            table[0x48] = Some(Opcode::RLoadLocal);
            table[0x49] = Some(Opcode::RStoreLocal);
            table[0x4A] = Some(Opcode::RLoadLocalDepth);
            table[0x4B] = Some(Opcode::RStoreLocalDepth);
            table[0x4C] = Some(Opcode::RLoadStack);
            table[0x4D] = Some(Opcode::RStoreStack);
            table[0x4E] = Some(Opcode::RLoadSelf);
            table[0x4F] = Some(Opcode::RLoadNeg1);
            table[0x50] = Some(Opcode::RLoad0);
            table[0x51] = Some(Opcode::RLoad1);
            table[0x52] = Some(Opcode::RLoad2);
            table[0x53] = Some(Opcode::RLoadFalse);
            table[0x54] = Some(Opcode::RLoadTrue);
            table[0x55] = Some(Opcode::RLoadNil);
            table[0x56] = Some(Opcode::RLoadLiteral);
            table[0x57] = Some(Opcode::RRet);
            table[0x58] = Some(Opcode::RCopy);
            table[0x60] = Some(Opcode::NIneg);
            table[0x61] = Some(Opcode::NIinc);
            table[0x62] = Some(Opcode::NIdec);
            table[0x63] = Some(Opcode::NInot);
            table[0x68] = Some(Opcode::NIadd);
            table[0x69] = Some(Opcode::NIsub);
            table[0x6A] = Some(Opcode::NImul);
            table[0x6B] = Some(Opcode::NIdiv);
            table[0x6C] = Some(Opcode::NImod);
            table[0x6D] = Some(Opcode::NIeq);
            table[0x6E] = Some(Opcode::NIne);
            table[0x6F] = Some(Opcode::NIlt);
            table[0x70] = Some(Opcode::NIle);
            table[0x71] = Some(Opcode::NIgt);
            table[0x72] = Some(Opcode::NIge);
            table[0x78] = Some(Opcode::NDadd);
            table[0x79] = Some(Opcode::NDsub);
            table[0x7A] = Some(Opcode::NDmul);
            table[0x7B] = Some(Opcode::NDdiv);
            table[0x7C] = Some(Opcode::NDlt);
            table[0x7D] = Some(Opcode::NDneg);
            table[0x80] = Some(Opcode::MCounter);
            table[0x81] = Some(Opcode::MLog);
            table
        };
        let index = usize::try_from(word).map_err(|_| word)?;
        OPCODE_TABLE.get(index).copied().flatten().ok_or(word)
    }
}

/// Represents an opcode function handler.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpCodeFn(fn(&mut State, &mut CallFrame) -> Result<OpcodeResult, VMError>);

impl OpCodeFn {
    /// Call the opcode handler.
    #[inline(always)]
    pub fn call(self, state: &mut State, frame: &mut CallFrame) -> Result<OpcodeResult, VMError> {
        (self.0)(state, frame)
    }
}

/// Handler table indexed by opcode number.
pub(crate) static OPCODE_TABLE: [OpCodeFn; 256] = Interpreter::build_opcode_table();

impl Interpreter {
    /// Setups the opcode lookup function pointer table.
    ///
    /// This is faster than a conventional match.
    #[allow(clippy::as_conversions, clippy::indexing_slicing)]
    const fn build_opcode_table() -> [OpCodeFn; 256] {
        let mut table: [OpCodeFn; 256] = [OpCodeFn(Interpreter::on_invalid_opcode); 256];

        table[Opcode::Noop as usize] = OpCodeFn(Interpreter::op_noop);
        table[Opcode::PushNil as usize] = OpCodeFn(Interpreter::op_push_nil);
        table[Opcode::PushTrue as usize] = OpCodeFn(Interpreter::op_push_true);
        table[Opcode::PushFalse as usize] = OpCodeFn(Interpreter::op_push_false);
        table[Opcode::PushSelf as usize] = OpCodeFn(Interpreter::op_push_self);
        table[Opcode::PushInt as usize] = OpCodeFn(Interpreter::op_push_int);
        table[Opcode::PushTaggedNil as usize] = OpCodeFn(Interpreter::op_push_tagged_nil);
        table[Opcode::PushLiteral as usize] = OpCodeFn(Interpreter::op_push_literal);
        table[Opcode::PushMemo as usize] = OpCodeFn(Interpreter::op_push_memo);
        table[Opcode::Pop as usize] = OpCodeFn(Interpreter::op_pop);
        table[Opcode::DupTop as usize] = OpCodeFn(Interpreter::op_dup_top);
        table[Opcode::Swap as usize] = OpCodeFn(Interpreter::op_swap);
        table[Opcode::MakeArray as usize] = OpCodeFn(Interpreter::op_make_array);
        table[Opcode::CreateBlock as usize] = OpCodeFn(Interpreter::op_create_block);
        table[Opcode::PushIvar as usize] = OpCodeFn(Interpreter::op_push_ivar);
        table[Opcode::SetIvar as usize] = OpCodeFn(Interpreter::op_set_ivar);

        table[Opcode::Add as usize] = OpCodeFn(Interpreter::op_add);
        table[Opcode::Sub as usize] = OpCodeFn(Interpreter::op_sub);
        table[Opcode::Mul as usize] = OpCodeFn(Interpreter::op_mul);
        table[Opcode::LessThan as usize] = OpCodeFn(Interpreter::op_less_than);
        table[Opcode::Equal as usize] = OpCodeFn(Interpreter::op_equal);

        table[Opcode::Goto as usize] = OpCodeFn(Interpreter::op_goto);
        table[Opcode::GotoIfTrue as usize] = OpCodeFn(Interpreter::op_goto_if_true);
        table[Opcode::GotoIfFalse as usize] = OpCodeFn(Interpreter::op_goto_if_false);
        table[Opcode::Ret as usize] = OpCodeFn(Interpreter::op_ret);

        table[Opcode::PushConst as usize] = OpCodeFn(Interpreter::op_push_const);
        table[Opcode::FindConst as usize] = OpCodeFn(Interpreter::op_find_const);
        table[Opcode::SetConst as usize] = OpCodeFn(Interpreter::op_set_const);
        table[Opcode::SetConstAt as usize] = OpCodeFn(Interpreter::op_set_const_at);

        table[Opcode::AllowPrivate as usize] = OpCodeFn(Interpreter::op_noop);
        table[Opcode::SendMethod as usize] = OpCodeFn(Interpreter::op_send_method);
        table[Opcode::SendStack as usize] = OpCodeFn(Interpreter::op_send_stack);
        table[Opcode::SendStackWithBlock as usize] =
            OpCodeFn(Interpreter::op_send_stack_with_block);
        table[Opcode::SendStackWithSplat as usize] =
            OpCodeFn(Interpreter::op_send_stack_with_splat);
        table[Opcode::SendVcall as usize] = OpCodeFn(Interpreter::op_send_vcall);
        table[Opcode::SendSuperStackWithBlock as usize] =
            OpCodeFn(Interpreter::op_send_super_stack_with_block);
        table[Opcode::SendSuperStackWithSplat as usize] =
            OpCodeFn(Interpreter::op_send_super_stack_with_splat);
        table[Opcode::Zsuper as usize] = OpCodeFn(Interpreter::op_zsuper);
        table[Opcode::ObjectToS as usize] = OpCodeFn(Interpreter::op_object_to_s);
        table[Opcode::CheckSerial as usize] = OpCodeFn(Interpreter::op_check_serial);
        table[Opcode::CheckSerialPrivate as usize] = OpCodeFn(Interpreter::op_check_serial);
        table[Opcode::YieldStack as usize] = OpCodeFn(Interpreter::op_yield_stack);

        table[Opcode::SetupUnwind as usize] = OpCodeFn(Interpreter::op_setup_unwind);
        table[Opcode::Unwind as usize] = OpCodeFn(Interpreter::op_unwind);
        table[Opcode::RaiseExc as usize] = OpCodeFn(Interpreter::op_raise_exc);
        table[Opcode::Reraise as usize] = OpCodeFn(Interpreter::op_reraise);
        table[Opcode::PushCurrentException as usize] =
            OpCodeFn(Interpreter::op_push_current_exception);
        table[Opcode::ClearException as usize] = OpCodeFn(Interpreter::op_clear_exception);

        table[Opcode::BIf as usize] = OpCodeFn(Interpreter::op_b_if);
        table[Opcode::BIfSerial as usize] = OpCodeFn(Interpreter::op_b_if_serial);

        table[Opcode::RLoadLocal as usize] = OpCodeFn(Interpreter::op_r_load_local);
        table[Opcode::RStoreLocal as usize] = OpCodeFn(Interpreter::op_r_store_local);
        table[Opcode::RLoadLocalDepth as usize] = OpCodeFn(Interpreter::op_r_load_local_depth);
        table[Opcode::RStoreLocalDepth as usize] = OpCodeFn(Interpreter::op_r_store_local_depth);
        table[Opcode::RLoadStack as usize] = OpCodeFn(Interpreter::op_r_load_stack);
        table[Opcode::RStoreStack as usize] = OpCodeFn(Interpreter::op_r_store_stack);
        table[Opcode::RLoadSelf as usize] = OpCodeFn(Interpreter::op_r_load_self);
        table[Opcode::RLoadNeg1 as usize] = OpCodeFn(Interpreter::op_r_load_int::<{ -1 }>);
        table[Opcode::RLoad0 as usize] = OpCodeFn(Interpreter::op_r_load_int::<0>);
        table[Opcode::RLoad1 as usize] = OpCodeFn(Interpreter::op_r_load_int::<1>);
        table[Opcode::RLoad2 as usize] = OpCodeFn(Interpreter::op_r_load_int::<2>);
        table[Opcode::RLoadFalse as usize] = OpCodeFn(Interpreter::op_r_load_false);
        table[Opcode::RLoadTrue as usize] = OpCodeFn(Interpreter::op_r_load_true);
        table[Opcode::RLoadNil as usize] = OpCodeFn(Interpreter::op_r_load_nil);
        table[Opcode::RLoadLiteral as usize] = OpCodeFn(Interpreter::op_r_load_literal);
        table[Opcode::RRet as usize] = OpCodeFn(Interpreter::op_r_ret);
        table[Opcode::RCopy as usize] = OpCodeFn(Interpreter::op_r_copy);

        table[Opcode::NIneg as usize] = OpCodeFn(Interpreter::op_n_ineg);
        table[Opcode::NIinc as usize] = OpCodeFn(Interpreter::op_n_iinc);
        table[Opcode::NIdec as usize] = OpCodeFn(Interpreter::op_n_idec);
        table[Opcode::NInot as usize] = OpCodeFn(Interpreter::op_n_inot);
        table[Opcode::NIadd as usize] = OpCodeFn(Interpreter::op_n_iadd);
        table[Opcode::NIsub as usize] = OpCodeFn(Interpreter::op_n_isub);
        table[Opcode::NImul as usize] = OpCodeFn(Interpreter::op_n_imul);
        table[Opcode::NIdiv as usize] = OpCodeFn(Interpreter::op_n_idiv);
        table[Opcode::NImod as usize] = OpCodeFn(Interpreter::op_n_imod);
        table[Opcode::NIeq as usize] = OpCodeFn(Interpreter::op_n_ieq);
        table[Opcode::NIne as usize] = OpCodeFn(Interpreter::op_n_ine);
        table[Opcode::NIlt as usize] = OpCodeFn(Interpreter::op_n_ilt);
        table[Opcode::NIle as usize] = OpCodeFn(Interpreter::op_n_ile);
        table[Opcode::NIgt as usize] = OpCodeFn(Interpreter::op_n_igt);
        table[Opcode::NIge as usize] = OpCodeFn(Interpreter::op_n_ige);

        table[Opcode::NDadd as usize] = OpCodeFn(Interpreter::op_n_dadd);
        table[Opcode::NDsub as usize] = OpCodeFn(Interpreter::op_n_dsub);
        table[Opcode::NDmul as usize] = OpCodeFn(Interpreter::op_n_dmul);
        table[Opcode::NDdiv as usize] = OpCodeFn(Interpreter::op_n_ddiv);
        table[Opcode::NDlt as usize] = OpCodeFn(Interpreter::op_n_dlt);
        table[Opcode::NDneg as usize] = OpCodeFn(Interpreter::op_n_dneg);

        table[Opcode::MCounter as usize] = OpCodeFn(Interpreter::op_m_counter);
        table[Opcode::MLog as usize] = OpCodeFn(Interpreter::op_m_log);

        table
    }

    pub(crate) fn on_invalid_opcode(
        _state: &mut State,
        frame: &mut CallFrame,
    ) -> Result<OpcodeResult, VMError> {
        Err(InternalError::InvalidOpcode(frame.op_ip).into())
    }
}
