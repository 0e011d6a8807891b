//! Exception-handler registrations.

use crate::errors::LinkError;

/// What a handler does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnwindKind {
    /// Placeholder for `unwind` instructions, which only tear down.
    None,
    Rescue,
    Ensure,
    /// A rescue body that may restart its protected region.
    Retry,
}

impl UnwindKind {
    /// Decode the kind operand of `setup_unwind`.
    pub fn from_operand(ip: usize, value: i64) -> Result<Self, LinkError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Rescue),
            2 => Ok(Self::Ensure),
            3 => Ok(Self::Retry),
            _ => Err(LinkError::InvalidOperand { ip, value }),
        }
    }

    pub fn operand(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Rescue => 1,
            Self::Ensure => 2,
            Self::Retry => 3,
        }
    }

    /// Whether an exception in flight may resume at this handler.
    pub fn handles_exceptions(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A registration created at link time for each `setup_unwind` and
/// `unwind` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindSite {
    handler: usize,
    kind: UnwindKind,
}

impl UnwindSite {
    pub fn new(handler: usize, kind: UnwindKind) -> Self {
        Self { handler, kind }
    }

    /// Instruction offset of the handler.
    pub fn handler(&self) -> usize {
        self.handler
    }

    pub fn kind(&self) -> UnwindKind {
        self.kind
    }
}

/// An active handler on a frame: the site plus the working-stack depth to
/// restore when resuming at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindEntry {
    pub site: UnwindSite,
    pub stack_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_operands() {
        for kind in [
            UnwindKind::None,
            UnwindKind::Rescue,
            UnwindKind::Ensure,
            UnwindKind::Retry,
        ] {
            assert_eq!(UnwindKind::from_operand(0, kind.operand()), Ok(kind));
        }
        assert_eq!(
            UnwindKind::from_operand(6, 9),
            Err(LinkError::InvalidOperand { ip: 6, value: 9 })
        );
    }

    #[test]
    fn test_only_real_handlers_catch() {
        assert!(!UnwindKind::None.handles_exceptions());
        assert!(UnwindKind::Ensure.handles_exceptions());
    }
}
