use thiserror::Error;

/// Conditions that stop the symbolic interpreter.
///
/// Analyses treat every variant except input parsing problems as a clean
/// end of exploration: whatever was inferred up to that point is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Pop, peek, dup or swap reached below the bottom of the stack.
    #[error("stack underflow")]
    StackUnderflow,
    /// Push would exceed the 1024-element stack depth limit.
    #[error("stack too deep")]
    StackTooDeep,
    /// JUMP/JUMPI target is outside the code or not a JUMPDEST.
    #[error("bad jump destination {0}")]
    BadJumpDest(usize),
    /// Opcode the interpreter does not model.
    #[error("unsupported opcode 0x{0:02x}")]
    UnsupportedOp(u8),
    /// `step()` was called on a machine that already halted.
    #[error("vm is stopped")]
    Stopped,
}
