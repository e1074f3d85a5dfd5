//! Single-step symbolic EVM interpreter.
//!
//! The machine is not a conformant EVM: storage, environment and call
//! results are placeholders, and gas is only a termination budget. What it
//! does model precisely is 256-bit arithmetic, the stack, the write-log
//! memory, and the flow of provenance labels from calldata into operands,
//! which is everything the ABI analyses pattern-match on.

use alloy::primitives::{I256, U256};
use primitives::element::Element;
use primitives::errors::VmError;
use primitives::memory::Memory;
use primitives::stack::Stack;
use tracing::trace;

use crate::opcodes as op;

/// CALLDATACOPY sizes above this abort the step; large copies only show up
/// in code the analyses have no use for.
const CALLDATACOPY_SIZE_LIMIT: usize = 512;

/// The immutable input region of a call, shared read-only between clones.
#[derive(Debug, Clone)]
pub struct Calldata<'a, T> {
    pub data: &'a [u8],
    pub label: Option<T>,
}

impl<'a, T: Clone> Calldata<'a, T> {
    pub fn new(data: &'a [u8], label: Option<T>) -> Self {
        Calldata { data, label }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read `size` bytes at `offset`, zero-padded past the end. The result
    /// carries the calldata label so loads stay attributable.
    pub fn load_bytes(&self, offset: U256, size: usize) -> (Vec<u8>, Option<T>) {
        let mut out = vec![0u8; size];
        if let Ok(off) = usize::try_from(offset) {
            if off < self.data.len() {
                let end = (off + size).min(self.data.len());
                out[..end - off].copy_from_slice(&self.data[off..end]);
            }
        }
        (out, self.label.clone())
    }

    pub fn load_word(&self, offset: U256) -> Element<T> {
        let (bytes, label) = self.load_bytes(offset, 32);
        let mut data = [0u8; 32];
        data.copy_from_slice(&bytes);
        Element::new(data, label)
    }
}

/// What one `step()` observed: the executed opcode, its gas estimate, up to
/// two popped operand snapshots in pop order, and for MLOAD the labels of
/// every write that contributed bytes to the loaded word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult<T> {
    pub op: u8,
    pub gas: u32,
    pub first: Option<Element<T>>,
    pub second: Option<Element<T>>,
    pub touched: Option<Vec<T>>,
}

impl<T> StepResult<T> {
    fn new(op: u8, gas: u32) -> Self {
        StepResult {
            op,
            gas,
            first: None,
            second: None,
            touched: None,
        }
    }

    fn with_args(op: u8, gas: u32, first: Element<T>, second: Element<T>) -> Self {
        StepResult {
            op,
            gas,
            first: Some(first),
            second: Some(second),
            touched: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vm<'a, T> {
    pub code: &'a [u8],
    pub pc: usize,
    pub stack: Stack<T>,
    pub memory: Memory<T>,
    pub calldata: Calldata<'a, T>,
    pub stopped: bool,
}

impl<'a, T> Vm<'a, T>
where
    T: Clone + PartialEq + std::fmt::Debug,
{
    pub fn new(code: &'a [u8], calldata: Calldata<'a, T>) -> Self {
        Vm {
            code,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            calldata,
            stopped: code.is_empty(),
        }
    }

    /// Execute exactly one opcode.
    ///
    /// On success the stack already holds any pushed result. Every `Err` is
    /// a clean-termination signal for the drivers: the machine state is not
    /// usable for further stepping.
    pub fn step(&mut self) -> Result<StepResult<T>, VmError> {
        if self.stopped {
            return Err(VmError::Stopped);
        }
        let opcode = self.code[self.pc];
        trace!(pc = self.pc, op = op::name(opcode).unwrap_or("?"), "step");
        let ret = self.exec(opcode)?;
        if opcode != op::JUMP && opcode != op::JUMPI {
            self.pc += 1;
        }
        if self.pc >= self.code.len() {
            self.stopped = true;
        }
        Ok(ret)
    }

    fn to_offset(value: U256, opcode: u8) -> Result<usize, VmError> {
        usize::try_from(value).map_err(|_| VmError::UnsupportedOp(opcode))
    }

    fn exec(&mut self, opcode: u8) -> Result<StepResult<T>, VmError> {
        match opcode {
            o if op::is_push(o) => {
                let n = op::push_size(o);
                let mut data = [0u8; 32];
                let start = (self.pc + 1).min(self.code.len());
                let end = (self.pc + 1 + n).min(self.code.len());
                let imm = &self.code[start..end];
                data[32 - imm.len()..].copy_from_slice(imm);
                self.stack.push(Element::new(data, None))?;
                self.pc += n;
                Ok(StepResult::new(o, if n == 0 { 2 } else { 3 }))
            }

            op::JUMP | op::JUMPI => {
                let s0 = self.stack.pop_uint()?;
                if opcode == op::JUMPI {
                    let s1 = self.stack.pop_uint()?;
                    if s1.is_zero() {
                        self.pc += 1;
                        return Ok(StepResult::new(opcode, 10));
                    }
                }
                let target = usize::try_from(s0).unwrap_or(usize::MAX);
                if target >= self.code.len() || self.code[target] != op::JUMPDEST {
                    return Err(VmError::BadJumpDest(target));
                }
                self.pc = target;
                Ok(StepResult::new(
                    opcode,
                    if opcode == op::JUMP { 8 } else { 10 },
                ))
            }

            o if op::is_dup(o) => {
                self.stack.dup((o - op::DUP1 + 1) as usize)?;
                Ok(StepResult::new(o, 3))
            }

            o if op::is_swap(o) => {
                self.stack.swap((o - op::SWAP1 + 1) as usize)?;
                Ok(StepResult::new(o, 3))
            }

            op::JUMPDEST => Ok(StepResult::new(opcode, 1)),

            op::STOP => {
                self.stopped = true;
                Ok(StepResult::new(opcode, 0))
            }

            op::RETURN | op::REVERT => {
                self.stack.pop()?;
                self.stack.pop()?;
                self.stopped = true;
                Ok(StepResult::new(opcode, if opcode == op::REVERT { 4 } else { 0 }))
            }

            op::SELFDESTRUCT => {
                self.stack.pop()?;
                self.stopped = true;
                Ok(StepResult::new(opcode, 5000))
            }

            op::EQ
            | op::LT
            | op::GT
            | op::SUB
            | op::ADD
            | op::DIV
            | op::MOD
            | op::MUL
            | op::EXP
            | op::XOR
            | op::AND
            | op::OR
            | op::SHR
            | op::SHL
            | op::BYTE => {
                let raws0 = self.stack.pop()?;
                let raws1 = self.stack.pop()?;
                let s0 = raws0.to_uint();
                let s1 = raws1.to_uint();

                let mut gas = 3;
                let res = match opcode {
                    op::EQ => U256::from(s0 == s1),
                    op::LT => U256::from(s0 < s1),
                    op::GT => U256::from(s0 > s1),
                    op::SUB => s0.wrapping_sub(s1),
                    op::ADD => s0.wrapping_add(s1),
                    op::DIV => {
                        gas = 5;
                        if s1.is_zero() { U256::ZERO } else { s0 / s1 }
                    }
                    op::MOD => {
                        gas = 5;
                        if s1.is_zero() { U256::ZERO } else { s0 % s1 }
                    }
                    op::MUL => {
                        gas = 5;
                        s0.wrapping_mul(s1)
                    }
                    op::EXP => {
                        gas = 50 * (1 + (s1.bit_len() as u32) / 8); // ~approx
                        s0.wrapping_pow(s1)
                    }
                    op::XOR => s0 ^ s1,
                    op::AND => s0 & s1,
                    op::OR => s0 | s1,
                    op::SHR => {
                        if s0 >= U256::from(256) {
                            U256::ZERO
                        } else {
                            s1 >> s0.to::<usize>()
                        }
                    }
                    op::SHL => {
                        if s0 >= U256::from(256) {
                            U256::ZERO
                        } else {
                            s1 << s0.to::<usize>()
                        }
                    }
                    op::BYTE => {
                        if s0 >= U256::from(32) {
                            U256::ZERO
                        } else {
                            U256::from(raws1.data[s0.to::<usize>()])
                        }
                    }
                    _ => unreachable!(),
                };
                self.stack.push_uint(res)?;
                Ok(StepResult::with_args(opcode, gas, raws0, raws1))
            }

            op::SLT | op::SGT => {
                let s0 = I256::from_raw(self.stack.pop_uint()?);
                let s1 = I256::from_raw(self.stack.pop_uint()?);
                let res = if opcode == op::SLT { s0 < s1 } else { s0 > s1 };
                self.stack.push_uint(U256::from(res))?;
                Ok(StepResult::new(opcode, 3))
            }

            op::ISZERO => {
                let raws0 = self.stack.pop()?;
                self.stack
                    .push_uint(U256::from(raws0.to_uint().is_zero()))?;
                let mut ret = StepResult::new(opcode, 3);
                ret.first = Some(raws0);
                Ok(ret)
            }

            op::NOT => {
                let s0 = self.stack.pop_uint()?;
                self.stack.push_uint(!s0)?;
                Ok(StepResult::new(opcode, 3))
            }

            op::SIGNEXTEND => {
                let raws0 = self.stack.pop()?;
                let raws1 = self.stack.pop()?;
                let s0 = raws0.to_uint();
                let s1 = raws1.to_uint();
                let res = if s0 <= U256::from(31) {
                    let sign_bit = U256::ONE << (s0.to::<usize>() * 8 + 7);
                    if (s1 & sign_bit).is_zero() {
                        s1 & (sign_bit - U256::ONE)
                    } else {
                        s1 | sign_bit.wrapping_neg()
                    }
                } else {
                    s1
                };
                self.stack.push_uint(res)?;
                Ok(StepResult::with_args(opcode, 5, raws0, raws1))
            }

            op::POP => {
                self.stack.pop()?;
                Ok(StepResult::new(opcode, 2))
            }

            // msg.value == 0
            op::CALLVALUE => {
                self.stack.push_uint(U256::ZERO)?;
                Ok(StepResult::new(opcode, 2))
            }

            op::CALLDATALOAD => {
                let raws0 = self.stack.pop()?;
                let word = self.calldata.load_word(raws0.to_uint());
                self.stack.push(word)?;
                let mut ret = StepResult::new(opcode, 3);
                ret.first = Some(raws0);
                Ok(ret)
            }

            op::CALLDATASIZE => {
                self.stack.push(Element::from_usize(self.calldata.len()))?;
                Ok(StepResult::new(opcode, 2))
            }

            op::CALLDATACOPY => {
                let mem_off = self.stack.pop()?;
                let src_off = self.stack.pop()?;
                let size = self.stack.pop_uint()?;
                let size = Self::to_offset(size, opcode)?;
                if size > CALLDATACOPY_SIZE_LIMIT {
                    return Err(VmError::UnsupportedOp(opcode));
                }
                let dst = Self::to_offset(mem_off.to_uint(), opcode)?;
                let (bytes, label) = self.calldata.load_bytes(src_off.to_uint(), size);
                self.memory.store_bytes(dst, bytes, label);
                Ok(StepResult::with_args(opcode, 4, src_off, mem_off))
            }

            op::MSTORE => {
                let offset = self.stack.pop_uint()?;
                let value = self.stack.pop()?;
                let offset = Self::to_offset(offset, opcode)?;
                self.memory.store(offset, value);
                Ok(StepResult::new(opcode, 3))
            }

            op::MSTORE8 => {
                let offset = self.stack.pop_uint()?;
                let value = self.stack.pop()?;
                let offset = Self::to_offset(offset, opcode)?;
                self.memory
                    .store_bytes(offset, vec![value.data[31]], value.label);
                Ok(StepResult::new(opcode, 3))
            }

            op::MLOAD => {
                let offset = self.stack.pop_uint()?;
                let offset = Self::to_offset(offset, opcode)?;
                let (word, used) = self.memory.load(offset);
                self.stack.push(word)?;
                let mut ret = StepResult::new(opcode, 4);
                ret.touched = Some(used);
                Ok(ret)
            }

            op::SLOAD => {
                let slot = self.stack.pop()?;
                self.stack.push_uint(U256::ZERO)?;
                let mut ret = StepResult::new(opcode, 100);
                ret.first = Some(slot);
                Ok(ret)
            }

            op::SSTORE => {
                let slot = self.stack.pop()?;
                let value = self.stack.pop()?;
                Ok(StepResult::with_args(opcode, 100, slot, value))
            }

            op::TLOAD => {
                self.stack.pop()?;
                self.stack.push_uint(U256::ZERO)?;
                Ok(StepResult::new(opcode, 100))
            }

            op::TSTORE => {
                self.stack.pop()?;
                self.stack.pop()?;
                Ok(StepResult::new(opcode, 100))
            }

            op::KECCAK256 => {
                self.stack.pop()?;
                self.stack.pop()?;
                self.stack.push_uint(U256::ONE)?;
                Ok(StepResult::new(opcode, 30))
            }

            op::ADDRESS | op::CALLER | op::ORIGIN | op::COINBASE => {
                self.stack.push_uint(U256::ONE)?;
                Ok(StepResult::new(opcode, 2))
            }

            op::TIMESTAMP
            | op::NUMBER
            | op::PREVRANDAO
            | op::GASLIMIT
            | op::CHAINID
            | op::BASEFEE
            | op::BLOBBASEFEE
            | op::GASPRICE
            | op::SELFBALANCE
            | op::GAS
            | op::RETURNDATASIZE => {
                self.stack.push_uint(U256::ZERO)?;
                Ok(StepResult::new(opcode, 2))
            }

            op::BALANCE | op::EXTCODEHASH | op::BLOCKHASH => {
                self.stack.pop()?;
                self.stack.push_uint(U256::ZERO)?;
                Ok(StepResult::new(opcode, if opcode == op::BLOCKHASH { 20 } else { 100 }))
            }

            op::EXTCODESIZE => {
                self.stack.pop()?;
                self.stack.push_uint(U256::ONE)?;
                Ok(StepResult::new(opcode, 100))
            }

            op::RETURNDATACOPY => {
                for _ in 0..3 {
                    self.stack.pop()?;
                }
                Ok(StepResult::new(opcode, 3))
            }

            op::CREATE | op::CREATE2 => {
                let n = if opcode == op::CREATE { 3 } else { 4 };
                for _ in 0..n {
                    self.stack.pop()?;
                }
                self.stack.push_uint(U256::ONE)?;
                Ok(StepResult::new(opcode, 32000))
            }

            op::CALL | op::CALLCODE => {
                self.stack.pop()?; // gas
                self.stack.pop()?; // address
                let value = self.stack.pop()?;
                for _ in 0..4 {
                    self.stack.pop()?;
                }
                self.stack.push_uint(U256::ONE)?;
                let mut ret = StepResult::new(opcode, 100);
                ret.first = Some(value);
                Ok(ret)
            }

            op::DELEGATECALL | op::STATICCALL => {
                for _ in 0..6 {
                    self.stack.pop()?;
                }
                self.stack.push_uint(U256::ONE)?;
                Ok(StepResult::new(opcode, 100))
            }

            o if op::is_log(o) => {
                let n = (o - op::LOG0) as u32;
                for _ in 0..(2 + n) {
                    self.stack.pop()?;
                }
                Ok(StepResult::new(o, 375 * (n + 1)))
            }

            _ => Err(VmError::UnsupportedOp(opcode)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm<'a>(code: &'a [u8], calldata: &'a [u8]) -> Vm<'a, &'static str> {
        Vm::new(code, Calldata::new(calldata, Some("calldata")))
    }

    #[test]
    fn push_add_semantics() {
        // PUSH1 0x03 PUSH1 0x04 ADD
        let code = [op::PUSH1, 0x03, op::PUSH1, 0x04, op::ADD];
        let mut m = vm(&code, &[]);
        m.step().unwrap();
        m.step().unwrap();
        let ret = m.step().unwrap();
        assert_eq!(ret.op, op::ADD);
        assert_eq!(ret.first.unwrap().to_uint(), U256::from(4));
        assert_eq!(ret.second.unwrap().to_uint(), U256::from(3));
        assert_eq!(m.stack.pop_uint().unwrap(), U256::from(7));
        assert!(m.stopped);
    }

    #[test]
    fn sub_wraps_modulo_2_256() {
        // PUSH1 0x01 PUSH1 0x00 SUB == 0 - 1 == 2^256 - 1
        let code = [op::PUSH1, 0x01, op::PUSH1, 0x00, op::SUB];
        let mut m = vm(&code, &[]);
        for _ in 0..3 {
            m.step().unwrap();
        }
        assert_eq!(m.stack.pop_uint().unwrap(), U256::MAX);
    }

    #[test]
    fn shr_extracts_selector() {
        let mut calldata = [0u8; 32];
        calldata[..4].copy_from_slice(&[0xfa, 0xe7, 0xab, 0x82]);
        // PUSH0 CALLDATALOAD PUSH1 0xe0 SHR
        let code = [op::PUSH0, op::CALLDATALOAD, op::PUSH1, 0xe0, op::SHR];
        let mut m = vm(&code, &calldata);
        for _ in 0..4 {
            m.step().unwrap();
        }
        let top = m.stack.pop().unwrap();
        assert_eq!(top.to_uint(), U256::from(0xfae7ab82u64));
    }

    #[test]
    fn calldataload_inherits_label_and_pads() {
        // PUSH1 0x02 CALLDATALOAD
        let code = [op::PUSH1, 0x02, op::CALLDATALOAD];
        let mut m = vm(&code, &[0xaa, 0xbb, 0xcc, 0xdd]);
        m.step().unwrap();
        let ret = m.step().unwrap();
        assert_eq!(ret.first.unwrap().to_uint(), U256::from(2));
        let loaded = m.stack.pop().unwrap();
        assert_eq!(loaded.label, Some("calldata"));
        assert_eq!(loaded.data[0], 0xcc);
        assert_eq!(loaded.data[1], 0xdd);
        assert_eq!(&loaded.data[2..], &[0u8; 30]);
    }

    #[test]
    fn bad_jumpdest_is_typed() {
        // PUSH1 0x00 JUMP -- destination 0 is a PUSH, not a JUMPDEST
        let code = [op::PUSH1, 0x00, op::JUMP];
        let mut m = vm(&code, &[]);
        m.step().unwrap();
        assert_eq!(m.step(), Err(VmError::BadJumpDest(0)));
    }

    #[test]
    fn jumpi_not_taken_falls_through() {
        // PUSH1 0x00 PUSH1 0x06 JUMPI PUSH0 STOP -- condition is zero, so the
        // (invalid) destination is never validated.
        let code = [
            op::PUSH1,
            0x00,
            op::PUSH1,
            0x06,
            op::JUMPI,
            op::PUSH0,
            op::STOP,
        ];
        let mut m = vm(&code, &[]);
        m.step().unwrap();
        m.step().unwrap();
        m.step().unwrap();
        assert_eq!(m.pc, 5);
        assert!(!m.stopped);
    }

    #[test]
    fn jump_loop_keeps_running_until_driver_budget() {
        // JUMPDEST PUSH1 0x00 JUMP -- infinite; the VM itself never halts,
        // termination is the caller's gas budget.
        let code = [op::JUMPDEST, op::PUSH1, 0x00, op::JUMP];
        let mut m = vm(&code, &[]);
        let mut gas = 0u32;
        for _ in 0..100 {
            gas += m.step().unwrap().gas;
        }
        assert!(!m.stopped);
        assert!(gas > 0);
    }

    #[test]
    fn mload_reports_touched_labels() {
        // CALLDATACOPY(mem 0, src 0, 4) ; MLOAD(0)
        let code = [
            op::PUSH1,
            0x04,
            op::PUSH0,
            op::PUSH0,
            op::CALLDATACOPY,
            op::PUSH0,
            op::MLOAD,
        ];
        let mut m = vm(&code, &[0xaa, 0xbb, 0xcc, 0xdd]);
        for _ in 0..5 {
            m.step().unwrap();
        }
        let ret = m.step().unwrap();
        assert_eq!(ret.op, op::MLOAD);
        assert_eq!(ret.touched, Some(vec!["calldata"]));
        assert_eq!(m.stack.peek().unwrap().data[..4], [0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn calldatacopy_size_cap() {
        // size 0x300 > 512
        let code = [op::PUSH2, 0x03, 0x00, op::PUSH0, op::PUSH0, op::CALLDATACOPY];
        let mut m = vm(&code, &[]);
        for _ in 0..3 {
            m.step().unwrap();
        }
        assert_eq!(m.step(), Err(VmError::UnsupportedOp(op::CALLDATACOPY)));
    }

    #[test]
    fn clone_diverges_independently() {
        let code = [op::PUSH1, 0x01, op::PUSH1, 0x02, op::MSTORE, op::STOP];
        let mut m = vm(&code, &[]);
        m.step().unwrap();
        let mut copy = m.clone();
        copy.step().unwrap();
        copy.step().unwrap();

        // The clone ran MSTORE; the original saw none of it.
        assert_eq!(copy.memory.data.len(), 1);
        assert!(m.memory.data.is_empty());
        assert_eq!(m.stack.len(), 1);
        assert!(copy.stack.is_empty());
        assert_eq!(m.pc, 2);
    }

    #[test]
    fn signextend_widens_negative_byte() {
        // PUSH1 0xff PUSH1 0x00 SIGNEXTEND -> -1
        let code = [op::PUSH1, 0xff, op::PUSH1, 0x00, op::SIGNEXTEND];
        let mut m = vm(&code, &[]);
        for _ in 0..3 {
            m.step().unwrap();
        }
        assert_eq!(m.stack.pop_uint().unwrap(), U256::MAX);
    }

    #[test]
    fn unsupported_opcode_is_clean_stop() {
        let code = [op::PC];
        let mut m = vm(&code, &[]);
        assert_eq!(m.step(), Err(VmError::UnsupportedOp(op::PC)));
    }

    #[test]
    fn empty_code_is_born_stopped() {
        let m = vm(&[], &[]);
        assert!(m.stopped);
    }
}
