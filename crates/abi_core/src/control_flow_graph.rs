//! Basic-block and control-flow-graph recovery.
//!
//! Three passes: a linear scan cuts blocks on `JUMPDEST` starts and
//! terminator ends; each block's successor is then classified, resolving
//! jump targets statically from an immediately preceding PUSH where
//! possible and by a short symbolic run from the block entry otherwise; an
//! optional filter keeps only what is reachable from the entry point.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::opcodes as op;
use crate::vm::{Calldata, Vm};

/// Budget for one dynamic-jump resolution run.
const RESOLVE_GAS_LIMIT: u32 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum BlockType {
    Jump {
        to: usize,
    },
    Jumpi {
        true_to: usize,
        false_to: usize,
    },
    DynamicJump {
        to: Vec<usize>,
    },
    DynamicJumpi {
        true_to: Vec<usize>,
        false_to: usize,
    },
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BasicBlock {
    /// pc of the first instruction.
    pub start: usize,
    /// pc of the last instruction.
    pub end: usize,
    pub btype: BlockType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
}

fn is_terminator(opcode: u8) -> bool {
    matches!(
        opcode,
        op::JUMP
            | op::JUMPI
            | op::STOP
            | op::RETURN
            | op::REVERT
            | op::INVALID
            | op::SELFDESTRUCT
    )
}

fn instruction_size(opcode: u8) -> usize {
    if op::is_push(opcode) {
        1 + op::push_size(opcode)
    } else {
        1
    }
}

fn valid_jumpdest(code: &[u8], target: usize) -> bool {
    target < code.len() && code[target] == op::JUMPDEST
}

/// Pass 1: `(start_pc, end_pc)` spans of every basic block, end inclusive.
pub fn basic_blocks(code: &[u8]) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut block_start: Option<usize> = None;
    let mut prev_pc = 0usize;
    let mut pc = 0usize;

    while pc < code.len() {
        let opcode = code[pc];
        if opcode == op::JUMPDEST {
            if let Some(start) = block_start.take() {
                blocks.push((start, prev_pc));
            }
            block_start = Some(pc);
        } else if block_start.is_none() {
            block_start = Some(pc);
        }
        if is_terminator(opcode) {
            blocks.push((block_start.take().unwrap_or(pc), pc));
        }
        prev_pc = pc;
        pc += instruction_size(opcode);
    }
    if let Some(start) = block_start {
        blocks.push((start, prev_pc));
    }
    blocks
}

/// The PUSH immediate directly in front of the block terminator, if the
/// terminator's target was pushed that way.
fn static_target(code: &[u8], start: usize, end: usize) -> Option<usize> {
    let mut pc = start;
    let mut prev = None;
    while pc < end {
        prev = Some(pc);
        pc += instruction_size(code[pc]);
    }
    let prev = prev?;
    let pushed = code[prev];
    if !op::is_push(pushed) || prev + instruction_size(pushed) != end {
        return None;
    }
    let n = op::push_size(pushed);
    let mut value = 0usize;
    for &byte in &code[prev + 1..(prev + 1 + n).min(code.len())] {
        value = value.saturating_mul(256).saturating_add(byte as usize);
    }
    Some(value)
}

/// Pass 2 helper: run the machine from the block entry with a fresh stack
/// and observe where the terminating jump actually goes.
fn resolve_dynamic(code: &[u8], block_start: usize, jump_pc: usize) -> Vec<usize> {
    let mut vm: Vm<'_, ()> = Vm::new(code, Calldata::new(&[], None));
    vm.pc = block_start;
    let mut gas_used = 0u32;

    while !vm.stopped {
        let at_jump = vm.pc == jump_pc;
        let ret = match vm.step() {
            Ok(ret) => ret,
            Err(_) => return Vec::new(),
        };
        gas_used += ret.gas;
        if at_jump {
            // After a taken jump the pc sits on the destination.
            if vm.pc != jump_pc + 1 {
                return vec![vm.pc];
            }
            return Vec::new();
        }
        if gas_used > RESOLVE_GAS_LIMIT {
            break;
        }
    }
    Vec::new()
}

/// Passes 1 and 2: every block with its classified successor.
pub fn control_flow_graph(code: &[u8]) -> ControlFlowGraph {
    let spans = basic_blocks(code);
    let blocks = spans
        .iter()
        .map(|&(start, end)| {
            let terminator = code[end];
            let btype = match terminator {
                op::JUMP => match static_target(code, start, end) {
                    Some(to) if valid_jumpdest(code, to) => BlockType::Jump { to },
                    Some(_) => BlockType::Terminate,
                    None => BlockType::DynamicJump {
                        to: resolve_dynamic(code, start, end),
                    },
                },
                op::JUMPI => {
                    let false_to = end + 1;
                    match static_target(code, start, end) {
                        Some(to) if valid_jumpdest(code, to) => BlockType::Jumpi {
                            true_to: to,
                            false_to,
                        },
                        Some(_) => BlockType::Terminate,
                        None => BlockType::DynamicJumpi {
                            true_to: resolve_dynamic(code, start, end),
                            false_to,
                        },
                    }
                }
                op::STOP | op::RETURN | op::REVERT | op::INVALID | op::SELFDESTRUCT => {
                    BlockType::Terminate
                }
                // The block was closed by the JUMPDEST that follows it.
                other => {
                    let to = end + instruction_size(other);
                    if to < code.len() {
                        BlockType::Jump { to }
                    } else {
                        BlockType::Terminate
                    }
                }
            };
            BasicBlock { start, end, btype }
        })
        .collect();
    ControlFlowGraph { blocks }
}

impl BlockType {
    pub fn successors(&self) -> Vec<usize> {
        match self {
            BlockType::Jump { to } => vec![*to],
            BlockType::Jumpi { true_to, false_to } => vec![*true_to, *false_to],
            BlockType::DynamicJump { to } => to.clone(),
            BlockType::DynamicJumpi { true_to, false_to } => {
                let mut all = true_to.clone();
                all.push(*false_to);
                all
            }
            BlockType::Terminate => Vec::new(),
        }
    }
}

impl ControlFlowGraph {
    /// Pass 3: only the blocks transitively reachable from pc 0.
    pub fn reachable_from_entry(&self) -> ControlFlowGraph {
        let by_start: HashMap<usize, &BasicBlock> =
            self.blocks.iter().map(|b| (b.start, b)).collect();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::new();
        if by_start.contains_key(&0) {
            seen.insert(0);
            queue.push_back(0);
        }
        while let Some(start) = queue.pop_front() {
            if let Some(block) = by_start.get(&start) {
                for succ in block.btype.successors() {
                    if by_start.contains_key(&succ) && seen.insert(succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }
        ControlFlowGraph {
            blocks: self
                .blocks
                .iter()
                .filter(|b| seen.contains(&b.start))
                .cloned()
                .collect(),
        }
    }
}
