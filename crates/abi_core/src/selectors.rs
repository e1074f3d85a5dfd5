//! Function selector extraction.
//!
//! The dispatcher of a compiled contract compares the low four bytes of
//! calldata against each known selector. Running the prologue with calldata
//! whose provenance is labelled lets every such comparison be recognised and
//! harvested, whatever shape the compiler gave it: linear EQ/XOR/SUB chains,
//! binary search over LT/GT splits, or Vyper's `mod`/`and` bucket tables.

use alloy::primitives::U256;
use primitives::element::Element;
use tracing::{debug, trace};

use crate::opcodes as op;
use crate::vm::{Calldata, StepResult, Vm};

/// Default exploration budget, tuned on real dispatchers.
pub const DEFAULT_GAS_LIMIT: u32 = 500_000;

/// Recursion guard for branch forks and bucket enumeration; the gas budget
/// already bounds total work.
const FORK_DEPTH_LIMIT: u32 = 64;

/// Probe calldata; the concrete value only has to be an improbable selector.
const PROBE_CALLDATA: [u8; 4] = [0xaa, 0xbb, 0xcc, 0xdd];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Label {
    /// Straight out of the calldata region.
    CallData,
    /// Narrowed to the low 4 bytes of calldata: a selector candidate.
    Signature,
    /// Intermediate of a `selector * k` / shifted product in sparse tables.
    MulSig,
}

/// Runs the dispatcher and returns every harvested selector, first-seen
/// order, deduplicated.
pub fn extract_selectors(code: &[u8], gas_limit: u32) -> Vec<[u8; 4]> {
    let mut vm = Vm::new(code, Calldata::new(&PROBE_CALLDATA, Some(Label::CallData)));
    let mut selectors = Vec::new();
    let gas_used = process(&mut vm, &mut selectors, gas_limit, 0);
    debug!(gas_used, found = selectors.len(), "selector extraction done");
    selectors
}

fn emit(selectors: &mut Vec<[u8; 4]>, selector: [u8; 4]) {
    if !selectors.contains(&selector) {
        trace!(selector = ?selector, "harvested");
        selectors.push(selector);
    }
}

fn label_of<'r>(operand: &'r Option<Element<Label>>) -> Option<&'r Label> {
    operand.as_ref().and_then(|el| el.label.as_ref())
}

/// For a two-operand step where one side is the selector candidate, the
/// other side, i.e. the constant the dispatcher compares against.
fn other_of_signature<'r>(ret: &'r StepResult<Label>) -> Option<&'r Element<Label>> {
    if label_of(&ret.first) == Some(&Label::Signature) {
        ret.second.as_ref()
    } else if label_of(&ret.second) == Some(&Label::Signature) {
        ret.first.as_ref()
    } else {
        None
    }
}

fn is_calldata_like(label: Option<&Label>) -> bool {
    matches!(label, Some(Label::Signature) | Some(Label::CallData))
}

/// Re-tag the stack top as `Signature` when it now holds exactly the low
/// four calldata bytes (the usual `shr 0xe0` / `div 2^224` / masking ways a
/// dispatcher isolates the selector).
fn narrow_to_signature(vm: &mut Vm<'_, Label>) -> bool {
    let probe: [u8; 4] = vm.calldata.data[..4].try_into().unwrap_or_default();
    if let Ok(top) = vm.stack.peek_mut() {
        if top.data[28..32] == probe {
            top.label = Some(Label::Signature);
            return true;
        }
    }
    false
}

/// A literal small enough to be a Vyper bucket count rather than a mask.
fn bucket_count(operand: &Option<Element<Label>>) -> Option<u64> {
    let value = operand.as_ref()?.to_uint();
    if !value.is_zero() && value < U256::from(256) {
        Some(value.to::<u64>())
    } else {
        None
    }
}

/// Enumerate every residue of a `selector mod k` / `selector and k` jump
/// table by rerunning a clone with the result forced to each bucket.
fn enumerate_buckets(
    vm: &mut Vm<'_, Label>,
    selectors: &mut Vec<[u8; 4]>,
    k: u64,
    remaining_gas: u32,
    depth: u32,
) -> u32 {
    let mut gas_used = 0;
    if depth < FORK_DEPTH_LIMIT {
        for m in 1..k {
            let mut fork = vm.clone();
            if let Ok(top) = fork.stack.peek_mut() {
                top.data = U256::from(m).to_be_bytes();
            }
            gas_used += process(
                &mut fork,
                selectors,
                remaining_gas / (k as u32),
                depth + 1,
            );
        }
    }
    // Bucket zero is explored by falling through on the original machine.
    if let Ok(top) = vm.stack.peek_mut() {
        top.data = [0u8; 32];
    }
    gas_used
}

fn process(
    vm: &mut Vm<'_, Label>,
    selectors: &mut Vec<[u8; 4]>,
    gas_limit: u32,
    depth: u32,
) -> u32 {
    let mut gas_used = 0u32;

    while !vm.stopped {
        let ret = match vm.step() {
            Ok(ret) => ret,
            // Underflow, bad jumpdest, unsupported op: keep what we have.
            Err(_) => break,
        };
        gas_used += ret.gas;
        if gas_used > gas_limit {
            break;
        }

        match ret.op {
            op::EQ | op::XOR => {
                if let Some(other) = other_of_signature(&ret) {
                    emit(selectors, other.low4());
                    // Neutralise the comparison so the dispatcher walks on to
                    // its next candidate.
                    if vm.stack.pop().is_ok() {
                        let fallthrough = if ret.op == op::XOR { U256::ONE } else { U256::ZERO };
                        let _ = vm.stack.push_uint(fallthrough);
                    }
                }
            }

            op::SUB => {
                // `sub` used as an inequality test; nonzero result already
                // falls through on its own.
                if let Some(other) = other_of_signature(&ret) {
                    emit(selectors, other.low4());
                }
            }

            op::LT | op::GT => {
                // Binary-search dispatcher split: explore both halves.
                if other_of_signature(&ret).is_some() {
                    if depth < FORK_DEPTH_LIMIT {
                        let mut fork = vm.clone();
                        gas_used += process(&mut fork, selectors, gas_limit / 2, depth + 1);
                    }
                    if let Ok(v) = vm.stack.pop_uint() {
                        let inverted = if v.is_zero() { U256::ONE } else { U256::ZERO };
                        let _ = vm.stack.push_uint(inverted);
                    }
                }
            }

            op::MOD => {
                if matches!(
                    label_of(&ret.first),
                    Some(Label::Signature) | Some(Label::MulSig)
                ) {
                    if let Some(k) = bucket_count(&ret.second) {
                        let remaining = gas_limit.saturating_sub(gas_used);
                        gas_used += enumerate_buckets(vm, selectors, k, remaining, depth);
                    }
                }
            }

            op::AND => {
                let k = if label_of(&ret.first) == Some(&Label::Signature) {
                    bucket_count(&ret.second)
                } else if label_of(&ret.second) == Some(&Label::Signature) {
                    bucket_count(&ret.first)
                } else {
                    None
                };
                if let Some(k) = k {
                    // Dense Vyper dispatch: `selector and (k)` indexes a table.
                    let remaining = gas_limit.saturating_sub(gas_used);
                    gas_used += enumerate_buckets(vm, selectors, k, remaining, depth);
                } else if is_calldata_like(label_of(&ret.first))
                    || is_calldata_like(label_of(&ret.second))
                {
                    // Masking: either isolates the selector or at least
                    // keeps the value attributable to calldata.
                    if !narrow_to_signature(vm) {
                        if let Ok(top) = vm.stack.peek_mut() {
                            top.label = Some(Label::CallData);
                        }
                    }
                }
            }

            op::SHR => {
                if label_of(&ret.second) == Some(&Label::MulSig) {
                    if let Ok(top) = vm.stack.peek_mut() {
                        top.label = Some(Label::MulSig);
                    }
                } else if is_calldata_like(label_of(&ret.second)) {
                    narrow_to_signature(vm);
                }
            }

            op::DIV => {
                if is_calldata_like(label_of(&ret.first)) {
                    narrow_to_signature(vm);
                }
            }

            op::MUL => {
                if label_of(&ret.first) == Some(&Label::Signature)
                    || label_of(&ret.second) == Some(&Label::Signature)
                {
                    if let Ok(top) = vm.stack.peek_mut() {
                        top.label = Some(Label::MulSig);
                    }
                }
            }

            op::ISZERO => {
                // `iszero(selector)` guards the zero-selector fallback.
                if label_of(&ret.first) == Some(&Label::Signature) {
                    emit(selectors, [0, 0, 0, 0]);
                }
            }

            op::MLOAD => {
                if let Some(touched) = &ret.touched {
                    if touched.contains(&Label::CallData) {
                        narrow_to_signature(vm);
                    }
                }
            }

            _ => {}
        }
    }

    gas_used
}
