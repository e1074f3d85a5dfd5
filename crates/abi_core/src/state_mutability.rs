//! State mutability classification for a single selector.
//!
//! The classifier watches two things while executing towards and inside the
//! function body: whether a `callvalue` guard exists anywhere on the path
//! (its absence means the function accepts ether), and which state-touching
//! opcodes actually run once the dispatch comparison has been passed.

use alloy::primitives::U256;
use std::fmt;
use tracing::debug;

use crate::opcodes as op;
use crate::vm::{Calldata, Vm};

pub const DEFAULT_GAS_LIMIT: u32 = 50_000;

/// Forced CALLDATASIZE result, same sentinel the argument driver uses.
const CALLDATASIZE_SENTINEL: u32 = 131_072;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StateMutability {
    Pure,
    View,
    Payable,
    NonPayable,
}

impl StateMutability {
    /// Benchmark normalisation: sources that do not distinguish read-only
    /// functions report everything non-payable.
    pub fn loose(self) -> Self {
        match self {
            StateMutability::Pure | StateMutability::View => StateMutability::NonPayable,
            other => other,
        }
    }
}

impl fmt::Display for StateMutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateMutability::Pure => "pure",
            StateMutability::View => "view",
            StateMutability::Payable => "payable",
            StateMutability::NonPayable => "nonpayable",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Label {
    CallData,
    CallValue,
}

/// Classify the function behind `selector`.
pub fn extract_state_mutability(
    code: &[u8],
    selector: [u8; 4],
    gas_limit: u32,
) -> StateMutability {
    let calldata = selector;
    let mut vm: Vm<'_, Label> = Vm::new(code, Calldata::new(&calldata, Some(Label::CallData)));
    let mut gas_used = 0u32;
    let mut inside_function = false;
    let mut value_checked = false;
    let mut reads_state = false;
    let mut writes_state = false;

    while !vm.stopped {
        let ret = match vm.step() {
            Ok(ret) => ret,
            Err(_) => break,
        };
        gas_used += ret.gas;
        if gas_used > gas_limit {
            break;
        }

        // The callvalue guard may sit in a shared prologue before dispatch
        // or at the top of the function body, so track it throughout.
        match ret.op {
            op::CALLVALUE => {
                if let Ok(top) = vm.stack.peek_mut() {
                    top.label = Some(Label::CallValue);
                }
            }
            op::ISZERO | op::EQ | op::LT | op::GT => {
                let on_callvalue = [&ret.first, &ret.second].into_iter().any(|operand| {
                    matches!(
                        operand.as_ref().and_then(|el| el.label.as_ref()),
                        Some(Label::CallValue)
                    )
                });
                if on_callvalue {
                    value_checked = true;
                }
            }
            _ => {}
        }

        if !inside_function {
            if matches!(ret.op, op::EQ | op::XOR | op::SUB) {
                let hit = if ret.op == op::EQ { U256::ONE } else { U256::ZERO };
                if vm.stack.peek().map(|p| p.to_uint()) == Ok(hit) {
                    if let Some(first) = &ret.first {
                        inside_function = first.data.ends_with(&selector);
                    }
                }
            }
            continue;
        }

        match ret.op {
            op::CALLDATASIZE => {
                if vm.stack.pop().is_ok() {
                    let _ = vm.stack.push_uint(U256::from(CALLDATASIZE_SENTINEL));
                }
            }

            op::SSTORE
            | op::CREATE
            | op::CREATE2
            | op::SELFDESTRUCT
            | op::CALLCODE
            | op::DELEGATECALL
            | op::TSTORE => {
                writes_state = true;
            }

            o if op::is_log(o) => {
                writes_state = true;
            }

            op::CALL => {
                // Only an ether transfer makes a plain call state-modifying
                // for our purposes; a zero-value call reads at most.
                let transfers = ret
                    .first
                    .as_ref()
                    .is_some_and(|value| !value.to_uint().is_zero());
                if transfers {
                    writes_state = true;
                } else {
                    reads_state = true;
                }
            }

            op::SLOAD
            | op::TLOAD
            | op::BALANCE
            | op::EXTCODESIZE
            | op::EXTCODEHASH
            | op::BLOCKHASH
            | op::ADDRESS
            | op::CALLER
            | op::ORIGIN
            | op::COINBASE
            | op::TIMESTAMP
            | op::NUMBER
            | op::PREVRANDAO
            | op::GASLIMIT
            | op::CHAINID
            | op::SELFBALANCE
            | op::BASEFEE
            | op::BLOBBASEFEE
            | op::GASPRICE
            | op::GAS
            | op::STATICCALL
            | op::RETURNDATASIZE
            | op::RETURNDATACOPY => {
                reads_state = true;
            }

            _ => {}
        }
    }

    let mutability = if !value_checked {
        StateMutability::Payable
    } else if writes_state {
        StateMutability::NonPayable
    } else if reads_state {
        StateMutability::View
    } else {
        StateMutability::Pure
    };
    debug!(gas_used, %mutability, "mutability classification done");
    mutability
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEL: [u8; 4] = [0xfa, 0xe7, 0xab, 0x82];

    /// Selector isolation and one EQ compare, laid out at `base`, jumping
    /// into `body` right after its own STOP fallback.
    fn dispatcher_at(base: u8, body: &[u8]) -> Vec<u8> {
        let mut code = vec![
            op::PUSH0,
            op::CALLDATALOAD,
            op::PUSH1,
            0xe0,
            op::SHR,
            op::PUSH4,
            SEL[0],
            SEL[1],
            SEL[2],
            SEL[3],
            op::EQ,
            op::PUSH1,
            base + 15,
            op::JUMPI,
            op::STOP,
            op::JUMPDEST,
        ];
        code.extend_from_slice(body);
        code
    }

    /// `if (msg.value != 0) revert;` prologue in front of the dispatcher.
    fn with_value_guard(body: &[u8]) -> Vec<u8> {
        let mut code = vec![
            op::CALLVALUE,
            op::ISZERO,
            op::PUSH1,
            8,
            op::JUMPI,
            op::PUSH0,
            op::PUSH0,
            op::REVERT,
            op::JUMPDEST,
        ];
        code.extend_from_slice(&dispatcher_at(9, body));
        code
    }

    fn classify(code: &[u8]) -> StateMutability {
        extract_state_mutability(code, SEL, DEFAULT_GAS_LIMIT)
    }

    #[test]
    fn no_value_guard_means_payable() {
        let code = dispatcher_at(0, &[op::STOP]);
        assert_eq!(classify(&code), StateMutability::Payable);
    }

    #[test]
    fn guarded_and_effect_free_means_pure() {
        let code = with_value_guard(&[
            op::PUSH1, 0x04, op::CALLDATALOAD, op::PUSH1, 0x01, op::ADD, op::POP, op::STOP,
        ]);
        assert_eq!(classify(&code), StateMutability::Pure);
    }

    #[test]
    fn guard_inside_function_body_counts_too() {
        let body = [
            /* 16 */ op::CALLVALUE,
            /* 17 */ op::ISZERO,
            /* 18 */ op::PUSH1, 22,
            /* 20 */ op::JUMPI,
            /* 21 */ op::STOP,
            /* 22 */ op::JUMPDEST,
            /* 23 */ op::STOP,
        ];
        let code = dispatcher_at(0, &body);
        assert_eq!(classify(&code), StateMutability::Pure);
    }

    #[test]
    fn sload_means_view() {
        let code = with_value_guard(&[op::PUSH0, op::SLOAD, op::POP, op::STOP]);
        assert_eq!(classify(&code), StateMutability::View);
    }

    #[test]
    fn environment_read_means_view() {
        let code = with_value_guard(&[op::CALLER, op::POP, op::STOP]);
        assert_eq!(classify(&code), StateMutability::View);
    }

    #[test]
    fn sstore_means_nonpayable() {
        let code = with_value_guard(&[op::PUSH0, op::PUSH0, op::SSTORE, op::STOP]);
        assert_eq!(classify(&code), StateMutability::NonPayable);
    }

    #[test]
    fn log_means_nonpayable() {
        let code = with_value_guard(&[op::PUSH0, op::PUSH0, op::LOG0, op::STOP]);
        assert_eq!(classify(&code), StateMutability::NonPayable);
    }

    #[test]
    fn writes_outrank_reads() {
        let code = with_value_guard(&[
            op::PUSH0, op::SLOAD, op::PUSH0, op::SSTORE, op::STOP,
        ]);
        assert_eq!(classify(&code), StateMutability::NonPayable);
    }

    #[test]
    fn value_transfer_call_means_nonpayable() {
        // call(gas, addr, value=1, 0, 0, 0, 0)
        let code = with_value_guard(&[
            op::PUSH0, // ret len
            op::PUSH0, // ret offset
            op::PUSH0, // args len
            op::PUSH0, // args offset
            op::PUSH1, 0x01, // value
            op::PUSH0, // addr
            op::GAS,
            op::CALL,
            op::POP,
            op::STOP,
        ]);
        assert_eq!(classify(&code), StateMutability::NonPayable);
    }

    #[test]
    fn zero_value_call_reads_only() {
        let code = with_value_guard(&[
            op::PUSH0,
            op::PUSH0,
            op::PUSH0,
            op::PUSH0,
            op::PUSH0, // value = 0
            op::PUSH0,
            op::GAS,
            op::CALL,
            op::POP,
            op::STOP,
        ]);
        assert_eq!(classify(&code), StateMutability::View);
    }

    #[test]
    fn loose_mode_collapses_read_only() {
        assert_eq!(StateMutability::Pure.loose(), StateMutability::NonPayable);
        assert_eq!(StateMutability::View.loose(), StateMutability::NonPayable);
        assert_eq!(StateMutability::Payable.loose(), StateMutability::Payable);
        assert_eq!(
            StateMutability::NonPayable.loose(),
            StateMutability::NonPayable
        );
    }

    #[test]
    fn display_values() {
        assert_eq!(StateMutability::Pure.to_string(), "pure");
        assert_eq!(StateMutability::View.to_string(), "view");
        assert_eq!(StateMutability::Payable.to_string(), "payable");
        assert_eq!(StateMutability::NonPayable.to_string(), "nonpayable");
    }
}
