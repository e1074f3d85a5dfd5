//! ABI extraction from raw EVM runtime bytecode.
//!
//! No source, no metadata, no chain access: the analyses run the bytecode on
//! a small symbolic interpreter whose values carry provenance labels, and
//! read function selectors, argument types, state mutability and the
//! control-flow graph out of the opcode patterns the dispatcher and the ABI
//! decoder leave behind.
//!
//! ```
//! use abi_core::{contract_info, AnalysisSelection};
//!
//! let code = abi_core::decode_hex_code("0x6080604052").unwrap();
//! let info = contract_info(
//!     &code,
//!     &AnalysisSelection {
//!         selectors: true,
//!         ..Default::default()
//!     },
//! );
//! assert!(info.functions.is_empty());
//! ```

pub mod arguments;
pub mod control_flow_graph;
pub mod disassemble;
pub mod opcodes;
pub mod selectors;
pub mod state_mutability;
pub mod vm;

use thiserror::Error;

pub use control_flow_graph::{BasicBlock, BlockType, ControlFlowGraph};
pub use state_mutability::StateMutability;

/// Input problems, the only errors that ever reach the caller. Everything
/// the interpreter trips over downstream is treated as the end of that
/// particular exploration, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid hex input: {0}")]
    InvalidHex(#[from] alloy::primitives::hex::FromHexError),
    #[error("selector must be 4 bytes, got {0}")]
    BadSelectorLength(usize),
}

/// Decode a hex bytecode string; `0x` prefix optional, case-insensitive.
pub fn decode_hex_code(input: &str) -> Result<Vec<u8>, ParseError> {
    Ok(alloy::primitives::hex::decode(input.trim())?)
}

/// Decode an 8-hex-char selector, `0x` prefix optional.
pub fn decode_selector(input: &str) -> Result<[u8; 4], ParseError> {
    let bytes = alloy::primitives::hex::decode(input.trim())?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseError::BadSelectorLength(len))
}

/// Which analyses [`contract_info`] should run. Requesting `arguments` or
/// `state_mutability` implies `selectors`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisSelection {
    pub selectors: bool,
    pub arguments: bool,
    pub state_mutability: bool,
    pub basic_blocks: bool,
    pub control_flow_graph: bool,
    pub disassemble: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Function {
    /// 8 lowercase hex characters, no prefix.
    pub selector: String,
    /// Canonical Solidity type list, empty string for no arguments.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub arguments: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub state_mutability: Option<StateMutability>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Contract {
    pub functions: Vec<Function>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub disassembled: Option<Vec<(usize, String)>>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub basic_blocks: Option<Vec<(usize, usize)>>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub control_flow_graph: Option<ControlFlowGraph>,
}

/// Run the requested analyses over `code`. Each analysis gets a fresh
/// machine; nothing is shared or cached between calls.
pub fn contract_info(code: &[u8], selection: &AnalysisSelection) -> Contract {
    let want_selectors =
        selection.selectors || selection.arguments || selection.state_mutability;

    let mut functions = Vec::new();
    if want_selectors {
        for selector in selectors::extract_selectors(code, selectors::DEFAULT_GAS_LIMIT) {
            let arguments = selection.arguments.then(|| {
                arguments::extract_arguments(code, selector, arguments::DEFAULT_GAS_LIMIT)
            });
            let state_mutability = selection.state_mutability.then(|| {
                state_mutability::extract_state_mutability(
                    code,
                    selector,
                    state_mutability::DEFAULT_GAS_LIMIT,
                )
            });
            functions.push(Function {
                selector: alloy::primitives::hex::encode(selector),
                arguments,
                state_mutability,
            });
        }
    }

    Contract {
        functions,
        disassembled: selection.disassemble.then(|| disassemble::disassemble(code)),
        basic_blocks: selection
            .basic_blocks
            .then(|| control_flow_graph::basic_blocks(code)),
        control_flow_graph: selection
            .control_flow_graph
            .then(|| control_flow_graph::control_flow_graph(code)),
    }
}

/// All dispatched selectors as 8-hex-char strings, first-seen order.
pub fn function_selectors(code: &[u8], gas_limit: Option<u32>) -> Vec<String> {
    selectors::extract_selectors(code, gas_limit.unwrap_or(selectors::DEFAULT_GAS_LIMIT))
        .into_iter()
        .map(alloy::primitives::hex::encode)
        .collect()
}

/// Argument type string for one selector, e.g. `"uint32,address[]"`.
pub fn function_arguments(code: &[u8], selector: [u8; 4], gas_limit: Option<u32>) -> String {
    arguments::extract_arguments(
        code,
        selector,
        gas_limit.unwrap_or(arguments::DEFAULT_GAS_LIMIT),
    )
}

/// Mutability classification for one selector.
pub fn function_state_mutability(
    code: &[u8],
    selector: [u8; 4],
    gas_limit: Option<u32>,
) -> StateMutability {
    state_mutability::extract_state_mutability(
        code,
        selector,
        gas_limit.unwrap_or(state_mutability::DEFAULT_GAS_LIMIT),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_decoding_accepts_prefix_and_case() {
        assert_eq!(decode_hex_code("0x6080").unwrap(), vec![0x60, 0x80]);
        assert_eq!(decode_hex_code("6080").unwrap(), vec![0x60, 0x80]);
        assert_eq!(decode_hex_code("0xAB").unwrap(), vec![0xab]);
        assert_eq!(decode_hex_code("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn hex_decoding_rejects_garbage() {
        assert!(matches!(decode_hex_code("0xzz"), Err(ParseError::InvalidHex(_))));
        assert!(matches!(decode_hex_code("123"), Err(ParseError::InvalidHex(_))));
    }

    #[test]
    fn selector_decoding_checks_length() {
        assert_eq!(decode_selector("fae7ab82").unwrap(), [0xfa, 0xe7, 0xab, 0x82]);
        assert_eq!(decode_selector("0xfae7ab82").unwrap(), [0xfa, 0xe7, 0xab, 0x82]);
        assert_eq!(
            decode_selector("fae7ab"),
            Err(ParseError::BadSelectorLength(3))
        );
    }

    #[test]
    fn empty_code_has_no_functions() {
        let info = contract_info(
            &[],
            &AnalysisSelection {
                selectors: true,
                ..Default::default()
            },
        );
        assert!(info.functions.is_empty());
        assert!(info.disassembled.is_none());
        assert!(info.basic_blocks.is_none());
        assert!(info.control_flow_graph.is_none());
    }

    #[test]
    fn arguments_request_implies_selectors() {
        // EQ-chain dispatcher with an empty body.
        let code = [
            opcodes::PUSH0,
            opcodes::CALLDATALOAD,
            opcodes::PUSH1,
            0xe0,
            opcodes::SHR,
            opcodes::DUP1,
            opcodes::PUSH4,
            0x11,
            0x22,
            0x33,
            0x44,
            opcodes::EQ,
            opcodes::PUSH1,
            0x00,
            opcodes::JUMPI,
            opcodes::STOP,
        ];
        let info = contract_info(
            &code,
            &AnalysisSelection {
                arguments: true,
                ..Default::default()
            },
        );
        assert_eq!(info.functions.len(), 1);
        assert_eq!(info.functions[0].selector, "11223344");
        assert_eq!(info.functions[0].arguments.as_deref(), Some(""));
        assert!(info.functions[0].state_mutability.is_none());
    }

    #[test]
    fn unselected_sections_stay_empty() {
        let code = [opcodes::STOP];
        let info = contract_info(&code, &AnalysisSelection::default());
        assert!(info.functions.is_empty());
        assert!(info.disassembled.is_none());

        let info = contract_info(
            &code,
            &AnalysisSelection {
                disassemble: true,
                basic_blocks: true,
                control_flow_graph: true,
                ..Default::default()
            },
        );
        assert_eq!(info.disassembled.unwrap(), vec![(0, "STOP".to_string())]);
        assert_eq!(info.basic_blocks.unwrap(), vec![(0, 0)]);
        assert_eq!(info.control_flow_graph.unwrap().blocks.len(), 1);
    }
}
