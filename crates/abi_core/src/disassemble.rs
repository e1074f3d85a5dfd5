//! Linear-sweep disassembly.

use alloy::primitives::hex;

use crate::opcodes as op;

/// One line per instruction: `(pc, "PUSH1 0x80")`. Unassigned byte values
/// print as `UNKNOWN_0x..` and PUSH immediates are kept on the same line.
pub fn disassemble(code: &[u8]) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let opcode = code[pc];
        let mut size = 1;
        let line = match op::name(opcode) {
            Some(name) if op::is_push(opcode) && op::push_size(opcode) > 0 => {
                let n = op::push_size(opcode);
                let end = (pc + 1 + n).min(code.len());
                size += n;
                format!("{name} 0x{}", hex::encode(&code[pc + 1..end]))
            }
            Some(name) => name.to_string(),
            None => format!("UNKNOWN_0x{opcode:02x}"),
        };
        out.push((pc, line));
        pc += size;
    }
    out
}
