//! Argument type inference for a single selector.
//!
//! The machine is run with calldata consisting of just the four selector
//! bytes. Once execution passes the dispatch comparison for that selector,
//! every calldata access is tracked: a load at a plain offset introduces an
//! argument slot, loads through argument-derived pointers descend into
//! dynamic payloads, and the opcodes applied to the labelled values (masks,
//! sign extensions, length scalings, double negations) vote on the Solidity
//! type of each slot. Votes carry a confidence score; a later weaker hint
//! never overwrites a stronger one.

use std::collections::{BTreeMap, HashSet};

use alloy::primitives::U256;
use primitives::element::Element;
use tracing::debug;

use crate::opcodes as op;
use crate::vm::{Calldata, Vm};

/// Default budget; argument decoding sits right behind the dispatcher, so
/// this is an order of magnitude below the selector budget.
pub const DEFAULT_GAS_LIMIT: u32 = 50_000;

/// What CALLDATASIZE is forced to report, so `length <= calldatasize`
/// guards behave as if real input were present.
const CALLDATASIZE_SENTINEL: u32 = 131_072;

/// Offsets just below the sentinel are compiler probes against the tail of
/// calldata (ERC-2771 style forwarder suffixes), not arguments.
const OFFSET_CUTOFF: u32 = CALLDATASIZE_SENTINEL - 1024;

/// A calldata-derived value: argument slot `offset` under `path` of nested
/// dynamic containments, plus the arithmetic already applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArgRef {
    offset: u32,
    path: Vec<u32>,
    add_val: u32,
    and_mask: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Label {
    CallData,
    Arg(ArgRef),
    /// Pointer into the payload of the dynamic argument at `(path, offset)`
    /// whose exact position is no longer tracked.
    ArgDynamic { offset: u32, path: Vec<u32> },
    /// The length word of the dynamic argument at `(path, offset)`.
    ArgDynamicLength { offset: u32, path: Vec<u32> },
    IsZeroResult(ArgRef),
}

/// Uniform argument view: the length word of a dynamic argument behaves as
/// the slot at offset zero of its payload.
fn arg_view(label: &Option<Label>) -> Option<ArgRef> {
    match label {
        Some(Label::Arg(arg)) => Some(arg.clone()),
        Some(Label::ArgDynamicLength { offset, path }) => {
            let mut full_path = path.clone();
            full_path.push(*offset);
            Some(ArgRef {
                offset: 0,
                path: full_path,
                add_val: 0,
                and_mask: None,
            })
        }
        _ => None,
    }
}

fn operand_view(operand: &Option<Element<Label>>) -> Option<ArgRef> {
    operand.as_ref().and_then(|el| arg_view(&el.label))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Dynamic containment (offset-addressed payload); payload slots seen.
    Dynamic(u32),
    /// Array with elements of `n` slots each.
    Array(u32),
}

/// One node of the inferred argument tree: a type vote, an optional
/// dynamic/array marker, and children keyed by 32-byte slot offset.
#[derive(Debug, Default)]
struct Info {
    shape: Option<Shape>,
    tname: Option<(String, u32)>,
    children: BTreeMap<u32, Info>,
}

impl Info {
    /// Serialise to the canonical Solidity signature form. Unknown leaves
    /// print as `uint256`.
    fn render(&self, is_root: bool) -> String {
        if let Some((name, _)) = &self.tname {
            if name == "bytes" {
                if matches!(
                    self.shape,
                    None | Some(Shape::Array(0)) | Some(Shape::Dynamic(1))
                ) {
                    return name.clone();
                }
            } else if self.children.is_empty()
                && matches!(self.shape, None | Some(Shape::Dynamic(_)))
            {
                return name.clone();
            }
        }

        let start_key = if matches!(self.shape, Some(Shape::Array(_))) {
            32
        } else {
            0
        };
        let mut end_key = self.children.keys().next_back().copied().unwrap_or(0);
        if let Some(Shape::Array(n) | Shape::Dynamic(n)) = self.shape {
            end_key = end_key.max(n * 32);
        }

        let q: Vec<String> = (start_key..=end_key)
            .step_by(32)
            .map(|k| match self.children.get(&k) {
                Some(child) => child.render(false),
                None => "uint256".to_string(),
            })
            .collect();

        let joined = q.join(",");
        let c = if q.len() > 1 && !is_root {
            format!("({joined})")
        } else {
            joined
        };

        if matches!(self.shape, Some(Shape::Array(_))) {
            return format!("{c}[]");
        }

        if matches!(self.shape, Some(Shape::Dynamic(_))) {
            if end_key == 0 && self.children.is_empty() {
                return "bytes".to_string();
            }
            if end_key == 32 {
                if self.children.is_empty() {
                    return "uint256[]".to_string();
                }
                if self.children.len() == 1
                    && self.children.values().next().is_some_and(|c| c.shape.is_none())
                {
                    return format!("{}[]", q[1]);
                }
            }
        }

        c
    }
}

#[derive(Debug, Default)]
struct ArgsResult {
    data: Info,
    /// Slots that took part in arithmetic; those never become `bool`.
    not_bool: HashSet<Vec<u32>>,
}

impl ArgsResult {
    fn get_or_create(&mut self, path: &[u32]) -> &mut Info {
        let mut node = &mut self.data;
        for key in path {
            node = node.children.entry(*key).or_default();
        }
        node
    }

    fn get(&self, path: &[u32]) -> Option<&Info> {
        let mut node = &self.data;
        for key in path {
            node = node.children.get(key)?;
        }
        Some(node)
    }

    fn get_mut(&mut self, path: &[u32]) -> Option<&mut Info> {
        let mut node = &mut self.data;
        for key in path {
            node = node.children.get_mut(key)?;
        }
        Some(node)
    }

    fn mark_not_bool(&mut self, path: &[u32], offset: u32) {
        let mut full_path = path.to_vec();
        full_path.push(offset);
        if let Some(node) = self.get_mut(&full_path) {
            if matches!(&node.tname, Some((name, _)) if name == "bool") {
                node.tname = None;
            }
        }
        self.not_bool.insert(full_path);
    }

    fn set_tname(&mut self, path: &[u32], offset: Option<u32>, tname: &str, confidence: u32) {
        let full_path = match offset {
            Some(offset) => {
                let mut p = path.to_vec();
                p.push(offset);
                p
            }
            None => path.to_vec(),
        };
        if tname == "bool" && self.not_bool.contains(&full_path) {
            return;
        }
        let node = self.get_or_create(&full_path);
        if let Some((_, have)) = &node.tname {
            if confidence <= *have {
                return;
            }
        }
        node.tname = Some((tname.to_string(), confidence));
    }

    /// For each prefix of `path`, whether that node is array-shaped.
    fn array_in_path(&self, path: &[u32]) -> Vec<bool> {
        let mut ret = Vec::with_capacity(path.len());
        let mut node = Some(&self.data);
        for key in path {
            node = node.and_then(|n| n.children.get(key));
            ret.push(matches!(node.map(|n| n.shape), Some(Some(Shape::Array(_)))));
        }
        ret
    }

    fn set_shape(&mut self, path: &[u32], shape: Shape) {
        if path.is_empty() {
            return;
        }
        let node = self.get_or_create(path);
        match (node.shape, shape) {
            // A wider payload observation never shrinks, and an array
            // verdict outranks a plain dynamic one.
            (Some(Shape::Dynamic(have)), Shape::Dynamic(new)) if have > new => return,
            (Some(Shape::Array(_)), Shape::Dynamic(_)) => return,
            (Some(Shape::Array(have)), Shape::Array(new)) if new < have => return,
            _ => {}
        }
        node.shape = Some(shape);
    }

    fn join_to_string(&self) -> String {
        if self.data.children.is_empty() {
            String::new()
        } else {
            self.data.render(true)
        }
    }
}

/// Map an AND mask to the Solidity type it implies, if any.
///
/// Contiguous low bits keep the low `N` bits of a word: `uintN` (or
/// `address` at 160). Contiguous high bits keep the high bytes: `bytesN`.
fn and_mask_to_type(mask: U256) -> Option<String> {
    if mask.is_zero() {
        return None;
    }
    if (mask & mask.wrapping_add(U256::ONE)).is_zero() {
        // 0x0000ffff
        let bl = mask.bit_len();
        if bl % 8 == 0 {
            return Some(if bl == 160 {
                "address".to_string()
            } else {
                format!("uint{bl}")
            });
        }
    } else {
        // 0xffff0000
        let m = U256::from_le_bytes(mask.to_be_bytes::<32>());
        if (m & m.wrapping_add(U256::ONE)).is_zero() {
            let bl = m.bit_len();
            if bl % 8 == 0 {
                return Some(format!("bytes{}", bl / 8));
            }
        }
    }
    None
}

fn one_word() -> [u8; 32] {
    U256::ONE.to_be_bytes()
}

/// Infer the canonical argument type string for `selector`.
pub fn extract_arguments(code: &[u8], selector: [u8; 4], gas_limit: u32) -> String {
    let calldata = selector;
    let mut vm: Vm<'_, Label> = Vm::new(code, Calldata::new(&calldata, Some(Label::CallData)));
    let mut args = ArgsResult::default();
    let mut gas_used = 0u32;
    let mut inside_function = false;

    while !vm.stopped {
        let ret = match vm.step() {
            Ok(ret) => ret,
            Err(_) => break,
        };
        gas_used += ret.gas;
        if gas_used > gas_limit {
            break;
        }

        if !inside_function {
            // The dispatch comparison that succeeds for our selector marks
            // the entry into the function body.
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

            op::CALLDATALOAD | op::CALLDATACOPY => {
                handle_calldata_read(&mut vm, &mut args, &ret);
            }

            op::ADD => {
                handle_add(&mut vm, &mut args, &ret);
            }

            op::MUL | op::SHL => {
                let scaled = handle_length_scaling(&mut vm, &mut args, &ret);
                if !scaled && ret.op == op::MUL {
                    if let Some(arg) = operand_view(&ret.first).or_else(|| operand_view(&ret.second))
                    {
                        args.mark_not_bool(&arg.path, arg.offset);
                    }
                }
            }

            op::GT | op::LT => {
                handle_compare(&mut vm, &mut args, &ret);
            }

            op::AND => {
                handle_and(&mut vm, &mut args, &ret);
            }

            op::EQ => {
                // Equality against the same slot masked earlier confirms the
                // mask-derived type.
                if let (Some(a), Some(b)) = (operand_view(&ret.first), operand_view(&ret.second)) {
                    let (plain, masked) = if a.and_mask.is_none() { (&a, &b) } else { (&b, &a) };
                    if plain.and_mask.is_none()
                        && plain.offset == masked.offset
                        && plain.path == masked.path
                        && plain.add_val == masked.add_val
                    {
                        if let Some(mask) = masked.and_mask {
                            if let Some(tname) = and_mask_to_type(mask) {
                                args.set_tname(&plain.path, Some(plain.offset), &tname, 20);
                            }
                        }
                    }
                }
            }

            op::ISZERO => {
                handle_iszero(&mut vm, &mut args, &ret);
            }

            op::SIGNEXTEND => {
                if let Some(arg) = operand_view(&ret.second) {
                    if let Some(first) = &ret.first {
                        let s0 = first.to_uint();
                        if s0 < U256::from(32) {
                            let bits = (s0.to::<u32>() + 1) * 8;
                            args.set_tname(&arg.path, Some(arg.offset), &format!("int{bits}"), 20);
                        }
                    }
                }
            }

            op::BYTE => {
                if let Some(arg) = operand_view(&ret.second) {
                    args.set_tname(&arg.path, Some(arg.offset), "bytes32", 4);
                }
            }

            _ => {}
        }
    }

    let joined = args.join_to_string();
    debug!(gas_used, arguments = %joined, "argument inference done");
    joined
}

fn mem_offset_of(operand: &Option<Element<Label>>) -> Option<usize> {
    operand.as_ref().and_then(|el| usize::try_from(el.to_uint()).ok())
}

/// Apply `label` (and optionally `data`) to the value a calldata read just
/// produced: the stack top for CALLDATALOAD, the fresh memory chunk for
/// CALLDATACOPY.
fn apply_to_read(
    vm: &mut Vm<'_, Label>,
    is_load: bool,
    mem_offset: Option<usize>,
    label: Label,
    data: Option<[u8; 32]>,
) {
    if is_load {
        if let Ok(top) = vm.stack.peek_mut() {
            top.label = Some(label);
            if let Some(data) = data {
                top.data = data;
            }
        }
    } else if let Some(offset) = mem_offset {
        if let Some(chunk) = vm.memory.get_mut(offset) {
            chunk.label = Some(label);
            if let Some(data) = data {
                chunk.data = data.to_vec();
            }
        }
    }
}

fn handle_calldata_read(
    vm: &mut Vm<'_, Label>,
    args: &mut ArgsResult,
    ret: &crate::vm::StepResult<Label>,
) {
    let is_load = ret.op == op::CALLDATALOAD;
    let mem_offset = if is_load { None } else { mem_offset_of(&ret.second) };
    let src_label = ret.first.as_ref().and_then(|el| el.label.clone());

    match src_label {
        Some(Label::Arg(_)) | Some(Label::ArgDynamicLength { .. }) => {
            let Some(arg) = arg_view(&src_label) else { return };
            // A read through `head + 4 + 32k` descends into the dynamic
            // payload of the argument; anything else is not a pointer shape
            // we understand.
            if arg.add_val < 4 || (arg.add_val - 4) % 32 != 0 {
                return;
            }
            let mut full_path = arg.path.clone();
            full_path.push(arg.offset);

            // Enclosing arrays shift payload offsets by one length slot each.
            let mut pointer_adjust = 0u32;
            if arg.add_val != 4 {
                pointer_adjust = args
                    .array_in_path(&arg.path)
                    .iter()
                    .filter(|is_array| **is_array)
                    .count() as u32
                    * 32;
                if pointer_adjust > arg.add_val - 4 {
                    pointer_adjust = 0;
                }
            }
            let new_off = arg.add_val - 4 - pointer_adjust;
            args.set_shape(&full_path, Shape::Dynamic(new_off / 32));

            // The length of an array we already sized: report one element
            // so iteration terminates quickly.
            let data_override = if new_off == 0
                && args.array_in_path(&full_path).last() == Some(&true)
            {
                Some(one_word())
            } else {
                None
            };

            let new_label = if new_off == 0 {
                Label::ArgDynamicLength {
                    offset: arg.offset,
                    path: arg.path.clone(),
                }
            } else {
                Label::Arg(ArgRef {
                    offset: new_off,
                    path: full_path,
                    add_val: 0,
                    and_mask: None,
                })
            };
            if !is_load {
                args.set_tname(&arg.path, Some(arg.offset), "bytes", 10);
            }
            apply_to_read(vm, is_load, mem_offset, new_label, data_override);
        }

        Some(Label::ArgDynamic { offset, path }) => {
            // Untracked pointer into a dynamic payload: note the payload
            // exists and label the value as its generic element.
            let mut full_path = path.clone();
            full_path.push(offset);
            args.set_shape(&full_path, Shape::Dynamic(1));
            let new_label = Label::Arg(ArgRef {
                offset: 32,
                path: full_path,
                add_val: 0,
                and_mask: None,
            });
            apply_to_read(vm, is_load, mem_offset, new_label, None);
        }

        _ => {
            // Plain offset: a top-level argument slot.
            let Some(first) = &ret.first else { return };
            let off = first.to_uint();
            if off < U256::from(4) || off >= U256::from(OFFSET_CUTOFF) {
                return;
            }
            let off = off.to::<u32>() - 4;
            args.get_or_create(&[off]);
            let new_label = Label::Arg(ArgRef {
                offset: off,
                path: Vec::new(),
                add_val: 0,
                and_mask: None,
            });
            apply_to_read(vm, is_load, mem_offset, new_label, None);
        }
    }
}

fn handle_add(vm: &mut Vm<'_, Label>, args: &mut ArgsResult, ret: &crate::vm::StepResult<Label>) {
    // Adding to a pointer that already escaped offset tracking keeps it a
    // dynamic-payload pointer.
    for operand in [&ret.first, &ret.second] {
        if let Some(Element {
            label: Some(Label::ArgDynamic { offset, path }),
            ..
        }) = operand
        {
            let label = Label::ArgDynamic {
                offset: *offset,
                path: path.clone(),
            };
            if let Ok(top) = vm.stack.peek_mut() {
                top.label = Some(label);
            }
            return;
        }
    }

    let first_view = operand_view(&ret.first);
    let second_view = operand_view(&ret.second);

    match (first_view, second_view) {
        (Some(f), Some(s)) => {
            args.mark_not_bool(&f.path, f.offset);
            args.mark_not_bool(&s.path, s.offset);
            // Prefer the more deeply nested operand; its containment is the
            // one the sum still points into.
            let winner = if f.path.len() > s.path.len() { &f } else { &s };
            let label = Label::Arg(ArgRef {
                offset: winner.offset,
                path: winner.path.clone(),
                add_val: f.add_val.wrapping_add(s.add_val),
                and_mask: winner.and_mask,
            });
            if let Ok(top) = vm.stack.peek_mut() {
                top.label = Some(label);
            }
        }
        (Some(arg), None) | (None, Some(arg)) => {
            args.mark_not_bool(&arg.path, arg.offset);
            let (own, other) = if operand_view(&ret.first).is_some() {
                (&ret.first, &ret.second)
            } else {
                (&ret.second, &ret.first)
            };
            let (Some(own), Some(other)) = (own.as_ref(), other.as_ref()) else {
                return;
            };

            // `length - 1` over an empty payload: pin the result to zero so
            // the iteration that follows exits.
            if arg.offset == 0
                && arg.add_val == 0
                && !arg.path.is_empty()
                && own.to_uint().is_zero()
                && other.to_uint() == U256::MAX
            {
                if let Ok(top) = vm.stack.peek_mut() {
                    top.data = [0u8; 32];
                }
            }

            let add = other.to_uint().wrapping_add(U256::from(arg.add_val));
            let label = if add < U256::from(1u64 << 32) {
                Label::Arg(ArgRef {
                    offset: arg.offset,
                    path: arg.path.clone(),
                    add_val: add.to::<u32>(),
                    and_mask: arg.and_mask,
                })
            } else {
                // Pointer arithmetic beyond tracking; remember only which
                // dynamic payload it leads into.
                Label::ArgDynamic {
                    offset: arg.offset,
                    path: arg.path.clone(),
                }
            };
            if let Ok(top) = vm.stack.peek_mut() {
                top.label = Some(label);
            }
        }
        (None, None) => {}
    }
}

/// `length * 1 / 2 / 32·k` (or the SHL equivalents) reveal what one element
/// of the payload occupies: bytes, a two-hex-chars string, or k slots.
fn handle_length_scaling(
    vm: &mut Vm<'_, Label>,
    args: &mut ArgsResult,
    ret: &crate::vm::StepResult<Label>,
) -> bool {
    let is_length = |view: &Option<ArgRef>| {
        matches!(view, Some(arg) if arg.offset == 0 && arg.add_val == 0)
    };

    let first_view = operand_view(&ret.first);
    let second_view = operand_view(&ret.second);

    let (arg, other) = if ret.op == op::MUL && is_length(&first_view) {
        (first_view.unwrap(), &ret.second)
    } else if is_length(&second_view) {
        // MUL is commutative; SHL carries the length in the second operand.
        (second_view.unwrap(), &ret.first)
    } else {
        return false;
    };

    args.mark_not_bool(&arg.path, 0);
    if let Some(other_arg) = operand_view(other) {
        args.mark_not_bool(&other_arg.path, other_arg.offset);
    }
    if arg.path.is_empty() {
        return true;
    }

    let Some(other) = other.as_ref() else {
        return true;
    };
    let mut mult = other.to_uint();
    if ret.op == op::SHL {
        if mult >= U256::from(256) {
            return true;
        }
        mult = U256::ONE << mult.to::<usize>();
    }

    if mult == U256::ONE {
        args.set_tname(&arg.path, None, "bytes", 10);
    } else if mult == U256::from(2) {
        args.set_tname(&arg.path, None, "string", 20);
    } else if mult % U256::from(32) == U256::ZERO
        && mult >= U256::from(32)
        && mult <= U256::from(3200)
    {
        let mult = mult.to::<u32>();
        args.set_shape(&arg.path, Shape::Array(mult / 32));

        // Every live copy of the length word now reads as one element, and
        // the byte size just computed matches exactly one element.
        let matches_length = |label: &Option<Label>| {
            matches!(
                arg_view(label),
                Some(v) if v.offset == 0 && v.add_val == 0 && v.path == arg.path
            )
        };
        for el in vm.stack.data.iter_mut() {
            if matches_length(&el.label) {
                el.data = one_word();
            }
        }
        for chunk in vm.memory.data.iter_mut() {
            if matches_length(&chunk.label) {
                chunk.data = one_word().to_vec();
            }
        }
        if let Ok(top) = vm.stack.peek_mut() {
            top.data = U256::from(mult).to_be_bytes();
        }
    }
    true
}

fn handle_compare(
    vm: &mut Vm<'_, Label>,
    args: &mut ArgsResult,
    ret: &crate::vm::StepResult<Label>,
) {
    let is_unmasked_length = |view: &Option<ArgRef>| {
        matches!(view, Some(arg) if arg.offset == 0 && arg.add_val == 0 && arg.and_mask.is_none())
    };

    let first_view = operand_view(&ret.first);
    let second_view = operand_view(&ret.second);

    // `length > 0` / `0 < length` style loop guards: force them true so one
    // iteration of the element-decoding loop runs.
    let guard = match ret.op {
        op::GT if is_unmasked_length(&first_view) => {
            first_view.clone().map(|arg| (arg, &ret.second))
        }
        op::LT if is_unmasked_length(&second_view) => {
            second_view.clone().map(|arg| (arg, &ret.first))
        }
        _ => None,
    };

    if let Some((arg, other)) = guard {
        args.mark_not_bool(&arg.path, 0);
        if let Some(other) = other.as_ref() {
            let v = other.to_uint();
            if v.is_zero() || v == U256::from(31) {
                if let Ok(top) = vm.stack.peek_mut() {
                    top.data = one_word();
                }
            }
        }
    } else if let Some(arg) = first_view.or(second_view) {
        args.mark_not_bool(&arg.path, arg.offset);
    }
}

fn handle_and(vm: &mut Vm<'_, Label>, args: &mut ArgsResult, ret: &crate::vm::StepResult<Label>) {
    let unmasked = |view: Option<ArgRef>| view.filter(|arg| arg.and_mask.is_none());

    let (arg, other) = if let Some(arg) = unmasked(operand_view(&ret.first)) {
        (arg, &ret.second)
    } else if let Some(arg) = unmasked(operand_view(&ret.second)) {
        (arg, &ret.first)
    } else {
        return;
    };

    args.mark_not_bool(&arg.path, arg.offset);
    let Some(other) = other.as_ref() else { return };
    let mask = other.to_uint();
    if let Some(tname) = and_mask_to_type(mask) {
        args.set_tname(&arg.path, Some(arg.offset), &tname, 5);
        if let Ok(top) = vm.stack.peek_mut() {
            top.label = Some(Label::Arg(ArgRef {
                offset: arg.offset,
                path: arg.path,
                add_val: arg.add_val,
                and_mask: Some(mask),
            }));
        }
    }
}

fn handle_iszero(
    vm: &mut Vm<'_, Label>,
    args: &mut ArgsResult,
    ret: &crate::vm::StepResult<Label>,
) {
    if let Some(arg) = operand_view(&ret.first) {
        if let Ok(top) = vm.stack.peek_mut() {
            top.label = Some(Label::IsZeroResult(arg));
        }
        return;
    }

    let Some(Element {
        label: Some(Label::IsZeroResult(arg)),
        ..
    }) = &ret.first
    else {
        return;
    };

    // A double ISZERO usually means a boolean argument -- except the
    // division zero-guard shape: ISZERO ISZERO PUSH JUMPI ... JUMPDEST DIV.
    let mut is_bool = true;
    if let Some(&next) = vm.code.get(vm.pc) {
        if (op::PUSH1..=op::PUSH4).contains(&next) {
            let n = op::push_size(next);
            if vm.code.get(vm.pc + n + 1) == Some(&op::JUMPI) {
                let end = (vm.pc + 1 + n).min(vm.code.len());
                let mut dest = 0usize;
                for &b in &vm.code[(vm.pc + 1).min(vm.code.len())..end] {
                    dest = (dest << 8) | b as usize;
                }
                if dest + 1 < vm.code.len()
                    && vm.code[dest] == op::JUMPDEST
                    && vm.code[dest + 1] == op::DIV
                {
                    is_bool = false;
                }
            }
        }
    }
    if is_bool {
        args.set_tname(&arg.path, Some(arg.offset), "bool", 5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEL: [u8; 4] = [0xfa, 0xe7, 0xab, 0x82];

    /// Selector isolation, one EQ compare, jump into `body` at 16.
    fn with_dispatcher(body: &[u8]) -> Vec<u8> {
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
            15,
            op::JUMPI,
            op::STOP,
            op::JUMPDEST,
        ];
        code.extend_from_slice(body);
        code
    }

    fn infer(body: &[u8]) -> String {
        extract_arguments(&with_dispatcher(body), SEL, DEFAULT_GAS_LIMIT)
    }

    #[test]
    fn no_calldata_reads_means_no_arguments() {
        assert_eq!(infer(&[op::STOP]), "");
    }

    #[test]
    fn low_mask_infers_uint32() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH4, 0xff, 0xff, 0xff, 0xff, op::AND,
            op::STOP,
        ];
        assert_eq!(infer(&body), "uint32");
    }

    #[test]
    fn mask_of_160_bits_infers_address() {
        let mut body = vec![op::PUSH1, 0x04, op::CALLDATALOAD, op::PUSH20];
        body.extend_from_slice(&[0xff; 20]);
        body.extend_from_slice(&[op::AND, op::STOP]);
        assert_eq!(infer(&body), "address");
    }

    #[test]
    fn high_mask_infers_bytes_n() {
        // 0xffff0000...00 keeps the top two bytes.
        let mut body = vec![op::PUSH1, 0x04, op::CALLDATALOAD, op::PUSH32, 0xff, 0xff];
        body.extend_from_slice(&[0x00; 30]);
        body.extend_from_slice(&[op::AND, op::STOP]);
        assert_eq!(infer(&body), "bytes2");
    }

    #[test]
    fn untyped_slot_defaults_to_uint256() {
        let body = [op::PUSH1, 0x04, op::CALLDATALOAD, op::POP, op::STOP];
        assert_eq!(infer(&body), "uint256");
    }

    #[test]
    fn double_iszero_infers_bool() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::ISZERO, op::ISZERO, op::POP,
            op::STOP,
        ];
        assert_eq!(infer(&body), "bool");
    }

    #[test]
    fn division_zero_guard_is_not_bool() {
        // body at 16: the double ISZERO feeds a JUMPI whose destination is
        // JUMPDEST DIV -- a zero check on a divisor, not a boolean.
        let body = [
            /* 16 */ op::PUSH1, 0x04,
            /* 18 */ op::CALLDATALOAD,
            /* 19 */ op::ISZERO,
            /* 20 */ op::ISZERO,
            /* 21 */ op::PUSH1, 25,
            /* 23 */ op::JUMPI,
            /* 24 */ op::STOP,
            /* 25 */ op::JUMPDEST,
            /* 26 */ op::DIV,
        ];
        assert_eq!(infer(&body), "uint256");
    }

    #[test]
    fn arithmetic_blocks_bool_votes() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::DUP1, op::PUSH1, 0x01, op::ADD, op::POP,
            op::ISZERO, op::ISZERO, op::POP,
            op::STOP,
        ];
        assert_eq!(infer(&body), "uint256");
    }

    #[test]
    fn signextend_infers_int8() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH1, 0x00, op::SIGNEXTEND,
            op::STOP,
        ];
        assert_eq!(infer(&body), "int8");
    }

    #[test]
    fn byte_extraction_infers_bytes32() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH1, 0x00, op::BYTE,
            op::STOP,
        ];
        assert_eq!(infer(&body), "bytes32");
    }

    #[test]
    fn signextend_outranks_mask_vote() {
        // AND(uint8 mask) scores 5, SIGNEXTEND scores 20.
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::DUP1, op::PUSH1, 0xff, op::AND, op::POP,
            op::PUSH1, 0x00, op::SIGNEXTEND,
            op::STOP,
        ];
        assert_eq!(infer(&body), "int8");
    }

    #[test]
    fn shifted_length_infers_uint256_array() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD, // head pointer
            op::PUSH1, 0x04, op::ADD,          // absolute offset of length
            op::CALLDATALOAD,                  // length word
            op::PUSH1, 0x05, op::SHL,          // length * 32 bytes
            op::STOP,
        ];
        assert_eq!(infer(&body), "uint256[]");
    }

    #[test]
    fn doubled_length_infers_string() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH1, 0x04, op::ADD,
            op::CALLDATALOAD,
            op::PUSH1, 0x02, op::MUL,
            op::STOP,
        ];
        assert_eq!(infer(&body), "string");
    }

    #[test]
    fn calldatacopy_through_pointer_infers_bytes() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH1, 0x04, op::ADD,
            op::PUSH1, 0x20, // size
            op::SWAP1,
            op::PUSH0, // memory offset
            op::CALLDATACOPY,
            op::STOP,
        ];
        assert_eq!(infer(&body), "bytes");
    }

    #[test]
    fn element_mask_gives_typed_array() {
        let mut body = vec![
            op::PUSH1, 0x04, op::CALLDATALOAD, // head pointer
            op::PUSH1, 0x24, op::ADD,          // first element slot (4 + 32)
            op::CALLDATALOAD,                  // element value
            op::PUSH20,
        ];
        body.extend_from_slice(&[0xff; 20]);
        body.extend_from_slice(&[op::AND, op::STOP]);
        assert_eq!(infer(&body), "address[]");
    }

    #[test]
    fn multiple_slots_in_order() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD, op::POP,
            op::PUSH1, 0x24, op::CALLDATALOAD,
            op::PUSH4, 0xff, 0xff, 0xff, 0xff, op::AND, op::POP,
            op::STOP,
        ];
        assert_eq!(infer(&body), "uint256,uint32");
    }

    #[test]
    fn xor_dispatch_also_enters_the_function() {
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
            op::XOR,
            op::ISZERO,
            op::PUSH1,
            16,
            op::JUMPI,
            op::STOP,
            op::JUMPDEST,
        ];
        code.extend_from_slice(&[
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH4, 0xff, 0xff, 0xff, 0xff, op::AND,
            op::STOP,
        ]);
        assert_eq!(extract_arguments(&code, SEL, DEFAULT_GAS_LIMIT), "uint32");
    }

    #[test]
    fn unknown_selector_never_enters() {
        let body = [
            op::PUSH1, 0x04, op::CALLDATALOAD,
            op::PUSH4, 0xff, 0xff, 0xff, 0xff, op::AND,
            op::STOP,
        ];
        let code = with_dispatcher(&body);
        assert_eq!(extract_arguments(&code, [0x01, 0x02, 0x03, 0x04], DEFAULT_GAS_LIMIT), "");
    }

    #[test]
    fn mask_table() {
        assert_eq!(and_mask_to_type(U256::from(0xffu64)), Some("uint8".into()));
        assert_eq!(and_mask_to_type(U256::from(0xffffffffu64)), Some("uint32".into()));
        assert_eq!(
            and_mask_to_type((U256::ONE << 160) - U256::ONE),
            Some("address".into())
        );
        assert_eq!(and_mask_to_type(U256::MAX), Some("uint256".into()));
        // High-bit masks read as fixed-size bytes.
        assert_eq!(
            and_mask_to_type(U256::MAX << 192),
            Some("bytes8".into())
        );
        // Non-contiguous and misaligned masks mean nothing.
        assert_eq!(and_mask_to_type(U256::from(0xff00ffu64)), None);
        assert_eq!(and_mask_to_type(U256::from(0x7fu64)), None);
        assert_eq!(and_mask_to_type(U256::ZERO), None);
    }

    #[test]
    fn render_nested_tuple() {
        let mut inner = Info::default();
        inner.children.insert(
            0,
            Info {
                tname: Some(("bool".into(), 5)),
                ..Default::default()
            },
        );
        inner.children.insert(
            32,
            Info {
                tname: Some(("bytes32".into(), 4)),
                ..Default::default()
            },
        );

        let mut root = Info::default();
        root.children.insert(
            0,
            Info {
                tname: Some(("uint32".into(), 5)),
                ..Default::default()
            },
        );
        root.children.insert(32, inner);

        // Nested nodes print parenthesised, the root level does not.
        assert_eq!(root.render(true), "uint32,(bool,bytes32)");
    }

    #[test]
    fn render_array_of_tuples() {
        let mut element = Info {
            shape: Some(Shape::Array(2)),
            ..Default::default()
        };
        element.children.insert(
            32,
            Info {
                tname: Some(("address".into(), 5)),
                ..Default::default()
            },
        );
        assert_eq!(element.render(false), "(address,uint256)[]");
    }
}
