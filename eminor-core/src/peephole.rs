//! Semantics-preserving local rewrites on the emitted byte stream.
//!
//! One pattern in v1: `PUSHK a; PUSHK b; BIN op` with a pure arithmetic op
//! and two numeric pool entries folds to a single `PUSHK` of the wrapped
//! 32-bit result, interned back into the pool. Runs before the linker, so
//! branch operands are still sentinels; a window is skipped whenever a
//! recorded fixup position or jump target falls inside it. Folding shrinks
//! the stream, so the relocation, label and function tables are rewritten
//! through an instruction-boundary offset map after each pass. Passes repeat
//! until nothing changes.

use std::collections::HashSet;

use crate::ast::Literal;
use crate::emitter::EmitUnit;
use crate::opcode::*;
use crate::span::Span;

pub fn optimize(unit: &mut EmitUnit) {
    while fold_pass(unit) {}
}

fn fold_pass(unit: &mut EmitUnit) -> bool {
    let fixups: HashSet<u32> = unit.relocs.iter().map(|r| r.pos).collect();
    let mut targets: HashSet<u32> = unit.labels.values().copied().collect();
    targets.extend(unit.functions.iter().map(|(_, off)| *off));

    let text = std::mem::take(&mut unit.text);
    let mut out: Vec<u8> = Vec::with_capacity(text.len());
    // Old byte offset -> new byte offset, valid at every byte of every
    // surviving instruction (relocation positions point at operands).
    let mut map: Vec<u32> = vec![0; text.len() + 1];
    let mut changed = false;

    let mut i = 0usize;
    while i < text.len() {
        let op = text[i];
        let len = 1 + operand_len(op).unwrap_or(0);

        if op == OP_PUSHK
            && i + 12 <= text.len()
            && text[i + 5] == OP_PUSHK
            && text[i + 10] == OP_BIN
            && is_pure_arith(text[i + 11])
            && window_is_free(i, &fixups, &targets)
        {
            let lhs = unit.pool.entries().get(read_u32le(&text, i + 1) as usize);
            let rhs = unit.pool.entries().get(read_u32le(&text, i + 6) as usize);
            if let (Some(a), Some(b)) = (
                lhs.and_then(|e| e.numeric()),
                rhs.and_then(|e| e.numeric()),
            ) {
                if let Some(folded) = fold(a, b, text[i + 11]) {
                    if let Ok(kidx) = unit
                        .pool
                        .intern(&Literal::Int(folded as i64), Span::default())
                    {
                        let new_at = out.len() as u32;
                        for j in i..i + 12 {
                            map[j] = new_at;
                        }
                        out.push(OP_PUSHK);
                        out.extend_from_slice(&(kidx as u32).to_le_bytes());
                        i += 12;
                        changed = true;
                        continue;
                    }
                }
            }
        }

        let new_at = out.len();
        for j in 0..len.min(text.len() - i) {
            map[i + j] = (new_at + j) as u32;
        }
        out.extend_from_slice(&text[i..(i + len).min(text.len())]);
        i += len;
    }
    map[text.len()] = out.len() as u32;

    unit.text = out;
    if changed {
        for reloc in &mut unit.relocs {
            reloc.pos = map[reloc.pos as usize];
        }
        for offset in unit.labels.values_mut() {
            *offset = map[*offset as usize];
        }
        for (_, offset) in &mut unit.functions {
            *offset = map[*offset as usize];
        }
    }
    changed
}

fn is_pure_arith(bop: u8) -> bool {
    matches!(bop, B_ADD | B_SUB | B_MUL | B_DIV | B_MOD)
}

fn window_is_free(i: usize, fixups: &HashSet<u32>, targets: &HashSet<u32>) -> bool {
    let start = i as u32;
    if (start..start + 12).any(|pos| fixups.contains(&pos)) {
        return false;
    }
    // A jump target at the window start is fine; the fold lands there.
    (start + 1..start + 12).all(|pos| !targets.contains(&pos))
}

/// Wrapped unsigned 32-bit arithmetic; division and modulo by zero abort
/// the fold so the run-time trap is preserved.
fn fold(a: u32, b: u32, bop: u8) -> Option<u32> {
    match bop {
        B_ADD => Some(a.wrapping_add(b)),
        B_SUB => Some(a.wrapping_sub(b)),
        B_MUL => Some(a.wrapping_mul(b)),
        B_DIV if b != 0 => Some(a / b),
        B_MOD if b != 0 => Some(a % b),
        _ => None,
    }
}
