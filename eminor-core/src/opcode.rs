//! The published byte-opcode numbering.
//!
//! This table is the single source of truth shared by the emitter, the
//! peephole pass and the disassembler. All multi-byte operands are
//! little-endian.

pub const OP_INIT: u8 = 0x01;
pub const OP_LEASE: u8 = 0x02;
pub const OP_SUBLEASE: u8 = 0x03;
pub const OP_RELEASE: u8 = 0x04;
pub const OP_LOAD: u8 = 0x05;
pub const OP_CALL: u8 = 0x06;
pub const OP_EXIT: u8 = 0x07;
pub const OP_RENDER: u8 = 0x08;
pub const OP_INPUT: u8 = 0x09;
pub const OP_OUTPUT: u8 = 0x0A;
pub const OP_SEND: u8 = 0x0B;
pub const OP_RECV: u8 = 0x0C;
pub const OP_SPAWN: u8 = 0x0D;
pub const OP_JOIN: u8 = 0x0E;
pub const OP_STAMP: u8 = 0x0F;
pub const OP_EXPIRE: u8 = 0x10;
pub const OP_SLEEP: u8 = 0x11;
pub const OP_YIELD: u8 = 0x12;
pub const OP_ERROR: u8 = 0x13;
pub const OP_CHECKEXP: u8 = 0x14;

pub const OP_PUSHK: u8 = 0x20;
pub const OP_PUSHCAP: u8 = 0x21;
pub const OP_UN: u8 = 0x22;
pub const OP_BIN: u8 = 0x23;

pub const OP_JZ: u8 = 0x30;
pub const OP_JNZ: u8 = 0x31;
pub const OP_JMP: u8 = 0x32;

pub const OP_END: u8 = 0xFF;

// Binary operator ids carried by OP_BIN's operand byte.
pub const B_OR: u8 = 1;
pub const B_AND: u8 = 2;
pub const B_EQ: u8 = 3;
pub const B_NE: u8 = 4;
pub const B_LT: u8 = 5;
pub const B_GT: u8 = 6;
pub const B_LE: u8 = 7;
pub const B_GE: u8 = 8;
pub const B_ADD: u8 = 9;
pub const B_SUB: u8 = 10;
pub const B_MUL: u8 = 11;
pub const B_DIV: u8 = 12;
pub const B_MOD: u8 = 13;

// Unary operator ids carried by OP_UN's operand byte.
pub const U_NOT: u8 = 1;
pub const U_NEG: u8 = 2;
pub const U_BITNOT: u8 = 3;

/// Number of operand bytes following the opcode byte, or `None` for a byte
/// that is not a known opcode.
pub fn operand_len(op: u8) -> Option<usize> {
    match op {
        OP_EXIT | OP_YIELD | OP_END => Some(0),
        OP_UN | OP_BIN => Some(1),
        OP_INIT | OP_LEASE | OP_SUBLEASE | OP_RELEASE | OP_LOAD | OP_CALL | OP_RENDER
        | OP_INPUT | OP_OUTPUT | OP_SPAWN | OP_JOIN | OP_SLEEP | OP_CHECKEXP | OP_PUSHK
        | OP_PUSHCAP | OP_JZ | OP_JNZ | OP_JMP => Some(4),
        OP_SEND | OP_RECV | OP_STAMP | OP_EXPIRE => Some(8),
        OP_ERROR => Some(12),
        _ => None,
    }
}

pub fn mnemonic(op: u8) -> &'static str {
    match op {
        OP_INIT => "INIT",
        OP_LEASE => "LEASE",
        OP_SUBLEASE => "SUBLEASE",
        OP_RELEASE => "RELEASE",
        OP_LOAD => "LOAD",
        OP_CALL => "CALL",
        OP_EXIT => "EXIT",
        OP_RENDER => "RENDER",
        OP_INPUT => "INPUT",
        OP_OUTPUT => "OUTPUT",
        OP_SEND => "SEND",
        OP_RECV => "RECV",
        OP_SPAWN => "SPAWN",
        OP_JOIN => "JOIN",
        OP_STAMP => "STAMP",
        OP_EXPIRE => "EXPIRE",
        OP_SLEEP => "SLEEP",
        OP_YIELD => "YIELD",
        OP_ERROR => "ERROR",
        OP_CHECKEXP => "CHECKEXP",
        OP_PUSHK => "PUSHK",
        OP_PUSHCAP => "PUSHCAP",
        OP_UN => "UN",
        OP_BIN => "BIN",
        OP_JZ => "JZ",
        OP_JNZ => "JNZ",
        OP_JMP => "JMP",
        OP_END => "END",
        _ => "DB",
    }
}

pub fn read_u32le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub fn write_u32le(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_lengths_cover_every_published_opcode() {
        for op in [
            OP_INIT, OP_LEASE, OP_SUBLEASE, OP_RELEASE, OP_LOAD, OP_CALL, OP_EXIT, OP_RENDER,
            OP_INPUT, OP_OUTPUT, OP_SEND, OP_RECV, OP_SPAWN, OP_JOIN, OP_STAMP, OP_EXPIRE,
            OP_SLEEP, OP_YIELD, OP_ERROR, OP_CHECKEXP, OP_PUSHK, OP_PUSHCAP, OP_UN, OP_BIN,
            OP_JZ, OP_JNZ, OP_JMP, OP_END,
        ] {
            assert!(operand_len(op).is_some(), "no operand length for {op:#04x}");
            assert_ne!(mnemonic(op), "DB");
        }
    }

    #[test]
    fn u32_round_trips_little_endian() {
        let mut buf = vec![0u8; 4];
        write_u32le(&mut buf, 0, 0x1234_ABCD);
        assert_eq!(buf, [0xCD, 0xAB, 0x34, 0x12]);
        assert_eq!(read_u32le(&buf, 0), 0x1234_ABCD);
    }
}
