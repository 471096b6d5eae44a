//! Script opcodes and their mnemonics
//!
//! Mnemonics are written without the `OP_` prefix, so `OP_CHECKSIG` reads `CHECKSIG`.

// push value
pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = OP_0;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_RESERVED: u8 = 0x50;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_2: u8 = 0x52;
pub const OP_3: u8 = 0x53;
pub const OP_4: u8 = 0x54;
pub const OP_5: u8 = 0x55;
pub const OP_6: u8 = 0x56;
pub const OP_7: u8 = 0x57;
pub const OP_8: u8 = 0x58;
pub const OP_9: u8 = 0x59;
pub const OP_10: u8 = 0x5a;
pub const OP_11: u8 = 0x5b;
pub const OP_12: u8 = 0x5c;
pub const OP_13: u8 = 0x5d;
pub const OP_14: u8 = 0x5e;
pub const OP_15: u8 = 0x5f;
pub const OP_16: u8 = 0x60;

// control
pub const OP_NOP: u8 = 0x61;
pub const OP_VER: u8 = 0x62;
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_VERIF: u8 = 0x65;
pub const OP_VERNOTIF: u8 = 0x66;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

// stack ops
pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_3DUP: u8 = 0x6f;
pub const OP_2OVER: u8 = 0x70;
pub const OP_2ROT: u8 = 0x71;
pub const OP_2SWAP: u8 = 0x72;
pub const OP_IFDUP: u8 = 0x73;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_PICK: u8 = 0x79;
pub const OP_ROLL: u8 = 0x7a;
pub const OP_ROT: u8 = 0x7b;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_TUCK: u8 = 0x7d;

// splice ops
pub const OP_CAT: u8 = 0x7e;
pub const OP_SUBSTR: u8 = 0x7f;
pub const OP_LEFT: u8 = 0x80;
pub const OP_RIGHT: u8 = 0x81;
pub const OP_SIZE: u8 = 0x82;

// bit logic
pub const OP_INVERT: u8 = 0x83;
pub const OP_AND: u8 = 0x84;
pub const OP_OR: u8 = 0x85;
pub const OP_XOR: u8 = 0x86;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RESERVED1: u8 = 0x89;
pub const OP_RESERVED2: u8 = 0x8a;

// numeric
pub const OP_1ADD: u8 = 0x8b;
pub const OP_1SUB: u8 = 0x8c;
pub const OP_2MUL: u8 = 0x8d;
pub const OP_2DIV: u8 = 0x8e;
pub const OP_NEGATE: u8 = 0x8f;
pub const OP_ABS: u8 = 0x90;
pub const OP_NOT: u8 = 0x91;
pub const OP_0NOTEQUAL: u8 = 0x92;
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;
pub const OP_MUL: u8 = 0x95;
pub const OP_DIV: u8 = 0x96;
pub const OP_MOD: u8 = 0x97;
pub const OP_LSHIFT: u8 = 0x98;
pub const OP_RSHIFT: u8 = 0x99;
pub const OP_BOOLAND: u8 = 0x9a;
pub const OP_BOOLOR: u8 = 0x9b;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
pub const OP_NUMNOTEQUAL: u8 = 0x9e;
pub const OP_LESSTHAN: u8 = 0x9f;
pub const OP_GREATERTHAN: u8 = 0xa0;
pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
pub const OP_MIN: u8 = 0xa3;
pub const OP_MAX: u8 = 0xa4;
pub const OP_WITHIN: u8 = 0xa5;

// crypto
pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA1: u8 = 0xa7;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CODESEPARATOR: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

// expansion
pub const OP_NOP1: u8 = 0xb0;
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
pub const OP_NOP4: u8 = 0xb3;
pub const OP_NOP10: u8 = 0xb9;

pub const OP_INVALIDOPCODE: u8 = 0xff;

const NAMES: &[(u8, &str)] = &[
    (OP_PUSHDATA1, "PUSHDATA1"),
    (OP_PUSHDATA2, "PUSHDATA2"),
    (OP_PUSHDATA4, "PUSHDATA4"),
    (OP_1NEGATE, "1NEGATE"),
    (OP_RESERVED, "RESERVED"),
    (OP_NOP, "NOP"),
    (OP_VER, "VER"),
    (OP_IF, "IF"),
    (OP_NOTIF, "NOTIF"),
    (OP_VERIF, "VERIF"),
    (OP_VERNOTIF, "VERNOTIF"),
    (OP_ELSE, "ELSE"),
    (OP_ENDIF, "ENDIF"),
    (OP_VERIFY, "VERIFY"),
    (OP_RETURN, "RETURN"),
    (OP_TOALTSTACK, "TOALTSTACK"),
    (OP_FROMALTSTACK, "FROMALTSTACK"),
    (OP_2DROP, "2DROP"),
    (OP_2DUP, "2DUP"),
    (OP_3DUP, "3DUP"),
    (OP_2OVER, "2OVER"),
    (OP_2ROT, "2ROT"),
    (OP_2SWAP, "2SWAP"),
    (OP_IFDUP, "IFDUP"),
    (OP_DEPTH, "DEPTH"),
    (OP_DROP, "DROP"),
    (OP_DUP, "DUP"),
    (OP_NIP, "NIP"),
    (OP_OVER, "OVER"),
    (OP_PICK, "PICK"),
    (OP_ROLL, "ROLL"),
    (OP_ROT, "ROT"),
    (OP_SWAP, "SWAP"),
    (OP_TUCK, "TUCK"),
    (OP_CAT, "CAT"),
    (OP_SUBSTR, "SUBSTR"),
    (OP_LEFT, "LEFT"),
    (OP_RIGHT, "RIGHT"),
    (OP_SIZE, "SIZE"),
    (OP_INVERT, "INVERT"),
    (OP_AND, "AND"),
    (OP_OR, "OR"),
    (OP_XOR, "XOR"),
    (OP_EQUAL, "EQUAL"),
    (OP_EQUALVERIFY, "EQUALVERIFY"),
    (OP_RESERVED1, "RESERVED1"),
    (OP_RESERVED2, "RESERVED2"),
    (OP_1ADD, "1ADD"),
    (OP_1SUB, "1SUB"),
    (OP_2MUL, "2MUL"),
    (OP_2DIV, "2DIV"),
    (OP_NEGATE, "NEGATE"),
    (OP_ABS, "ABS"),
    (OP_NOT, "NOT"),
    (OP_0NOTEQUAL, "0NOTEQUAL"),
    (OP_ADD, "ADD"),
    (OP_SUB, "SUB"),
    (OP_MUL, "MUL"),
    (OP_DIV, "DIV"),
    (OP_MOD, "MOD"),
    (OP_LSHIFT, "LSHIFT"),
    (OP_RSHIFT, "RSHIFT"),
    (OP_BOOLAND, "BOOLAND"),
    (OP_BOOLOR, "BOOLOR"),
    (OP_NUMEQUAL, "NUMEQUAL"),
    (OP_NUMEQUALVERIFY, "NUMEQUALVERIFY"),
    (OP_NUMNOTEQUAL, "NUMNOTEQUAL"),
    (OP_LESSTHAN, "LESSTHAN"),
    (OP_GREATERTHAN, "GREATERTHAN"),
    (OP_LESSTHANOREQUAL, "LESSTHANOREQUAL"),
    (OP_GREATERTHANOREQUAL, "GREATERTHANOREQUAL"),
    (OP_MIN, "MIN"),
    (OP_MAX, "MAX"),
    (OP_WITHIN, "WITHIN"),
    (OP_RIPEMD160, "RIPEMD160"),
    (OP_SHA1, "SHA1"),
    (OP_SHA256, "SHA256"),
    (OP_HASH160, "HASH160"),
    (OP_HASH256, "HASH256"),
    (OP_CODESEPARATOR, "CODESEPARATOR"),
    (OP_CHECKSIG, "CHECKSIG"),
    (OP_CHECKSIGVERIFY, "CHECKSIGVERIFY"),
    (OP_CHECKMULTISIG, "CHECKMULTISIG"),
    (OP_CHECKMULTISIGVERIFY, "CHECKMULTISIGVERIFY"),
    (OP_NOP1, "NOP1"),
    (OP_CHECKLOCKTIMEVERIFY, "CHECKLOCKTIMEVERIFY"),
    (OP_CHECKSEQUENCEVERIFY, "CHECKSEQUENCEVERIFY"),
    (0xb3, "NOP4"),
    (0xb4, "NOP5"),
    (0xb5, "NOP6"),
    (0xb6, "NOP7"),
    (0xb7, "NOP8"),
    (0xb8, "NOP9"),
    (OP_NOP10, "NOP10"),
    (OP_INVALIDOPCODE, "INVALIDOPCODE"),
];

/// Small number opcode for `n` in -1..=16
pub fn small_number_opcode(n: i64) -> Option<u8> {
    match n {
        -1 => Some(OP_1NEGATE),
        0 => Some(OP_0),
        1..=16 => Some(OP_1 + (n as u8) - 1),
        _ => None,
    }
}

/// Value pushed by a small number opcode
pub fn small_number_value(opcode: u8) -> Option<i64> {
    match opcode {
        OP_0 => Some(0),
        OP_1NEGATE => Some(-1),
        OP_1..=OP_16 => Some((opcode - OP_1) as i64 + 1),
        _ => None,
    }
}

/// Mnemonic of a non-push opcode
pub fn opcode_name(opcode: u8) -> Option<&'static str> {
    NAMES
        .iter()
        .find(|(code, _)| *code == opcode)
        .map(|(_, name)| *name)
}

/// Opcode for a mnemonic. Accepts the `NON_OP(n)` form used for unassigned bytes.
pub fn opcode_from_name(name: &str) -> Option<u8> {
    if let Some(code) = NAMES.iter().find(|(_, n)| *n == name).map(|(c, _)| *c) {
        return Some(code);
    }
    let inner = name.strip_prefix("NON_OP(")?.strip_suffix(')')?;
    let code: u8 = inner.parse().ok()?;
    if opcode_name(code).is_none() && small_number_value(code).is_none() && code > OP_PUSHDATA4 {
        Some(code)
    } else {
        None
    }
}

/// Textual form of an opcode outside of data pushes.
pub fn opcode_display(opcode: u8) -> String {
    if let Some(n) = small_number_value(opcode) {
        return n.to_string();
    }
    match opcode_name(opcode) {
        Some(name) => name.to_string(),
        None => format!("NON_OP({})", opcode),
    }
}

/// Opcodes that fail the script even inside an unexecuted branch
pub fn is_disabled(opcode: u8) -> bool {
    matches!(
        opcode,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_numbers() {
        assert_eq!(small_number_opcode(0), Some(OP_0));
        assert_eq!(small_number_opcode(-1), Some(OP_1NEGATE));
        assert_eq!(small_number_opcode(16), Some(OP_16));
        assert_eq!(small_number_opcode(17), None);
        for n in -1..=16 {
            assert_eq!(small_number_value(small_number_opcode(n).unwrap()), Some(n));
        }
    }

    #[test]
    fn test_names_round_trip() {
        for (code, name) in NAMES {
            assert_eq!(opcode_from_name(name), Some(*code));
        }
        assert_eq!(opcode_display(OP_CHECKSIG), "CHECKSIG");
        assert_eq!(opcode_display(0x55), "5");
        assert_eq!(opcode_display(0xba), "NON_OP(186)");
        assert_eq!(opcode_from_name("NON_OP(186)"), Some(0xba));
        assert_eq!(opcode_from_name("NON_OP(172)"), None);
        assert_eq!(opcode_from_name("OP_DUP"), None);
    }
}
