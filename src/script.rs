//! Script execution engine for legacy (pre-segwit) spends

use crate::chunk::{decode_num, encode_num, find_and_delete, is_p2sh, is_push_only, parse_script};
use crate::config::ScriptFlags;
use crate::constants::*;
use crate::crypto;
use crate::error::{Result, TemplateError};
use crate::opcodes::*;
use crate::sighash::{signature_hash, SigHash};
use crate::types::*;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};

/// Context an executing script asks about signatures and lock times
pub trait SignatureChecker {
    /// `sig` carries the trailing sighash byte; `script_code` is the signed subscript.
    fn check_sig(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
        flags: ScriptFlags,
    ) -> Result<bool>;

    fn check_lock_time(&self, lock_time: i64) -> bool;

    fn check_sequence(&self, sequence: i64) -> bool;
}

/// Checker for scripts evaluated outside of any transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransactionChecker;

impl SignatureChecker for NoTransactionChecker {
    fn check_sig(&self, _: &[u8], _: &[u8], _: &[u8], _: ScriptFlags) -> Result<bool> {
        Ok(false)
    }

    fn check_lock_time(&self, _: i64) -> bool {
        false
    }

    fn check_sequence(&self, _: i64) -> bool {
        false
    }
}

/// Checks signatures against input `input_index` of `tx`
#[derive(Debug, Clone, Copy)]
pub struct TransactionChecker<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
}

impl<'a> TransactionChecker<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize) -> Self {
        TransactionChecker { tx, input_index }
    }
}

impl SignatureChecker for TransactionChecker<'_> {
    fn check_sig(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
        flags: ScriptFlags,
    ) -> Result<bool> {
        let (sighash_type, der) = match sig.split_last() {
            Some((last, der)) => (*last, der),
            None => return Ok(false),
        };
        check_signature_encoding(sighash_type, der, flags)?;
        check_pubkey_encoding(pubkey, flags)?;

        let hash = signature_hash(self.tx, self.input_index, script_code, sighash_type)?;
        Ok(verify_signature(pubkey, der, &hash))
    }

    /// BIP65
    fn check_lock_time(&self, lock_time: i64) -> bool {
        let tx_lock_time = self.tx.lock_time as i64;
        let threshold = LOCKTIME_THRESHOLD as i64;
        let same_kind = (tx_lock_time < threshold && lock_time < threshold)
            || (tx_lock_time >= threshold && lock_time >= threshold);
        if !same_kind || lock_time > tx_lock_time {
            return false;
        }
        match self.tx.inputs.get(self.input_index) {
            Some(input) => input.sequence != SEQUENCE_FINAL,
            None => false,
        }
    }

    /// BIP112
    fn check_sequence(&self, sequence: i64) -> bool {
        let tx_sequence = match self.tx.inputs.get(self.input_index) {
            Some(input) => input.sequence as i64,
            None => return false,
        };
        if self.tx.version < 2 || tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0 {
            return false;
        }
        let mask = (SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK) as i64;
        let type_flag = SEQUENCE_LOCKTIME_TYPE_FLAG as i64;
        let tx_masked = tx_sequence & mask;
        let masked = sequence & mask;
        let same_kind = (tx_masked < type_flag && masked < type_flag)
            || (tx_masked >= type_flag && masked >= type_flag);
        same_kind && masked <= tx_masked
    }
}

fn check_signature_encoding(sighash_type: u8, der: &[u8], flags: ScriptFlags) -> Result<()> {
    if flags.contains(ScriptFlags::STRICTENC) && SigHash::from_sighash_type(sighash_type).is_none() {
        return Err(script_error(format!("undefined sighash type {:#04x}", sighash_type)));
    }
    let strict = flags.contains(ScriptFlags::DERSIG)
        || flags.contains(ScriptFlags::LOW_S)
        || flags.contains(ScriptFlags::STRICTENC);
    if strict {
        let signature = Signature::from_der(der)
            .map_err(|_| script_error("signature is not strict DER".to_string()))?;
        if flags.contains(ScriptFlags::LOW_S) {
            let mut normalized = signature;
            normalized.normalize_s();
            if normalized != signature {
                return Err(script_error("signature S value is unnecessarily high".to_string()));
            }
        }
    }
    Ok(())
}

fn check_pubkey_encoding(pubkey: &[u8], flags: ScriptFlags) -> Result<()> {
    if !flags.contains(ScriptFlags::STRICTENC) {
        return Ok(());
    }
    let valid = match pubkey.first() {
        Some(0x02) | Some(0x03) => pubkey.len() == 33,
        Some(0x04) => pubkey.len() == 65,
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(script_error("public key has an invalid encoding".to_string()))
    }
}

/// ECDSA check of a DER signature (lax parsing, S normalized) against `hash`
fn verify_signature(pubkey_bytes: &[u8], der: &[u8], hash: &Hash) -> bool {
    let secp = Secp256k1::verification_only();
    let pubkey = match PublicKey::from_slice(pubkey_bytes) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let mut signature = match Signature::from_der_lax(der) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    signature.normalize_s();
    let message = match Message::from_digest_slice(hash) {
        Ok(m) => m,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}

fn script_error(message: String) -> TemplateError {
    TemplateError::ScriptExecution(message)
}

/// Truthiness of a stack element: any non-zero byte, negative zero excluded
pub fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != 0 {
            return !(i == bytes.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn bool_item(value: bool) -> ByteString {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

fn pop(stack: &mut Vec<ByteString>) -> Result<ByteString> {
    stack
        .pop()
        .ok_or_else(|| script_error("operation on an empty stack".to_string()))
}

fn require(stack: &[ByteString], n: usize) -> Result<()> {
    if stack.len() < n {
        return Err(script_error(format!(
            "operation needs {} stack items, found {}",
            n,
            stack.len()
        )));
    }
    Ok(())
}

fn pop_num(stack: &mut Vec<ByteString>, flags: ScriptFlags) -> Result<i64> {
    let item = pop(stack)?;
    decode_num(&item, 4, flags.contains(ScriptFlags::MINIMALDATA))
}

fn check_minimal_push(opcode: u8, data: &[u8]) -> bool {
    match data.len() {
        0 => opcode == OP_0,
        1 if (1..=16).contains(&data[0]) || data[0] == 0x81 => false,
        n if n <= 75 => opcode as usize == n,
        n if n <= 255 => opcode == OP_PUSHDATA1,
        n if n <= 65535 => opcode == OP_PUSHDATA2,
        _ => true,
    }
}

/// EvalScript: 𝒮𝒞 × 𝒮𝒯 × ℱ → 𝒮𝒯 ∪ {⊥}
///
/// Runs `script` over `stack`:
/// 1. Parse the script into pushes and opcodes (a truncated push fails)
/// 2. For each instruction, skipping unexecuted branches:
///    - Element size must stay within L_element, op count within L_ops
///    - Disabled opcodes fail even when not executed
///    - Execute the instruction against the main and alt stacks
///    - |S| + |alt| must stay within L_stack
/// 3. Every IF must be closed by an ENDIF
///
/// Any failure is reported as [`TemplateError::ScriptExecution`] with the reason.
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<ByteString>,
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
) -> Result<()> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(script_error(format!(
            "script of {} bytes exceeds size limit",
            script.len()
        )));
    }
    let instructions = parse_script(script).map_err(|e| script_error(e.to_string()))?;

    let mut alt_stack: Vec<ByteString> = Vec::new();
    let mut exec: Vec<bool> = Vec::new();
    let mut op_count = 0;
    let mut code_start = 0;

    for ins in &instructions {
        let executing = exec.iter().all(|b| *b);
        let opcode = ins.opcode;

        if let Some(data) = ins.data {
            if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(script_error(format!(
                    "push of {} bytes exceeds element size limit",
                    data.len()
                )));
            }
        }
        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_SCRIPT_OPS {
                return Err(script_error("operation limit exceeded".to_string()));
            }
        }
        if is_disabled(opcode) {
            return Err(script_error(format!(
                "disabled opcode {}",
                opcode_display(opcode)
            )));
        }

        if let Some(data) = ins.data {
            if executing {
                if flags.contains(ScriptFlags::MINIMALDATA) && !check_minimal_push(opcode, data) {
                    return Err(script_error("non-minimal data push".to_string()));
                }
                stack.push(data.to_vec());
            }
        } else if executing || (OP_IF..=OP_ENDIF).contains(&opcode) {
            execute_opcode(
                opcode,
                stack,
                &mut alt_stack,
                &mut exec,
                &mut op_count,
                ExecContext {
                    executing,
                    script,
                    code_start: &mut code_start,
                    end: ins.end,
                    flags,
                    checker,
                },
            )?;
        }

        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(script_error("stack overflow".to_string()));
        }
    }

    if !exec.is_empty() {
        return Err(script_error("unbalanced conditional".to_string()));
    }
    Ok(())
}

struct ExecContext<'a, 'b> {
    executing: bool,
    script: &'a [u8],
    code_start: &'b mut usize,
    end: usize,
    flags: ScriptFlags,
    checker: &'a dyn SignatureChecker,
}

fn execute_opcode(
    opcode: u8,
    stack: &mut Vec<ByteString>,
    alt_stack: &mut Vec<ByteString>,
    exec: &mut Vec<bool>,
    op_count: &mut usize,
    ctx: ExecContext<'_, '_>,
) -> Result<()> {
    let flags = ctx.flags;
    match opcode {
        OP_1NEGATE | OP_1..=OP_16 => {
            let n = small_number_value(opcode).unwrap_or_default();
            stack.push(encode_num(n));
        }

        // control
        OP_NOP | OP_NOP1 | OP_NOP4..=OP_NOP10 => {}
        OP_CHECKLOCKTIMEVERIFY => {
            if flags.contains(ScriptFlags::CHECKLOCKTIMEVERIFY) {
                require(stack, 1)?;
                let lock_time =
                    decode_num(&stack[stack.len() - 1], 5, flags.contains(ScriptFlags::MINIMALDATA))?;
                if lock_time < 0 {
                    return Err(script_error("negative lock time".to_string()));
                }
                if !ctx.checker.check_lock_time(lock_time) {
                    return Err(script_error("unsatisfied lock time".to_string()));
                }
            }
        }
        OP_CHECKSEQUENCEVERIFY => {
            if flags.contains(ScriptFlags::CHECKSEQUENCEVERIFY) {
                require(stack, 1)?;
                let sequence =
                    decode_num(&stack[stack.len() - 1], 5, flags.contains(ScriptFlags::MINIMALDATA))?;
                if sequence < 0 {
                    return Err(script_error("negative sequence".to_string()));
                }
                if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 == 0
                    && !ctx.checker.check_sequence(sequence)
                {
                    return Err(script_error("unsatisfied relative lock time".to_string()));
                }
            }
        }
        OP_IF | OP_NOTIF => {
            let mut value = false;
            if ctx.executing {
                let item = pop(stack)?;
                value = cast_to_bool(&item);
                if opcode == OP_NOTIF {
                    value = !value;
                }
            }
            exec.push(value);
        }
        OP_ELSE => match exec.last_mut() {
            Some(top) => *top = !*top,
            None => return Err(script_error("ELSE without IF".to_string())),
        },
        OP_ENDIF => {
            if exec.pop().is_none() {
                return Err(script_error("ENDIF without IF".to_string()));
            }
        }
        OP_VERIFY => {
            let item = pop(stack)?;
            if !cast_to_bool(&item) {
                return Err(script_error("VERIFY failed".to_string()));
            }
        }
        OP_RETURN => return Err(script_error("OP_RETURN encountered".to_string())),

        // stack ops
        OP_TOALTSTACK => {
            let item = pop(stack)?;
            alt_stack.push(item);
        }
        OP_FROMALTSTACK => {
            let item = alt_stack
                .pop()
                .ok_or_else(|| script_error("FROMALTSTACK on an empty alt stack".to_string()))?;
            stack.push(item);
        }
        OP_2DROP => {
            require(stack, 2)?;
            stack.truncate(stack.len() - 2);
        }
        OP_2DUP => {
            require(stack, 2)?;
            let n = stack.len();
            let top: Vec<ByteString> = stack[n - 2..].to_vec();
            stack.extend(top);
        }
        OP_3DUP => {
            require(stack, 3)?;
            let n = stack.len();
            let top: Vec<ByteString> = stack[n - 3..].to_vec();
            stack.extend(top);
        }
        OP_2OVER => {
            require(stack, 4)?;
            let n = stack.len();
            let pair: Vec<ByteString> = stack[n - 4..n - 2].to_vec();
            stack.extend(pair);
        }
        OP_2ROT => {
            require(stack, 6)?;
            let n = stack.len();
            let moved: Vec<ByteString> = stack.drain(n - 6..n - 4).collect();
            stack.extend(moved);
        }
        OP_2SWAP => {
            require(stack, 4)?;
            let n = stack.len();
            stack.swap(n - 4, n - 2);
            stack.swap(n - 3, n - 1);
        }
        OP_IFDUP => {
            require(stack, 1)?;
            let top = stack[stack.len() - 1].clone();
            if cast_to_bool(&top) {
                stack.push(top);
            }
        }
        OP_DEPTH => {
            let depth = stack.len() as i64;
            stack.push(encode_num(depth));
        }
        OP_DROP => {
            pop(stack)?;
        }
        OP_DUP => {
            require(stack, 1)?;
            let top = stack[stack.len() - 1].clone();
            stack.push(top);
        }
        OP_NIP => {
            require(stack, 2)?;
            let n = stack.len();
            stack.remove(n - 2);
        }
        OP_OVER => {
            require(stack, 2)?;
            let item = stack[stack.len() - 2].clone();
            stack.push(item);
        }
        OP_PICK | OP_ROLL => {
            let n = pop_num(stack, flags)?;
            if n < 0 || n as usize >= stack.len() {
                return Err(script_error(format!("PICK/ROLL index {} out of range", n)));
            }
            let index = stack.len() - 1 - n as usize;
            let item = if opcode == OP_ROLL {
                stack.remove(index)
            } else {
                stack[index].clone()
            };
            stack.push(item);
        }
        OP_ROT => {
            require(stack, 3)?;
            let n = stack.len();
            let item = stack.remove(n - 3);
            stack.push(item);
        }
        OP_SWAP => {
            require(stack, 2)?;
            let n = stack.len();
            stack.swap(n - 2, n - 1);
        }
        OP_TUCK => {
            require(stack, 2)?;
            let n = stack.len();
            let top = stack[n - 1].clone();
            stack.insert(n - 2, top);
        }
        OP_SIZE => {
            require(stack, 1)?;
            let size = stack[stack.len() - 1].len() as i64;
            stack.push(encode_num(size));
        }

        // bit logic
        OP_EQUAL | OP_EQUALVERIFY => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            let equal = a == b;
            if opcode == OP_EQUALVERIFY {
                if !equal {
                    return Err(script_error("EQUALVERIFY failed".to_string()));
                }
            } else {
                stack.push(bool_item(equal));
            }
        }

        // numeric
        OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
            let n = pop_num(stack, flags)?;
            let result = match opcode {
                OP_1ADD => n + 1,
                OP_1SUB => n - 1,
                OP_NEGATE => -n,
                OP_ABS => n.abs(),
                OP_NOT => (n == 0) as i64,
                _ => (n != 0) as i64,
            };
            stack.push(encode_num(result));
        }
        OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
        | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
        | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
            require(stack, 2)?;
            let b = pop_num(stack, flags)?;
            let a = pop_num(stack, flags)?;
            let result = match opcode {
                OP_ADD => a + b,
                OP_SUB => a - b,
                OP_BOOLAND => (a != 0 && b != 0) as i64,
                OP_BOOLOR => (a != 0 || b != 0) as i64,
                OP_NUMEQUAL | OP_NUMEQUALVERIFY => (a == b) as i64,
                OP_NUMNOTEQUAL => (a != b) as i64,
                OP_LESSTHAN => (a < b) as i64,
                OP_GREATERTHAN => (a > b) as i64,
                OP_LESSTHANOREQUAL => (a <= b) as i64,
                OP_GREATERTHANOREQUAL => (a >= b) as i64,
                OP_MIN => a.min(b),
                _ => a.max(b),
            };
            if opcode == OP_NUMEQUALVERIFY {
                if result == 0 {
                    return Err(script_error("NUMEQUALVERIFY failed".to_string()));
                }
            } else {
                stack.push(encode_num(result));
            }
        }
        OP_WITHIN => {
            require(stack, 3)?;
            let max = pop_num(stack, flags)?;
            let min = pop_num(stack, flags)?;
            let x = pop_num(stack, flags)?;
            stack.push(bool_item(min <= x && x < max));
        }

        // crypto
        OP_RIPEMD160 => {
            let item = pop(stack)?;
            stack.push(crypto::ripemd160(&item).to_vec());
        }
        OP_SHA1 => {
            let item = pop(stack)?;
            stack.push(crypto::sha1(&item).to_vec());
        }
        OP_SHA256 => {
            let item = pop(stack)?;
            stack.push(crypto::sha256(&item).to_vec());
        }
        OP_HASH160 => {
            let item = pop(stack)?;
            stack.push(crypto::hash160(&item).to_vec());
        }
        OP_HASH256 => {
            let item = pop(stack)?;
            stack.push(crypto::hash256(&item).to_vec());
        }
        OP_CODESEPARATOR => {
            *ctx.code_start = ctx.end;
        }
        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
            require(stack, 2)?;
            let pubkey = pop(stack)?;
            let sig = pop(stack)?;
            let script_code = find_and_delete(&ctx.script[*ctx.code_start..], &sig);
            let valid = ctx.checker.check_sig(&sig, &pubkey, &script_code, flags)?;
            if opcode == OP_CHECKSIGVERIFY {
                if !valid {
                    return Err(script_error("CHECKSIGVERIFY failed".to_string()));
                }
            } else {
                stack.push(bool_item(valid));
            }
        }
        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
            let valid = check_multisig(stack, op_count, &ctx)?;
            if opcode == OP_CHECKMULTISIGVERIFY {
                if !valid {
                    return Err(script_error("CHECKMULTISIGVERIFY failed".to_string()));
                }
            } else {
                stack.push(bool_item(valid));
            }
        }

        _ => {
            return Err(script_error(format!(
                "bad opcode {}",
                opcode_display(opcode)
            )))
        }
    }
    Ok(())
}

/// `<dummy> <sig>* <m> <pubkey>* <n> CHECKMULTISIG`
fn check_multisig(
    stack: &mut Vec<ByteString>,
    op_count: &mut usize,
    ctx: &ExecContext<'_, '_>,
) -> Result<bool> {
    let flags = ctx.flags;
    let key_count = pop_num(stack, flags)?;
    if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
        return Err(script_error(format!("invalid public key count {}", key_count)));
    }
    *op_count += key_count as usize;
    if *op_count > MAX_SCRIPT_OPS {
        return Err(script_error("operation limit exceeded".to_string()));
    }
    require(stack, key_count as usize)?;
    let pubkeys: Vec<ByteString> = stack.split_off(stack.len() - key_count as usize);

    let sig_count = pop_num(stack, flags)?;
    if sig_count < 0 || sig_count > key_count {
        return Err(script_error(format!("invalid signature count {}", sig_count)));
    }
    require(stack, sig_count as usize + 1)?;
    let sigs: Vec<ByteString> = stack.split_off(stack.len() - sig_count as usize);

    let dummy = pop(stack)?;
    if flags.contains(ScriptFlags::NULLDUMMY) && !dummy.is_empty() {
        return Err(script_error("CHECKMULTISIG dummy must be empty".to_string()));
    }

    let mut script_code = ctx.script[*ctx.code_start..].to_vec();
    for sig in &sigs {
        script_code = find_and_delete(&script_code, sig);
    }

    // signatures are matched in order against the remaining keys, top down
    let mut sig_iter = sigs.iter().rev().peekable();
    let mut keys_left = pubkeys.len();
    for pubkey in pubkeys.iter().rev() {
        let sig = match sig_iter.peek() {
            Some(sig) => *sig,
            None => break,
        };
        if ctx.checker.check_sig(sig, pubkey, &script_code, flags)? {
            sig_iter.next();
        }
        keys_left -= 1;
        if sig_iter.len() > keys_left {
            break;
        }
    }
    Ok(sig_iter.next().is_none())
}

/// VerifyScript: 𝒮𝒞 × 𝒮𝒞 × ℱ → {⊤, ⊥}
///
/// For scriptSig ss, scriptPubKey spk and flags f:
/// 1. Execute ss on an empty stack
/// 2. Execute spk on the resulting stack; the top element must be true
/// 3. If f has P2SH and spk is `HASH160 <h> EQUAL`: ss must be push only,
///    its last push is the redeem script, which runs over the remaining
///    pushes and must leave a true top element
/// 4. With CLEANSTACK exactly one element may remain
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    flags: ScriptFlags,
    checker: &dyn SignatureChecker,
) -> Result<()> {
    if flags.contains(ScriptFlags::SIGPUSHONLY) && !is_push_only(script_sig) {
        return Err(script_error("scriptSig is not push only".to_string()));
    }

    let mut stack = Vec::new();
    eval_script(script_sig, &mut stack, flags, checker)?;
    let p2sh_stack = if flags.contains(ScriptFlags::P2SH) {
        stack.clone()
    } else {
        Vec::new()
    };

    eval_script(script_pubkey, &mut stack, flags, checker)?;
    if !stack.last().map_or(false, |top| cast_to_bool(top)) {
        return Err(script_error("Script resulted in a non-true stack".to_string()));
    }

    if flags.contains(ScriptFlags::P2SH) && is_p2sh(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(script_error("P2SH scriptSig is not push only".to_string()));
        }
        stack = p2sh_stack;
        let redeem = pop(&mut stack)?;
        eval_script(&redeem, &mut stack, flags, checker)?;
        if !stack.last().map_or(false, |top| cast_to_bool(top)) {
            return Err(script_error(
                "P2SH redeem script resulted in a non-true stack".to_string(),
            ));
        }
    }

    if flags.contains(ScriptFlags::CLEANSTACK) && stack.len() != 1 {
        return Err(script_error(format!(
            "stack holds {} elements after execution",
            stack.len()
        )));
    }
    Ok(())
}
