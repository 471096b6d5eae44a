//! Integration tests for transaction templates

use std::sync::Arc;
use tx_template::*;

fn key(byte: u8) -> PrivateKey {
    let mut secret = [0u8; 32];
    secret[31] = byte;
    PrivateKey::from_bytes(&secret, NetworkType::Testnet).unwrap()
}

fn funding(key: &PrivateKey, values: &[u64]) -> Arc<TransactionBuilder> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    tx.add_coinbase_input(InputScript::standard(ScriptBuilder::new().number(7)))
        .unwrap();
    for value in values {
        tx.add_output(OutputScript::p2pkh_for_key(&key.public_key()), *value)
            .unwrap();
    }
    Arc::new(tx)
}

#[test]
fn test_input_with_undeclared_variable_rejected() {
    let parent = funding(&key(1), &[1000]);
    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    tx.add_variable("foo", TypeTag::Number).unwrap();

    let script = ScriptBuilder::new().add_variable("bar", TypeTag::Number).unwrap();
    assert_eq!(
        tx.add_input(parent, 0, InputScript::standard(script)).unwrap_err(),
        TemplateError::UndeclaredVariable("bar".to_string())
    );
}

#[test]
fn test_output_with_conflicting_type_rejected() {
    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    tx.add_variable("foo", TypeTag::Number).unwrap();
    let script = ScriptBuilder::new().add_variable("foo", TypeTag::Hash).unwrap();
    assert!(matches!(
        tx.add_output(OutputScript::generic(script), 1),
        Err(TemplateError::TypeConflict { .. })
    ));
    assert!(tx.outputs().is_empty());
}

#[test]
fn test_materialize_counts_and_values() -> anyhow::Result<()> {
    let alice = key(1);
    let bob = key(2);
    let mut ks = MemoryKeyStore::new();
    let alice_id = ks.add_key(alice.clone());
    let parent = funding(&alice, &[30_000, 20_000]);

    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    for index in 0..2 {
        let script = ScriptBuilder::new().signature_placeholder(&alice_id, SigHash::All, false)?;
        tx.add_input(parent.clone(), index, InputScript::standard(script))?;
    }
    tx.add_output(OutputScript::p2pkh_for_key(&bob.public_key()), 45_000)?;
    tx.add_output(OutputScript::op_return(b"memo")?, 0)?;
    tx.add_output(OutputScript::p2pkh_for_address(&alice.to_address())?, 4_000)?;
    assert!(tx.is_ready());

    let materialized = tx.to_transaction(&ks)?;
    assert_eq!(materialized.inputs.len(), tx.inputs().len());
    assert_eq!(materialized.outputs.len(), tx.outputs().len());
    let values: Vec<u64> = materialized.outputs.iter().map(|o| o.value).collect();
    assert_eq!(values, vec![45_000, 0, 4_000]);

    let decoded = Transaction::from_hex(&materialized.to_hex())?;
    assert_eq!(decoded, materialized);
    Ok(())
}

#[test]
fn test_variables_bound_late_flow_into_scripts() -> anyhow::Result<()> {
    let alice = key(1);
    let parent = funding(&alice, &[10_000]);

    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    tx.add_variable("secret", TypeTag::String)?;
    tx.add_variable("hash", TypeTag::Hash)?;

    let lock = ScriptBuilder::new()
        .op(OP_SHA256)
        .add_variable("hash", TypeTag::Hash)?
        .op(OP_EQUAL);
    tx.add_output(OutputScript::p2sh(lock), 9_000)?;

    let unlock = ScriptBuilder::new().add_variable("secret", TypeTag::String)?;
    tx.add_input(parent, 0, InputScript::standard(unlock))?;
    assert!(!tx.is_ready());
    assert_eq!(tx.free_variables().len(), 2);

    tx.bind_variable("hash", Primitive::Hash(crypto::sha256(b"open sesame").to_vec()))?;
    tx.bind_variable("secret", Primitive::from("open sesame"))?;
    assert!(tx.is_ready());
    let unlocking = tx.inputs()[0].script().build()?;
    assert_eq!(&unlocking[1..], b"open sesame");
    Ok(())
}

#[test]
fn test_transaction_parent_from_hex() -> anyhow::Result<()> {
    // parent outputs are plain OP_TRUE, spendable with an empty input script
    let parent = Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint { hash: [9; 32], index: 1 },
            script_sig: vec![OP_1],
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![TransactionOutput { value: 700, script_pubkey: vec![OP_1] }],
        lock_time: 0,
    };
    let parent = Transaction::from_hex(&parent.to_hex())?;
    let txid = parent.txid();
    let parent: ParentRef = Arc::new(parent);
    assert!(parent.is_ready());
    assert!(!parent.is_coinbase());

    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    tx.add_input(parent.clone(), 0, InputScript::standard(ScriptBuilder::new()))?;
    tx.add_output(OutputScript::generic(ScriptBuilder::new().op_true()), 600)?;
    assert!(!tx.is_coinbase());

    let materialized = tx.to_transaction(&MemoryKeyStore::new())?;
    assert_eq!(materialized.inputs[0].prevout, OutPoint { hash: txid, index: 0 });
    Ok(())
}

#[test]
fn test_shared_parent_held_by_many() {
    let alice = key(1);
    let parent = funding(&alice, &[1, 2, 3]);
    let mut first = TransactionBuilder::new(NetworkType::Testnet);
    let mut second = TransactionBuilder::new(NetworkType::Testnet);
    first
        .add_input(parent.clone(), 0, InputScript::standard(ScriptBuilder::new()))
        .unwrap();
    second
        .add_input(parent.clone(), 2, InputScript::standard(ScriptBuilder::new()))
        .unwrap();
    assert_eq!(Arc::strong_count(&parent), 3);
    assert!(first.is_ready() && second.is_ready());
}

#[test]
fn test_not_ready_parent_chain() {
    let mut parent = TransactionBuilder::new(NetworkType::Testnet);
    parent.add_variable("x", TypeTag::Number).unwrap();
    parent
        .add_output(OutputScript::generic(ScriptBuilder::new().op_true()), 5)
        .unwrap();
    let parent = Arc::new(parent);
    assert!(!parent.is_ready());

    let mut child = TransactionBuilder::new(NetworkType::Testnet);
    assert_eq!(
        child
            .add_input(parent, 0, InputScript::standard(ScriptBuilder::new()))
            .unwrap_err(),
        TemplateError::ParentNotReady
    );
}

#[test]
fn test_config_drives_version() {
    let config = TemplateConfig {
        tx_version: 1,
        ..TemplateConfig::for_network(NetworkType::Testnet)
    };
    let mut tx = TransactionBuilder::with_config(config);
    tx.add_output(OutputScript::generic(ScriptBuilder::new().op_true()), 1)
        .unwrap();
    let materialized = tx.to_transaction(&MemoryKeyStore::new()).unwrap();
    assert_eq!(materialized.version, 1);
    assert_eq!(materialized.lock_time, 0);
}

#[test]
fn test_display_lists_inputs_and_outputs() {
    let parent = funding(&key(1), &[10]);
    let text = parent.to_string();
    assert!(text.contains("coinbase"));
    assert!(text.contains("out[0] 10 P2PKH"));
}

#[test]
fn test_joined_script_with_bound_half_materializes() -> anyhow::Result<()> {
    let half = ScriptBuilder::new().add_variable("x", TypeTag::Number)?;
    let bound = half.bind_variable("x", Primitive::Number(1))?;
    let joined = half.append(&bound)?;

    let mut tx = TransactionBuilder::new(NetworkType::Testnet);
    tx.add_output(OutputScript::generic(joined), 500)?;
    assert!(tx.is_ready());

    let materialized = tx.to_transaction(&MemoryKeyStore::new())?;
    assert_eq!(materialized.outputs[0].script_pubkey, vec![OP_1, OP_1]);
    Ok(())
}
