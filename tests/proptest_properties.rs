use proptest::prelude::*;

use tx_template::*;

fn sighash() -> impl Strategy<Value = SigHash> {
    prop_oneof![Just(SigHash::All), Just(SigHash::None), Just(SigHash::Single)]
}

fn name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_]{0,12}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn line_format_round_trip(
        numbers in prop::collection::vec(-1i64..=16, 0..6),
        data in prop::collection::vec(any::<u8>(), 1..40),
        var in name(),
        mode in sighash(),
        anyone_can_pay in any::<bool>(),
    ) {
        let mut sb = ScriptBuilder::new();
        for n in &numbers {
            sb = sb.number(*n);
        }
        let sb = sb
            .data(&data)
            .add_variable(&var, TypeTag::Number)
            .unwrap()
            .signature_placeholder("00ff", mode, anyone_can_pay)
            .unwrap()
            .op(OP_CHECKSIG);
        let line = sb.serialize();
        let parsed = ScriptBuilder::deserialize(&line).unwrap();
        prop_assert_eq!(parsed.serialize(), line);
    }

    #[test]
    fn optimize_is_idempotent(ops in prop::collection::vec(
        prop_oneof![Just(OP_TOALTSTACK), Just(OP_FROMALTSTACK), Just(OP_DUP), Just(OP_1)],
        0..40,
    )) {
        let mut sb = ScriptBuilder::new();
        for op in &ops {
            sb = sb.op(*op);
        }
        let once = sb.optimize();
        prop_assert_eq!(once.optimize(), once.clone());
        prop_assert!(once.size() <= sb.size());
        prop_assert_eq!((sb.size() - once.size()) % 2, 0);
    }

    #[test]
    fn wrapped_alt_stack_pairs_reduce_to_payload(
        payload in prop::collection::vec(
            prop_oneof![Just(OP_DUP), Just(OP_1), Just(OP_HASH160), Just(OP_TOALTSTACK)],
            0..12,
        ),
        pairs in 0usize..8,
    ) {
        let mut inner = ScriptBuilder::new();
        for op in &payload {
            inner = inner.op(*op);
        }

        let mut sb = ScriptBuilder::new();
        for _ in 0..pairs {
            sb = sb.op(OP_TOALTSTACK);
        }
        for _ in 0..pairs {
            sb = sb.op(OP_FROMALTSTACK);
        }
        for _ in 0..pairs {
            sb = sb.op(OP_TOALTSTACK).op(OP_FROMALTSTACK);
        }
        sb = sb.append(&inner).unwrap();
        for _ in 0..pairs {
            sb = sb.op(OP_TOALTSTACK).op(OP_FROMALTSTACK);
        }

        prop_assert_eq!(sb.optimize().build().unwrap(), inner.build().unwrap());
    }

    #[test]
    fn optimize_keeps_scripts_without_pairs(ops in prop::collection::vec(
        prop_oneof![Just(OP_TOALTSTACK), Just(OP_FROMALTSTACK), Just(OP_DUP), Just(OP_1)],
        0..40,
    )) {
        let mut sb = ScriptBuilder::new();
        let mut last = None;
        for op in &ops {
            if last == Some(OP_TOALTSTACK) && *op == OP_FROMALTSTACK {
                sb = sb.op(OP_DUP);
            }
            sb = sb.op(*op);
            last = Some(*op);
        }
        prop_assert_eq!(sb.optimize().build().unwrap(), sb.build().unwrap());
    }

    #[test]
    fn bind_then_ready(value in any::<i64>(), flag in any::<bool>()) {
        let mut env: Env<Primitive> = Env::new();
        env.add_variable("n", TypeTag::Number).unwrap();
        env.add_variable("b", TypeTag::Boolean).unwrap();
        env.bind_variable("n", Primitive::Number(value)).unwrap();
        prop_assert!(env.is_bound("n").unwrap());
        prop_assert!(!env.is_ready());
        prop_assert!(env.bind_variable("b", Primitive::Number(value)).is_err());
        env.bind_variable("b", Primitive::Boolean(flag)).unwrap();
        prop_assert!(env.is_ready());
    }

    #[test]
    fn materialized_outputs_keep_values(values in prop::collection::vec(0u64..1_000_000, 1..8)) {
        let mut tx = TransactionBuilder::new(NetworkType::Regtest);
        for value in &values {
            tx.add_output(OutputScript::generic(ScriptBuilder::new().op_true()), *value).unwrap();
        }
        let materialized = tx.to_transaction(&MemoryKeyStore::new()).unwrap();
        let got: Vec<u64> = materialized.outputs.iter().map(|o| o.value).collect();
        prop_assert_eq!(got, values);
    }
}
