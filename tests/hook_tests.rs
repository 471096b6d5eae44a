//! Integration tests for binding hooks on transaction templates

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tx_template::*;

fn builder_with(names: &[&str]) -> TransactionBuilder {
    let mut tx = TransactionBuilder::new(NetworkType::Regtest);
    for name in names {
        tx.add_variable(name, TypeTag::Number).unwrap();
    }
    tx
}

#[test]
fn test_hook_fires_after_last_binding_in_any_order() {
    for order in [["a", "b"], ["b", "a"]] {
        let mut tx = builder_with(&["a", "b", "c"]);
        let calls: Rc<RefCell<Vec<BTreeMap<String, Primitive>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        tx.add_hook_to_variable_binding(["a", "b"], move |values| sink.borrow_mut().push(values))
            .unwrap();

        tx.bind_variable(order[0], Primitive::Number(1)).unwrap();
        assert!(calls.borrow().is_empty());
        tx.bind_variable(order[1], Primitive::Number(2)).unwrap();
        tx.bind_variable("c", Primitive::Number(3)).unwrap();

        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        let keys: Vec<&str> = calls[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(calls[0][order[1]], Primitive::Number(2));
    }
}

#[test]
fn test_duplicate_hook_set() {
    let mut tx = builder_with(&["a", "b"]);
    tx.add_hook_to_variable_binding(["a", "b"], |_| {}).unwrap();
    assert!(matches!(
        tx.add_hook_to_variable_binding(["b", "a"], |_| {}),
        Err(TemplateError::DuplicateHook(_))
    ));
    // a subset is a different key
    tx.add_hook_to_variable_binding(["a"], |_| {}).unwrap();
    assert!(tx.has_hook(["a"]));
    assert!(tx.has_hook(["b", "a"]));
}

#[test]
fn test_superset_hook_waits() {
    let mut tx = builder_with(&["a", "b"]);
    let small = Rc::new(RefCell::new(0));
    let large = Rc::new(RefCell::new(0));
    let (s, l) = (small.clone(), large.clone());
    tx.add_hook_to_variable_binding(["a"], move |_| *s.borrow_mut() += 1)
        .unwrap();
    tx.add_hook_to_variable_binding(["a", "b"], move |_| *l.borrow_mut() += 1)
        .unwrap();

    tx.bind_variable("a", Primitive::Number(1)).unwrap();
    assert_eq!((*small.borrow(), *large.borrow()), (1, 0));
    assert!(!tx.has_hook(["a"]));
    assert!(tx.has_hook(["a", "b"]));

    tx.bind_variable("b", Primitive::Number(1)).unwrap();
    assert_eq!((*small.borrow(), *large.borrow()), (1, 1));
}

#[test]
fn test_empty_hook_set_rejected() {
    let mut tx = builder_with(&[]);
    let names: [&str; 0] = [];
    assert_eq!(
        tx.add_hook_to_variable_binding(names, |_| {}).unwrap_err(),
        TemplateError::EmptyHookSet
    );
}

#[test]
fn test_removing_variable_drops_hook() {
    let mut tx = builder_with(&["a", "b"]);
    tx.add_hook_to_variable_binding(["a", "b"], |_| panic!("must not fire"))
        .unwrap();
    tx.remove_variable("b").unwrap();
    assert!(!tx.has_hook(["a", "b"]));
    tx.bind_variable("a", Primitive::Number(5)).unwrap();
}
