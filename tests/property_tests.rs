//! Property tests for the stack machine and operator semantics

use std::sync::Arc;

use proptest::prelude::*;

use quartz::script::functions::compare::{compare_values, CmpOp};
use quartz::{FunctionLibrary, MemoryStack, StackConfig, Value};

fn new_stack() -> MemoryStack {
    MemoryStack::new(
        None,
        None,
        &StackConfig::default(),
        Arc::new(FunctionLibrary::with_core()),
    )
}

/// Stack operations exercised against a reference model
#[derive(Debug, Clone)]
enum Op {
    Push(i64),
    Pop,
    Dup,
    Drop,
    Swap,
    Rot,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i64>().prop_map(Op::Push),
        Just(Op::Pop),
        Just(Op::Dup),
        Just(Op::Drop),
        Just(Op::Swap),
        Just(Op::Rot),
    ]
}

proptest! {
    /// depth() always equals the number of visible elements, modeled by
    /// a plain Vec driven through the same operations.
    #[test]
    fn depth_matches_model(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let mut stack = new_stack();
        let mut model: Vec<i64> = Vec::new();

        for op in ops {
            match op {
                Op::Push(n) => {
                    stack.push(Value::Long(n)).unwrap();
                    model.push(n);
                }
                Op::Pop | Op::Drop => {
                    let expected = model.pop();
                    match expected {
                        Some(n) => prop_assert_eq!(stack.pop().unwrap(), Value::Long(n)),
                        None => prop_assert!(stack.pop().is_err()),
                    }
                }
                Op::Dup => {
                    if let Some(&top) = model.last() {
                        stack.dup().unwrap();
                        model.push(top);
                    } else {
                        prop_assert!(stack.dup().is_err());
                    }
                }
                Op::Swap => {
                    if model.len() >= 2 {
                        stack.swap().unwrap();
                        let len = model.len();
                        model.swap(len - 1, len - 2);
                    } else {
                        prop_assert!(stack.swap().is_err());
                    }
                }
                Op::Rot => {
                    if model.len() >= 3 {
                        stack.rot().unwrap();
                        let len = model.len();
                        let third = model.remove(len - 3);
                        model.push(third);
                    } else {
                        prop_assert!(stack.rot().is_err());
                    }
                }
            }
            prop_assert_eq!(stack.depth(), model.len());
        }

        for (level, expected) in model.iter().rev().enumerate() {
            prop_assert_eq!(stack.get(level as i64).unwrap(), &Value::Long(*expected));
        }
    }
}

proptest! {
    /// hide(k) then show(k) restores the visible contents for any valid k.
    #[test]
    fn hide_show_roundtrip(values in proptest::collection::vec(any::<i64>(), 1..32), k in 0usize..32) {
        let mut stack = new_stack();
        for v in &values {
            stack.push(Value::Long(*v)).unwrap();
        }
        let k = (k % (values.len() + 1)) as i64;

        let hidden = stack.hide(k);
        prop_assert_eq!(hidden as i64, k);
        prop_assert_eq!(stack.depth(), values.len() - hidden);
        stack.show(k);
        prop_assert_eq!(stack.depth(), values.len());

        for (level, expected) in values.iter().rev().enumerate() {
            prop_assert_eq!(stack.get(level as i64).unwrap(), &Value::Long(*expected));
        }
    }
}

proptest! {
    /// After any successful execution, the recursion counter is back to
    /// zero and no macros are left open.
    #[test]
    fn exec_leaves_balanced_state(longs in proptest::collection::vec(any::<i64>(), 0..16)) {
        let mut stack = new_stack();
        let script: Vec<String> = longs.iter().map(|n| n.to_string()).collect();
        stack.exec_all(&script.join(" ")).unwrap();
        prop_assert_eq!(stack.recursion_level(), 0);
        prop_assert_eq!(stack.macro_depth(), 0);
        prop_assert_eq!(stack.depth(), longs.len());
    }
}

proptest! {
    /// GE is the negation of LT, and EQ is GE and LE, for any non-NaN
    /// numeric pair.
    #[test]
    fn comparison_lattice(a in -1.0e15f64..1.0e15f64, b in any::<i64>()) {
        let left = Value::Double(a);
        let right = Value::Long(b);

        let ge = compare_values("test", CmpOp::Ge, &left, &right).unwrap();
        let lt = compare_values("test", CmpOp::Lt, &left, &right).unwrap();
        prop_assert_eq!(ge, !lt);

        let eq = compare_values("test", CmpOp::Eq, &left, &right).unwrap();
        let le = compare_values("test", CmpOp::Le, &left, &right).unwrap();
        prop_assert_eq!(eq, ge && le);
    }
}

proptest! {
    /// NaN never orders against anything, including itself, except for
    /// the reflexive relations against another NaN.
    #[test]
    fn nan_comparisons(x in any::<f64>()) {
        let nan = Value::Double(f64::NAN);
        let other = Value::Double(x);

        prop_assert!(compare_values("t", CmpOp::Eq, &nan, &nan).unwrap());
        prop_assert!(compare_values("t", CmpOp::Ge, &nan, &nan).unwrap());
        prop_assert!(compare_values("t", CmpOp::Le, &nan, &nan).unwrap());
        prop_assert!(!compare_values("t", CmpOp::Lt, &nan, &nan).unwrap());
        prop_assert!(!compare_values("t", CmpOp::Gt, &nan, &nan).unwrap());

        prop_assert!(!compare_values("t", CmpOp::Lt, &nan, &other).unwrap());
        prop_assert!(!compare_values("t", CmpOp::Gt, &nan, &other).unwrap());
        if !x.is_nan() {
            prop_assert!(!compare_values("t", CmpOp::Eq, &nan, &other).unwrap());
            prop_assert!(compare_values("t", CmpOp::Ne, &nan, &other).unwrap());
        }
    }
}

proptest! {
    /// save / restore round-trips the symbol table and registers
    /// exactly, whatever happened in between.
    #[test]
    fn save_restore_roundtrip(
        symbols in proptest::collection::hash_map("[a-z]{1,8}", any::<i64>(), 0..16),
        scratch in proptest::collection::vec(any::<i64>(), 0..8),
    ) {
        let mut stack = new_stack();
        for (name, value) in &symbols {
            stack.store(name.clone(), Value::Long(*value)).unwrap();
        }
        stack.store_register(0, Value::Long(1234)).unwrap();
        stack.save().unwrap();

        // mutate everything
        stack.forget(None);
        stack.store("INTRUDER", Value::Boolean(true)).unwrap();
        stack.store_register(0, Value::Null).unwrap();
        for v in &scratch {
            stack.push(Value::Long(*v)).unwrap();
        }
        // drop the scratch values so the context is back on top
        stack.reset(1).unwrap();

        stack.restore().unwrap();
        prop_assert_eq!(stack.symbol_table().len(), symbols.len());
        for (name, value) in &symbols {
            prop_assert_eq!(stack.load(name), Some(Value::Long(*value)));
        }
        prop_assert_eq!(stack.load("INTRUDER"), None);
        prop_assert_eq!(stack.load_register(0).unwrap(), Value::Long(1234));
    }
}

proptest! {
    /// Parsing arbitrary printable text never leaves the recursion
    /// counter unbalanced, whether the parse succeeds or fails.
    #[test]
    fn parse_never_leaks_recursion(script in "[ -~]{0,80}") {
        let mut stack = new_stack();
        let _ = stack.exec_all(&script);
        prop_assert_eq!(stack.recursion_level(), 0);
    }
}
