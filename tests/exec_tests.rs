//! End-to-end execution scenarios

use std::sync::Arc;

use quartz::script::registry;
use quartz::script::stack::Attribute;
use quartz::script::{ATTR_NAME, ATTR_SECTION_NAME};
use quartz::{FunctionLibrary, MemoryStack, ScriptError, Signal, StackConfig, Value};

fn new_stack() -> MemoryStack {
    MemoryStack::new(
        None,
        None,
        &StackConfig::default(),
        Arc::new(FunctionLibrary::with_core()),
    )
}

fn root_cause(err: &ScriptError) -> &ScriptError {
    let mut cause = err;
    while let ScriptError::Framed { cause: inner, .. } = cause {
        cause = inner;
    }
    cause
}

#[test]
fn addition_leaves_a_long() {
    let mut stack = new_stack();
    stack.exec_all("1 2 +").unwrap();
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.pop().unwrap(), Value::Long(3));
}

#[test]
fn nan_comparison_is_reflexive() {
    let mut stack = new_stack();
    stack.exec_all("1.0 NaN NaN >=").unwrap();
    assert_eq!(stack.depth(), 2);
    assert_eq!(stack.pop().unwrap(), Value::Boolean(true));
    assert_eq!(stack.pop().unwrap(), Value::Double(1.0));
}

#[test]
fn macro_store_load_eval() {
    let mut stack = new_stack();
    stack.exec_all("<% 1 2 + %> 'f' STORE $f EVAL").unwrap();
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.pop().unwrap(), Value::Long(3));
}

#[test]
fn multiline_string_store_load() {
    let mut stack = new_stack();
    stack
        .exec_all("<'\nline1\nline2\n'>\n's' STORE $s")
        .unwrap();
    assert_eq!(stack.depth(), 1);
    assert_eq!(
        stack.pop().unwrap(),
        Value::String("line1\nline2".to_string())
    );
}

#[test]
fn op_budget_aborts_execution() {
    let mut config = StackConfig::default();
    config.max_ops = 3;
    let mut stack = MemoryStack::new(
        None,
        None,
        &config,
        Arc::new(FunctionLibrary::with_core()),
    );
    let err = stack.exec_all("1 2 3 4").unwrap_err();
    assert!(matches!(
        root_cause(&err),
        ScriptError::OpCountExceeded { .. }
    ));
}

#[test]
fn recursion_budget_aborts_and_leaves_stack_unchanged() {
    let mut config = StackConfig::default();
    config.max_recursion = 4;
    let mut stack = MemoryStack::new(
        None,
        None,
        &config,
        Arc::new(FunctionLibrary::with_core()),
    );
    stack.exec_all("<% @recur %> 'recur' STORE").unwrap();
    assert_eq!(stack.depth(), 0);

    let err = stack.exec_all("@recur").unwrap_err();
    assert!(matches!(
        root_cause(&err),
        ScriptError::RecursionExceeded(_)
    ));
    assert_eq!(stack.depth(), 0, "failed recursion must not leak values");
    assert_eq!(stack.recursion_level(), 0);
    assert_eq!(stack.macro_depth(), 0);
}

#[test]
fn named_macro_appears_in_error_frame() {
    let mut stack = new_stack();
    stack
        .exec_all("'ingest' SECTION <% 'oops' MSGFAIL %> 'failing' STORE")
        .unwrap();
    let err = stack.exec_all("@failing").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("in section 'ingest'"), "got: {}", text);
    assert!(matches!(root_cause(&err), ScriptError::Runtime(_)));
}

#[test]
fn section_attribute_tags_parse_errors() {
    let mut stack = new_stack();
    stack
        .set_attribute(
            ATTR_SECTION_NAME,
            Some(Attribute::Str("report".to_string())),
        )
        .unwrap();
    let err = stack.exec_all("NOSUCH").unwrap_err();
    assert!(err.to_string().contains("report"));
}

#[test]
fn secure_block_hides_error_context() {
    let mut stack = new_stack();
    stack
        .exec_all("<% 1 'x' + %> 'plain' STORE <S 1 'x' + S> 'sec' STORE")
        .unwrap();

    // a plain macro frames the error with the failing statement
    let plain = stack.exec_all("@plain").unwrap_err().to_string();
    assert!(plain.contains("Exception at '+'"), "got: {}", plain);

    // the secure macro is an opaque barrier: same failure, no
    // statement-level frame
    let secure = stack.exec_all("@sec").unwrap_err().to_string();
    assert!(!secure.contains("Exception at '+'"), "got: {}", secure);
    assert!(secure.contains("can only operate"), "raw cause propagates");
}

#[test]
fn return_unwinds_only_one_frame() {
    let mut stack = new_stack();
    stack
        .exec_all("<% 1 RETURN 2 %> 'inner' STORE <% @inner 3 %> EVAL")
        .unwrap();
    // RETURN exits 'inner' but the outer macro continues
    assert_eq!(stack.depth(), 2);
    assert_eq!(stack.pop().unwrap(), Value::Long(3));
    assert_eq!(stack.pop().unwrap(), Value::Long(1));
}

#[test]
fn stop_signal_terminates_execution() {
    let mut stack = new_stack();
    stack.signal(Signal::Stop);
    let err = stack.exec_all("1 2 3").unwrap_err();
    assert!(matches!(err, ScriptError::Stop));
    // STOP clears once delivered, the stack is usable again
    stack.exec_all("1").unwrap();
    assert_eq!(stack.depth(), 1);
}

#[test]
fn kill_signal_sticks() {
    let mut stack = new_stack();
    stack.signal(Signal::Kill);
    let err = stack.exec_all("1").unwrap_err();
    assert!(matches!(err, ScriptError::Kill));
    let err = stack.exec_all("1").unwrap_err();
    assert!(matches!(err, ScriptError::Kill));
}

#[test]
fn registry_signal_by_uuid() {
    let mut stack = new_stack();
    stack
        .set_attribute(ATTR_NAME, Some(Attribute::Str("batch-7".to_string())))
        .unwrap();
    let uuid = stack.uuid().to_string();

    assert!(registry::signal(&uuid, Signal::Stop));
    let err = stack.exec_all("1").unwrap_err();
    assert!(matches!(err, ScriptError::Stop));
}

#[test]
fn redefined_function_shadows_library() {
    let mut stack = new_stack();
    // redefine + to subtract
    stack.exec_all("<% - %> '+' DEF 5 3 +").unwrap();
    assert_eq!(stack.pop().unwrap(), Value::Long(2));

    // clearing without unshadow installs a failing stub
    stack.exec_all("NULL '+' DEF").unwrap();
    let err = stack.exec_all("1 2 +").unwrap_err();
    assert!(err.to_string().contains("is undefined."), "got: {}", err);
}

#[test]
fn unshadow_mode_restores_library_function() {
    let mut config = StackConfig::default();
    config.unshadow = true;
    let mut stack = MemoryStack::new(
        None,
        None,
        &config,
        Arc::new(FunctionLibrary::with_core()),
    );
    stack.exec_all("<% - %> '+' DEF NULL '+' DEF 1 2 +").unwrap();
    assert_eq!(stack.pop().unwrap(), Value::Long(3));
}

#[test]
fn context_restore_keeps_stack_values() {
    let mut stack = new_stack();
    stack
        .exec_all("10 'x' STORE 99 SAVE 20 'x' STORE RESTORE $x")
        .unwrap();
    // 99 was pushed before SAVE and survives; x reverts to 10
    assert_eq!(stack.depth(), 2);
    assert_eq!(stack.pop().unwrap(), Value::Long(10));
    assert_eq!(stack.pop().unwrap(), Value::Long(99));
}

#[test]
fn hidden_levels_are_invisible_to_functions() {
    let mut stack = new_stack();
    stack.exec_all("1 2 3 2 HIDE DEPTH").unwrap();
    assert_eq!(stack.pop().unwrap(), Value::Long(1));
    stack.exec_all("NULL SHOW DEPTH").unwrap();
    assert_eq!(stack.pop().unwrap(), Value::Long(3));
}

#[test]
fn substack_cannot_lower_secure_mode() {
    let mut stack = new_stack();
    stack
        .set_attribute(
            quartz::script::ATTR_IN_SECURE_MACRO,
            Some(Attribute::Bool(true)),
        )
        .unwrap();
    let sub = stack.substack();
    assert!(sub.in_secure_macro());
}
