use std::sync::{Arc, Mutex};

use super::*;
use crate::error::Error;

/// Adds `data` to its single integer argument and records finalizations.
#[derive(Default)]
struct Adder {
    finalized: Mutex<Vec<u64>>,
}

impl Trampoline for Adder {
    fn call(&self, env: &mut Env<'_>, args: &[Value], data: u64) -> Value {
        let n = match env.int(args[0]) {
            Ok(n) => n,
            Err(_) => return args[0],
        };
        env.make_int(n + data as i64).unwrap_or(args[0])
    }

    fn finalize(&self, data: u64) {
        self.finalized.lock().unwrap().push(data);
    }
}

fn signal_message(env: &mut Env<'_>, err: Error) -> String {
    match err {
        Error::Signal(s) => s.message(env),
        other => panic!("expected a signal, got {:?}", other),
    }
}

#[test]
fn test_list_primitives() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let one = env.make_int(1).unwrap();
        let two = env.make_int(2).unwrap();
        let list = env.list(&[one, two]).unwrap();
        assert_eq!(env.length(list).unwrap(), 2);
        let (head, tail) = env.uncons(list).unwrap();
        assert_eq!(env.int(head).unwrap(), 1);
        let nil = env.nil().unwrap();
        let rest = env.cdr(tail).unwrap();
        assert!(env.eq(rest, nil));
        assert!(env.is_nil(rest));
    });
}

#[test]
fn test_pending_exit_blocks_primitives() {
    let mut sb = Sandbox::new();
    let s = sb.heap.string("x");
    assert_eq!(sb.extract_integer(Value::from_raw(s)), 0);
    assert_eq!(sb.exit_check(), ExitKind::Signal);
    let v = sb.make_integer(5);
    assert_eq!(v.raw(), NIL);
    sb.exit_clear();
    assert_eq!(sb.exit_check(), ExitKind::Return);
    let v = sb.make_integer(5);
    assert_ne!(v.raw(), NIL);
}

#[test]
fn test_first_exit_wins() {
    let mut sb = Sandbox::new();
    let a = sb.intern("first");
    let b = sb.intern("second");
    let nil = sb.intern("nil");
    sb.exit_signal(a, nil);
    sb.exit_throw(b, nil);
    match sb.exit_get() {
        Exit::Signal { symbol, .. } => assert_eq!(symbol.raw(), a.raw()),
        _ => panic!("expected the first signal"),
    }
}

#[test]
fn test_wrong_type_message() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let s = env.make_string("x").unwrap();
        let err = env.int(s).unwrap_err();
        assert_eq!(
            signal_message(env, err),
            "Wrong type argument: integerp, \"x\""
        );
        // The exit was consumed by the failing call.
        assert!(env.make_int(1).is_ok());
    });
}

#[test]
fn test_integer_overflow_signals() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let big = BigInt::from(i64::MAX) + 1i32;
        let v = env.make_big_int(&big).unwrap();
        assert_eq!(env.big_int(v).unwrap(), big);
        let err = env.int(v).unwrap_err();
        let msg = signal_message(env, err);
        assert!(msg.starts_with("Arithmetic overflow error"), "{}", msg);
    });
}

#[test]
fn test_define_error_conditions() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let name = env.intern("my-error").unwrap();
        let msg = env.make_string("My error").unwrap();
        let parent = env.intern("arith-error").unwrap();
        env.call("define-error", &[name, msg, parent]).unwrap();

        let data = env.make_int(7).unwrap();
        let data = env.list(&[data]).unwrap();
        let cond = env.cons(name, data).unwrap();
        let s = env.call("error-message-string", &[cond]).unwrap();
        assert_eq!(env.str(s).unwrap(), "My error: 7");
    });
    let name = sb.heap.intern("my-error");
    let prop = sb.heap.intern("error-conditions");
    let conditions = sb.heap.get_prop(name, prop).unwrap();
    assert_eq!(sb.heap.prin1(conditions), "(my-error arith-error error)");
}

#[test]
fn test_define_error_unknown_parent() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let name = env.intern("my-error").unwrap();
        let msg = env.make_string("My error").unwrap();
        let parent = env.intern("no-such-error").unwrap();
        let err = env.call("define-error", &[name, msg, parent]).unwrap_err();
        assert_eq!(signal_message(env, err), "Unknown signal `no-such-error'");
    });
}

#[test]
fn test_plain_error_message() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let error = env.intern("error").unwrap();
        let msg = env.make_string("Something broke").unwrap();
        let data = env.list(&[msg]).unwrap();
        let err = env.call("signal", &[error, data]).unwrap_err();
        assert_eq!(signal_message(env, err), "Something broke");
    });
}

#[test]
fn test_throw() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let tag = env.intern("done").unwrap();
        let value = env.make_int(3).unwrap();
        match env.call("throw", &[tag, value]) {
            Err(Error::Throw(t)) => {
                assert!(env.eq(t.tag, tag));
                assert_eq!(env.int(t.value).unwrap(), 3);
            }
            other => panic!("expected a throw, got {:?}", other),
        }
    });
}

#[test]
fn test_time_forms() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let t = env.make_time(1_700_000_123, 456_789_000).unwrap();
        assert_eq!(env.time(t).unwrap(), (1_700_000_123, 456_789_000));

        let f = env.make_float(1.25).unwrap();
        assert_eq!(env.time(f).unwrap(), (1, 250_000_000));

        let i = env.make_int(-5).unwrap();
        assert_eq!(env.time(i).unwrap(), (-5, 0));

        let high = env.make_int(1).unwrap();
        let low = env.make_int(2).unwrap();
        let pair = env.cons(high, low).unwrap();
        assert_eq!(env.time(pair).unwrap(), (65_538, 0));

        let s = env.make_string("now").unwrap();
        assert!(env.time(s).is_err());
    });
}

#[test]
fn test_gethash_tells_nil_from_missing() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let eq = env.intern("eq").unwrap();
        let table = env.make_hash(eq, 2).unwrap();
        let present = env.intern("present").unwrap();
        let absent = env.intern("absent").unwrap();
        let nil = env.nil().unwrap();
        env.puthash(present, nil, table).unwrap();

        let stored = env.gethash(present, table).unwrap();
        assert!(matches!(stored, Some(v) if env.is_nil(v)));
        assert!(env.gethash(absent, table).unwrap().is_none());
    });
}

#[test]
fn test_hash_table_tests() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let equal = env.intern("equal").unwrap();
        let table = env.make_hash(equal, 4).unwrap();
        let k1 = env.make_string("key").unwrap();
        let k2 = env.make_string("key").unwrap();
        let v = env.make_int(9).unwrap();
        env.puthash(k1, v, table).unwrap();
        let found = env.gethash(k2, table).unwrap().unwrap();
        assert_eq!(env.int(found).unwrap(), 9);

        let eq = env.intern("eq").unwrap();
        let table = env.make_hash(eq, 4).unwrap();
        env.puthash(k1, v, table).unwrap();
        assert!(env.gethash(k2, table).unwrap().is_none());

        let bogus = env.intern("bogus").unwrap();
        assert!(env.make_hash(bogus, 1).is_err());
    });
}

#[test]
fn test_module_function_calls() {
    let adder = Arc::new(Adder::default());
    let mut sb = Sandbox::with_trampoline(adder.clone());
    sb.with_env(|env| {
        let f = env
            .make_function(Arity::exact(1), Some("Add ten."), 10, false)
            .unwrap();
        env.defalias("add-ten", f).unwrap();
        let x = env.make_int(5).unwrap();
        let r = env.call("add-ten", &[x]).unwrap();
        assert_eq!(env.int(r).unwrap(), 15);

        let name = env.intern("add-ten").unwrap();
        let doc = env.call("documentation", &[name]).unwrap();
        assert_eq!(env.str(doc).unwrap(), "Add ten.");

        let err = env.call("add-ten", &[]).unwrap_err();
        assert!(signal_message(env, err).starts_with("Wrong number of arguments"));

        let err = env.call("not-defined", &[]).unwrap_err();
        assert!(signal_message(env, err).starts_with("Symbol's function definition is void"));
    });
}

#[test]
fn test_collect_finalizes_unreachable_functions() {
    let adder = Arc::new(Adder::default());
    let mut sb = Sandbox::with_trampoline(adder.clone());
    sb.with_env(|env| {
        let kept = env.make_function(Arity::exact(1), None, 1, true).unwrap();
        env.defalias("kept", kept).unwrap();
        env.make_function(Arity::exact(1), None, 2, true).unwrap();
        env.make_function(Arity::exact(1), None, 3, false).unwrap();
    });
    assert_eq!(sb.collect(), 1);
    assert_eq!(*adder.finalized.lock().unwrap(), vec![2]);
    assert_eq!(sb.collect(), 0);
}

#[test]
fn test_quit() {
    let mut sb = Sandbox::new();
    sb.request_quit();
    sb.with_env(|env| {
        assert!(env.should_quit());
        let err = env.process_input().unwrap_err();
        assert_eq!(signal_message(env, err), "Quit");
        assert_eq!(env.process_input().unwrap(), ProcessInput::Continue);
    });
}

#[test]
fn test_defvar_keeps_existing_value() {
    let mut sb = Sandbox::new();
    sb.with_env(|env| {
        let one = env.make_int(1).unwrap();
        env.defvar("my-var", one, "A variable.").unwrap();
        let two = env.make_int(2).unwrap();
        env.defvar("my-var", two, "A variable.").unwrap();
        let name = env.intern("my-var").unwrap();
        let v = env.call("symbol-value", &[name]).unwrap();
        assert_eq!(env.int(v).unwrap(), 1);
    });
}

#[test]
fn test_major_version() {
    let mut sb = Sandbox::new();
    sb.set_major_version(27);
    sb.with_env(|env| {
        let name = env.intern("emacs-major-version").unwrap();
        let v = env.call("symbol-value", &[name]).unwrap();
        assert_eq!(env.int(v).unwrap(), 27);
    });
}

#[cfg(unix)]
#[test]
fn test_pipe_process() {
    use std::io::Write;

    let mut sb = Sandbox::new();
    let process = sb.with_env(|env| {
        let name_kw = env.intern(":name").unwrap();
        let name = env.make_string("out").unwrap();
        let process = env.call("make-pipe-process", &[name_kw, name]).unwrap();
        let mut file = env.open_pipe(process).unwrap();
        file.write_all(b"hi").unwrap();
        process
    });
    assert_eq!(sb.read_pipe(process, 2).unwrap(), b"hi");

    sb.with_env(|env| {
        let not_pipe = env.make_int(1).unwrap();
        assert!(env.open_pipe(not_pipe).is_err());
    });
}
