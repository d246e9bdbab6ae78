//! Registration and dispatch through a loaded module, including concurrent
//! registration and configuration-driven behavior.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use modbridge::host::sandbox::Sandbox;
use modbridge::{
    BridgeConfig, Datum, Env, Error, ErrorSymbol, Module, RegistrationError, Signature, TypeDesc,
};

fn load(module: &Module, sandbox: &mut Sandbox) -> modbridge::Result<()> {
    sandbox.set_trampoline(module.trampoline());
    sandbox.with_env(|env| module.init(env))
}

fn message(env: &mut Env<'_>, err: Error) -> String {
    match err {
        Error::Signal(s) => s.message(env),
        other => panic!("expected a signal, got {:?}", other),
    }
}

#[test]
fn test_concurrent_exports_claim_each_name_once() {
    let module = Module::new();
    let wins = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let module = module.clone();
            let wins = wins.clone();
            thread::spawn(move || {
                if module.export("shared", move || i as i64, "").is_ok() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
                module.export(format!("own-{}", i), || 0i64, "").unwrap()
            })
        })
        .collect();
    let handles: HashSet<u64> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(handles.len(), 8);

    let mut sb = Sandbox::new();
    load(&module, &mut sb).unwrap();
    sb.with_env(|env| {
        for i in 0..8 {
            let r = env.call(&format!("own-{}", i), &[]).unwrap();
            assert_eq!(env.int(r).unwrap(), 0);
        }
        let r = env.call("shared", &[]).unwrap();
        assert!((0..8).contains(&env.int(r).unwrap()));
    });
}

#[test]
fn test_handles_are_unique() {
    let module = Module::new();
    let handles: HashSet<u64> = (0..100)
        .map(|i| module.export(format!("f-{}", i), || (), "").unwrap())
        .collect();
    assert_eq!(handles.len(), 100);
    assert!(!handles.contains(&0));
}

#[test]
fn test_duplicate_name_is_rejected_across_kinds() {
    let module = Module::new();
    module.export("foo", || 1i64, "").unwrap();
    let err = module.export("foo", || 2i64, "").unwrap_err();
    assert!(matches!(
        err,
        Error::Registration(RegistrationError::DuplicateName(ref n)) if n == "foo"
    ));

    module.define_var("bar", 1i64, "").unwrap();
    assert!(module.define_var("bar", 2i64, "").is_err());

    let mut sb = Sandbox::new();
    load(&module, &mut sb).unwrap();
    sb.with_env(|env| {
        let r = env.call("foo", &[]).unwrap();
        assert_eq!(env.int(r).unwrap(), 1);
    });
}

#[test]
fn test_registration_after_init_is_closed() {
    let module = Module::new();
    let mut sb = Sandbox::new();
    load(&module, &mut sb).unwrap();

    let err = module.export("late", || 1i64, "").unwrap_err();
    assert!(matches!(err, Error::Registration(RegistrationError::Closed)));
    let err = load(&module, &mut sb).unwrap_err();
    assert!(matches!(err, Error::Registration(RegistrationError::Closed)));

    // Immediate registration still works on a loaded module.
    sb.with_env(|env| {
        module.export_now(env, "late", || 5i64, "").unwrap();
        let r = env.call("late", &[]).unwrap();
        assert_eq!(env.int(r).unwrap(), 5);
    });
}

#[test]
fn test_dynamic_export() {
    let module = Module::new();
    let sig = Signature::new(
        vec![TypeDesc::String, TypeDesc::int(64, true)],
        Some(TypeDesc::String),
    );
    module
        .export_dynamic(
            "repeat",
            sig,
            |_env, args| match args.as_slice() {
                [Datum::Str(s), Datum::Int(n)] => Ok(Datum::Str(s.repeat(*n as usize))),
                _ => Err(Error::other("bad arguments")),
            },
            "Repeat a string.",
        )
        .unwrap();

    let mut sb = Sandbox::new();
    load(&module, &mut sb).unwrap();
    sb.with_env(|env| {
        let s = env.make_string("ab").unwrap();
        let n = env.make_int(3).unwrap();
        let r = env.call("repeat", &[s, n]).unwrap();
        assert_eq!(env.str(r).unwrap(), "ababab");

        let err = env.call("repeat", &[n, n]).unwrap_err();
        assert!(message(env, err).starts_with("Wrong type argument"));
    });
}

#[test]
fn test_panics_do_not_poison_the_module() {
    let module = Module::new();
    module
        .export(
            "checked",
            |x: i64| -> i64 {
                if x < 0 {
                    panic!("negative: {}", x);
                }
                x * 2
            },
            "",
        )
        .unwrap();
    let mut sb = Sandbox::new();
    load(&module, &mut sb).unwrap();
    sb.with_env(|env| {
        for round in 0..3 {
            let bad = env.make_int(-round - 1).unwrap();
            let err = env.call("checked", &[bad]).unwrap_err();
            let msg = message(env, err);
            assert!(msg.starts_with("Panic while running module function"), "{}", msg);

            let good = env.make_int(round).unwrap();
            let r = env.call("checked", &[good]).unwrap();
            assert_eq!(env.int(r).unwrap(), round * 2);
        }
    });
}

#[test]
fn test_config_from_toml() {
    let config = BridgeConfig::from_toml_str(
        r#"
[errors]
prefix = "acme"

[runtime]
min_major_version = 28

[async]
queue_capacity = 2
"#,
    )
    .unwrap();
    assert_eq!(config.errors.prefix, "acme");
    assert_eq!(config.async_ops.queue_capacity, 2);
    // Other tests may have installed a logger already.
    let _ = modbridge::logging::init_from_config(&config.logging);

    let module = Module::with_config(config.clone());
    module
        .export("fail", || -> Result<(), Error> { Err(Error::other("no")) }, "")
        .unwrap();
    let mut sb = Sandbox::new();
    sb.set_major_version(27);
    sb.set_trampoline(module.trampoline());
    assert!(!sb.with_env(|env| module.module_init(env)));

    let module = Module::with_config(config);
    module
        .export("fail", || -> Result<(), Error> { Err(Error::other("no")) }, "")
        .unwrap();
    let mut sb = Sandbox::new();
    sb.set_major_version(28);
    sb.set_trampoline(module.trampoline());
    assert!(sb.with_env(|env| module.module_init(env)));
    sb.with_env(|env| {
        let err = env.call("fail", &[]).unwrap_err();
        let acme = ErrorSymbol::new("acme-error", "Generic native error");
        assert!(acme.matches(env, &err));
        assert_eq!(message(env, err), "Generic native error: \"no\"");
    });
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(BridgeConfig::from_toml_str("[errors]\nprefix = \"\"\n").is_err());
    assert!(BridgeConfig::from_toml_str("[async]\nqueue_capacity = 0\n").is_err());
    assert_eq!(BridgeConfig::from_toml_str("").unwrap(), BridgeConfig::default());
}
