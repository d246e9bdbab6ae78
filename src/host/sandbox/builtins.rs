//! Builtin functions of the sandbox.

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use crate::host::Arity;

use super::objects::{ErtTest, Id, Object, Table, TableTest, NIL};
use super::{Outcome, Pending, Raised, Sandbox};

pub(super) type BuiltinFn = fn(&mut Sandbox, &[Id]) -> Outcome;

#[derive(Clone, Copy)]
pub(super) struct Builtin {
    pub name: &'static str,
    pub min: usize,
    pub max: Option<usize>,
    pub f: BuiltinFn,
}

impl Builtin {
    pub fn arity(&self) -> Arity {
        Arity {
            min: self.min,
            max: self.max,
        }
    }
}

const fn exact(name: &'static str, n: usize, f: BuiltinFn) -> Builtin {
    Builtin {
        name,
        min: n,
        max: Some(n),
        f,
    }
}

const fn range(name: &'static str, min: usize, max: usize, f: BuiltinFn) -> Builtin {
    Builtin {
        name,
        min,
        max: Some(max),
        f,
    }
}

const fn many(name: &'static str, min: usize, f: BuiltinFn) -> Builtin {
    Builtin {
        name,
        min,
        max: None,
        f,
    }
}

pub(super) const BUILTINS: &[Builtin] = &[
    // Lists and vectors
    many("list", 0, list),
    exact("cons", 2, cons),
    exact("car", 1, car),
    exact("cdr", 1, cdr),
    many("vector", 0, vector),
    exact("make-vector", 2, make_vector),
    exact("length", 1, length),
    // Hash tables
    many("make-hash-table", 0, make_hash_table),
    exact("puthash", 3, puthash),
    range("gethash", 2, 3, gethash),
    exact("hash-table-count", 1, hash_table_count),
    exact("map-pairs", 1, map_pairs),
    exact("define-hash-table-test", 3, define_hash_table_test),
    range("require", 1, 3, identity),
    // Symbols and functions
    exact("intern", 1, intern),
    exact("symbol-name", 1, symbol_name),
    exact("symbol-value", 1, symbol_value),
    exact("set", 2, set),
    exact("get", 2, get),
    exact("put", 3, put),
    range("defalias", 2, 3, defalias),
    exact("fset", 2, fset),
    exact("symbol-function", 1, symbol_function),
    many("funcall", 1, funcall),
    range("eval", 1, 2, eval),
    exact("documentation", 1, documentation),
    exact("func-arity", 1, func_arity),
    // Errors and exits
    range("define-error", 2, 3, define_error),
    exact("error-message-string", 1, error_message_string),
    exact("signal", 2, signal),
    exact("throw", 2, throw),
    // Tests
    many("make-ert-test", 0, make_ert_test),
    exact("ert-set-test", 2, ert_set_test),
    exact("ert-get-test", 1, ert_get_test),
    exact("ert-test-body", 1, ert_test_body),
    exact("ert-test-documentation", 1, ert_test_documentation),
    // Scalars and predicates
    many("unibyte-string", 0, unibyte_string),
    many("+", 0, plus),
    exact("identity", 1, identity),
    exact("eq", 2, eq),
    exact("equal", 2, equal),
    exact("type-of", 1, type_of),
    exact("null", 1, null),
    exact("integerp", 1, integerp),
    exact("floatp", 1, floatp),
    exact("stringp", 1, stringp),
    exact("symbolp", 1, symbolp),
    exact("consp", 1, consp),
    exact("vectorp", 1, vectorp),
    exact("functionp", 1, functionp),
    // Processes
    many("make-pipe-process", 0, make_pipe_process),
];

// ============================================================================
// Lists and vectors
// ============================================================================

fn list(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(sb.heap.list(args))
}

fn cons(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(sb.heap.cons(args[0], args[1]))
}

fn car(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    match sb.heap.get(args[0]) {
        _ if args[0] == NIL => Ok(NIL),
        Object::Cons(car, _) => Ok(*car),
        _ => Err(sb.wrong_type("listp", args[0])),
    }
}

fn cdr(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    match sb.heap.get(args[0]) {
        _ if args[0] == NIL => Ok(NIL),
        Object::Cons(_, cdr) => Ok(*cdr),
        _ => Err(sb.wrong_type("listp", args[0])),
    }
}

fn vector(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(sb.heap.alloc(Object::Vector(args.to_vec())))
}

fn make_vector(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let n = sb.index_arg(args[0])?;
    Ok(sb.heap.alloc(Object::Vector(vec![args[1]; n])))
}

fn length(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let seq = args[0];
    let n = match sb.heap.get(seq) {
        _ if seq == NIL => 0,
        Object::Cons(..) => sb.list_arg(seq)?.len(),
        Object::Vector(items) => items.len(),
        Object::Str { bytes, multibyte } => {
            if *multibyte {
                String::from_utf8_lossy(bytes).chars().count()
            } else {
                bytes.len()
            }
        }
        _ => return Err(sb.wrong_type("sequencep", seq)),
    };
    Ok(sb.heap.int(n as u64))
}

// ============================================================================
// Hash tables
// ============================================================================

fn keyword_args(sb: &mut Sandbox, args: &[Id]) -> std::result::Result<Vec<(String, Id)>, Raised> {
    if args.len() % 2 != 0 {
        let n = sb.heap.int(args.len() as u64);
        return Err(sb.raise("wrong-number-of-arguments", &[n]));
    }
    let mut pairs = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let key = sb.symbol_arg(pair[0])?;
        let name = sb.heap.symbol(key).map(|c| c.name.clone()).unwrap_or_default();
        pairs.push((name, pair[1]));
    }
    Ok(pairs)
}

fn resolve_test(sb: &mut Sandbox, test: Id) -> std::result::Result<TableTest, Raised> {
    if test == NIL {
        return Ok(TableTest::Eql);
    }
    let name = match sb.heap.symbol(test) {
        Some(cell) => cell.name.clone(),
        None => return Err(sb.wrong_type("symbolp", test)),
    };
    match name.as_str() {
        "eq" => return Ok(TableTest::Eq),
        "eql" => return Ok(TableTest::Eql),
        "equal" => return Ok(TableTest::Equal),
        _ => {}
    }
    let prop = sb.heap.intern("hash-table-test");
    let fns = sb.heap.get_prop(test, prop).and_then(|l| sb.heap.list_items(l));
    match fns.as_deref() {
        Some(&[equal, hash]) => Ok(TableTest::Custom {
            name: test,
            equal,
            hash,
        }),
        _ => {
            let message = format!("Invalid hash table test {}", sb.heap.prin1(test));
            Err(sb.error(&message))
        }
    }
}

fn make_hash_table(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let mut test = TableTest::Eql;
    for (key, value) in keyword_args(sb, args)? {
        match key.as_str() {
            ":test" => test = resolve_test(sb, value)?,
            ":size" if value != NIL => {
                sb.index_arg(value)?;
            }
            _ => {}
        }
    }
    Ok(sb.heap.alloc(Object::Hash(Table {
        test,
        entries: Vec::new(),
    })))
}

fn table_keys(sb: &mut Sandbox, table: Id) -> std::result::Result<(TableTest, Vec<Id>), Raised> {
    match sb.heap.get(table) {
        Object::Hash(t) => Ok((t.test, t.entries.iter().map(|(k, _)| *k).collect())),
        _ => Err(sb.wrong_type("hash-table-p", table)),
    }
}

/// Position of `key` in `table`. Custom tests call back into their
/// functions, which may signal.
fn find_key(sb: &mut Sandbox, table: Id, key: Id) -> std::result::Result<Option<usize>, Raised> {
    let (test, keys) = table_keys(sb, table)?;
    let found = match test {
        TableTest::Eq => keys.iter().position(|&k| sb.heap.eq(k, key)),
        TableTest::Eql => keys.iter().position(|&k| sb.heap.eql(k, key)),
        TableTest::Equal => keys.iter().position(|&k| sb.heap.equal(k, key)),
        TableTest::Custom { equal, hash, .. } => {
            let h = sb.apply(hash, &[key])?;
            if !matches!(sb.heap.get(h), Object::Int(_)) {
                return Err(sb.wrong_type("fixnump", h));
            }
            let mut found = None;
            for (i, &k) in keys.iter().enumerate() {
                if sb.apply(equal, &[key, k])? != NIL {
                    found = Some(i);
                    break;
                }
            }
            found
        }
    };
    Ok(found)
}

fn puthash(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let (key, value, table) = (args[0], args[1], args[2]);
    let index = find_key(sb, table, key)?;
    if let Object::Hash(t) = sb.heap.get_mut(table) {
        match index {
            Some(i) => t.entries[i].1 = value,
            None => t.entries.push((key, value)),
        }
    }
    Ok(value)
}

fn gethash(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let default = args.get(2).copied().unwrap_or(NIL);
    let index = find_key(sb, args[1], args[0])?;
    match (index, sb.heap.get(args[1])) {
        (Some(i), Object::Hash(t)) => Ok(t.entries[i].1),
        _ => Ok(default),
    }
}

fn hash_table_count(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let (_, keys) = table_keys(sb, args[0])?;
    Ok(sb.heap.int(keys.len() as u64))
}

fn map_pairs(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let entries = match sb.heap.get(args[0]) {
        Object::Hash(t) => t.entries.clone(),
        _ => return Err(sb.wrong_type("mapp", args[0])),
    };
    let pairs: Vec<Id> = entries.into_iter().map(|(k, v)| sb.heap.cons(k, v)).collect();
    Ok(sb.heap.list(&pairs))
}

fn define_hash_table_test(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let name = sb.symbol_arg(args[0])?;
    let fns = sb.heap.list(&[args[1], args[2]]);
    let prop = sb.heap.intern("hash-table-test");
    sb.heap.put_prop(name, prop, fns);
    Ok(fns)
}

// ============================================================================
// Symbols and functions
// ============================================================================

fn intern(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let name = sb.string_arg(args[0])?;
    Ok(sb.heap.intern(&name))
}

fn symbol_name(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    let name = sb.heap.symbol(symbol).map(|c| c.name.clone()).unwrap_or_default();
    Ok(sb.heap.string(&name))
}

fn symbol_value(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    match sb.heap.symbol(symbol).and_then(|c| c.value) {
        Some(v) => Ok(v),
        None => Err(sb.raise("void-variable", &[symbol])),
    }
}

fn set(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    if sb.heap.symbol(symbol).map_or(false, |c| c.constant) {
        return Err(sb.raise("setting-constant", &[symbol]));
    }
    if let Some(cell) = sb.heap.symbol_mut(symbol) {
        cell.value = Some(args[1]);
    }
    Ok(args[1])
}

fn get(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    Ok(sb.heap.get_prop(symbol, args[1]).unwrap_or(NIL))
}

fn put(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    sb.heap.put_prop(symbol, args[1], args[2]);
    Ok(args[2])
}

fn fset(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    if symbol == NIL && args[1] != NIL {
        return Err(sb.raise("setting-constant", &[symbol]));
    }
    if let Some(cell) = sb.heap.symbol_mut(symbol) {
        cell.function = Some(args[1]);
    }
    Ok(args[1])
}

fn defalias(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    fset(sb, &args[..2])?;
    if let Some(&doc) = args.get(2) {
        let prop = sb.heap.intern("function-documentation");
        sb.heap.put_prop(args[0], prop, doc);
    }
    Ok(args[0])
}

fn symbol_function(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let symbol = sb.symbol_arg(args[0])?;
    Ok(sb.heap.symbol(symbol).and_then(|c| c.function).unwrap_or(NIL))
}

fn funcall(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    sb.apply(args[0], &args[1..])
}

fn eval(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    sb.eval(args[0])
}

fn documentation(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let f = sb.indirect_function(args[0])?;
    let doc = match sb.heap.get(f) {
        Object::ModuleFn(m) => m.doc.clone(),
        _ => None,
    };
    Ok(match doc {
        Some(doc) => sb.heap.string(&doc),
        None => NIL,
    })
}

fn func_arity(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let f = sb.indirect_function(args[0])?;
    let arity = match sb.heap.get(f) {
        Object::ModuleFn(m) => m.arity,
        Object::Subr(b) => b.arity(),
        _ => return Err(sb.raise("invalid-function", &[args[0]])),
    };
    let min = sb.heap.int(arity.min as u64);
    let max = match arity.max {
        Some(max) => sb.heap.int(max as u64),
        None => sb.heap.intern("many"),
    };
    Ok(sb.heap.cons(min, max))
}

// ============================================================================
// Errors and exits
// ============================================================================

fn define_error(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let name = sb.symbol_arg(args[0])?;
    sb.string_arg(args[1])?;
    let parent = args.get(2).copied().unwrap_or(NIL);
    let parents = if parent == NIL {
        vec![sb.heap.intern("error")]
    } else if matches!(sb.heap.get(parent), Object::Symbol(_)) {
        vec![parent]
    } else {
        sb.list_arg(parent)?
    };
    let conditions_prop = sb.heap.intern("error-conditions");
    let mut conditions = vec![name];
    for parent in parents {
        let inherited = sb
            .heap
            .get_prop(parent, conditions_prop)
            .and_then(|l| sb.heap.list_items(l));
        match inherited {
            Some(items) => {
                for c in items {
                    if !conditions.contains(&c) {
                        conditions.push(c);
                    }
                }
            }
            None => {
                let message = format!("Unknown signal `{}'", sb.heap.prin1(parent));
                return Err(sb.error(&message));
            }
        }
    }
    let conditions = sb.heap.list(&conditions);
    let message_prop = sb.heap.intern("error-message");
    sb.heap.put_prop(name, conditions_prop, conditions);
    sb.heap.put_prop(name, message_prop, args[1]);
    Ok(conditions)
}

/// `MESSAGE: DATA1, DATA2`. For plain `error` the first datum is the
/// message itself.
fn error_message_string(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let (symbol, data) = match sb.heap.get(args[0]) {
        Object::Cons(symbol, data) => (*symbol, *data),
        _ => return Ok(sb.heap.string("peculiar error")),
    };
    let mut items = sb.heap.list_items(data).unwrap_or_else(|| vec![data]);
    let message_prop = sb.heap.intern("error-message");
    let error = sb.heap.intern("error");
    let mut message = match sb.heap.get_prop(symbol, message_prop).map(|m| sb.heap.get(m)) {
        Some(Object::Str { bytes, .. }) => String::from_utf8_lossy(bytes).into_owned(),
        _ => "peculiar error".to_string(),
    };
    if symbol == error {
        if let Some(Object::Str { bytes, .. }) = items.first().map(|&m| sb.heap.get(m)) {
            message = String::from_utf8_lossy(bytes).into_owned();
            items.remove(0);
        }
    }
    for (i, item) in items.iter().enumerate() {
        message.push_str(if i == 0 { ": " } else { ", " });
        message.push_str(&sb.heap.prin1(*item));
    }
    Ok(sb.heap.string(&message))
}

fn signal(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    sb.exit = Some(Pending::Signal(args[0], args[1]));
    Err(Raised)
}

fn throw(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    sb.exit = Some(Pending::Throw(args[0], args[1]));
    Err(Raised)
}

// ============================================================================
// Tests
// ============================================================================

fn make_ert_test(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let (mut name, mut body, mut doc) = (NIL, None, NIL);
    for (key, value) in keyword_args(sb, args)? {
        match key.as_str() {
            ":name" => name = value,
            ":body" => body = Some(value),
            ":documentation" => doc = value,
            _ => {}
        }
    }
    let body = match body {
        Some(body) => body,
        None => return Err(sb.error("ert test without a body")),
    };
    Ok(sb.heap.alloc(Object::Test(ErtTest { name, body, doc })))
}

fn ert_set_test(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let name = sb.symbol_arg(args[0])?;
    if !matches!(sb.heap.get(args[1]), Object::Test(_)) {
        return Err(sb.wrong_type("ert-test-p", args[1]));
    }
    let prop = sb.heap.intern("ert--test");
    sb.heap.put_prop(name, prop, args[1]);
    Ok(args[1])
}

fn ert_get_test(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let name = sb.symbol_arg(args[0])?;
    let prop = sb.heap.intern("ert--test");
    match sb.heap.get_prop(name, prop) {
        Some(test) => Ok(test),
        None => {
            let message = format!("No test named `{}'", sb.heap.prin1(name));
            Err(sb.error(&message))
        }
    }
}

fn ert_test_body(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    match sb.heap.get(args[0]) {
        Object::Test(test) => Ok(test.body),
        _ => Err(sb.wrong_type("ert-test-p", args[0])),
    }
}

fn ert_test_documentation(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    match sb.heap.get(args[0]) {
        Object::Test(test) => Ok(test.doc),
        _ => Err(sb.wrong_type("ert-test-p", args[0])),
    }
}

// ============================================================================
// Scalars and predicates
// ============================================================================

fn unibyte_string(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let mut bytes = Vec::with_capacity(args.len());
    for &arg in args {
        let i = sb.int_arg(arg)?;
        match i.to_u8() {
            Some(b) => bytes.push(b),
            None => return Err(sb.raise("args-out-of-range", &[arg])),
        }
    }
    Ok(sb.heap.alloc(Object::Str {
        bytes,
        multibyte: false,
    }))
}

fn plus(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let mut int = BigInt::from(0);
    let mut float: Option<f64> = None;
    for &arg in args {
        match sb.heap.get(arg) {
            Object::Int(i) => int += i,
            Object::Float(x) => *float.get_or_insert(0.0) += *x,
            _ => return Err(sb.wrong_type("number-or-marker-p", arg)),
        }
    }
    Ok(match float {
        Some(x) => {
            let sum = x + int.to_f64().unwrap_or(f64::NAN);
            sb.heap.alloc(Object::Float(sum))
        }
        None => sb.heap.int(int),
    })
}

fn identity(_sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(args[0])
}

fn eq(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(sb.heap.bool(sb.heap.eq(args[0], args[1])))
}

fn equal(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(sb.heap.bool(sb.heap.equal(args[0], args[1])))
}

fn type_of(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let name = sb.heap.type_of(args[0]);
    Ok(sb.heap.intern(name))
}

fn predicate(sb: &mut Sandbox, id: Id, f: impl Fn(&Object) -> bool) -> Outcome {
    Ok(sb.heap.bool(f(sb.heap.get(id))))
}

fn null(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    Ok(sb.heap.bool(args[0] == NIL))
}

fn integerp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    predicate(sb, args[0], |o| matches!(o, Object::Int(_)))
}

fn floatp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    predicate(sb, args[0], |o| matches!(o, Object::Float(_)))
}

fn stringp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    predicate(sb, args[0], |o| matches!(o, Object::Str { .. }))
}

fn symbolp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    predicate(sb, args[0], |o| matches!(o, Object::Symbol(_)))
}

fn consp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    predicate(sb, args[0], |o| matches!(o, Object::Cons(..)))
}

fn vectorp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    predicate(sb, args[0], |o| matches!(o, Object::Vector(_)))
}

fn functionp(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    let callable = match sb.heap.get(args[0]) {
        Object::Subr(_) => true,
        Object::ModuleFn(m) => !m.finalized,
        Object::Symbol(cell) => cell.function.map_or(false, |f| f != NIL),
        _ => false,
    };
    Ok(sb.heap.bool(callable))
}

// ============================================================================
// Time
// ============================================================================

/// Seconds and nanoseconds of an integer, a float, `(HIGH . LOW)` or
/// `(HIGH LOW [USEC [PSEC]])`.
pub(super) fn time_parts(sb: &mut Sandbox, id: Id) -> std::result::Result<(i64, u32), Raised> {
    let invalid = |sb: &mut Sandbox| sb.error("Invalid time specification");
    match sb.heap.get(id) {
        Object::Int(i) => match i.to_i64() {
            Some(secs) => return Ok((secs, 0)),
            None => return Err(sb.raise("overflow-error", &[id])),
        },
        Object::Float(x) => {
            let x = *x;
            let secs = x.floor();
            if !secs.is_finite() || secs < i64::MIN as f64 || secs >= i64::MAX as f64 {
                return Err(sb.raise("overflow-error", &[id]));
            }
            let nanos = (((x - secs) * 1e9) as u32).min(999_999_999);
            return Ok((secs as i64, nanos));
        }
        Object::Cons(..) => {}
        _ => return Err(invalid(sb)),
    }

    let (high, rest) = match sb.heap.get(id) {
        Object::Cons(high, rest) => (*high, *rest),
        _ => return Err(invalid(sb)),
    };
    let high = sb.int_arg(high)?;
    let mut parts = Vec::new();
    if let Object::Int(low) = sb.heap.get(rest) {
        parts.push(low.clone());
    } else {
        for item in sb.list_arg(rest)? {
            parts.push(sb.int_arg(item)?);
        }
    }
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid(sb));
    }
    parts.resize(3, BigInt::from(0));
    let million = BigInt::from(1_000_000);
    let in_range = |part: &BigInt| part.sign() != Sign::Minus && *part < million;
    if !in_range(&parts[1]) || !in_range(&parts[2]) {
        return Err(invalid(sb));
    }
    let secs = (high << 16u32) + &parts[0];
    let nanos = &parts[1] * 1000u32 + &parts[2] / 1000u32;
    match (secs.to_i64(), nanos.to_u32()) {
        (Some(secs), Some(nanos)) => Ok((secs, nanos)),
        _ => Err(sb.raise("overflow-error", &[id])),
    }
}

// ============================================================================
// Processes
// ============================================================================

#[cfg(unix)]
fn make_pipe_process(sb: &mut Sandbox, args: &[Id]) -> Outcome {
    use std::fs::File;
    use std::os::unix::io::FromRawFd;

    let mut name = "pipe".to_string();
    for (key, value) in keyword_args(sb, args)? {
        if key == ":name" {
            name = sb.string_arg(value)?;
        }
    }
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        let message = std::io::Error::last_os_error().to_string();
        let message = sb.heap.string(&message);
        return Err(sb.raise("file-error", &[message]));
    }
    // SAFETY: both descriptors were just created and are owned by nobody
    // else.
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    Ok(sb.heap.alloc(Object::Pipe(super::objects::Pipe { name, read, write })))
}

#[cfg(not(unix))]
fn make_pipe_process(sb: &mut Sandbox, _args: &[Id]) -> Outcome {
    Err(sb.error("pipe processes are not supported on this platform"))
}

/// A new descriptor for the writing end of a pipe process. The caller owns
/// it.
#[cfg(unix)]
pub(super) fn open_channel(sb: &mut Sandbox, id: Id) -> Option<i64> {
    use std::os::unix::io::IntoRawFd;

    let cloned = match sb.heap.get(id) {
        Object::Pipe(pipe) => pipe.write.try_clone(),
        _ => {
            sb.wrong_type("processp", id);
            return None;
        }
    };
    match cloned {
        Ok(file) => Some(i64::from(file.into_raw_fd())),
        Err(err) => {
            let message = sb.heap.string(&err.to_string());
            sb.raise("file-error", &[message]);
            None
        }
    }
}

#[cfg(not(unix))]
pub(super) fn open_channel(sb: &mut Sandbox, _id: Id) -> Option<i64> {
    sb.error("pipe processes are not supported on this platform");
    None
}
