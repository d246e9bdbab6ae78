//! The sandbox object heap.
//!
//! Objects are never freed: an id stays valid for the life of the heap, and
//! the collector only decides when module functions are finalized.

use std::collections::HashMap;
use std::fmt::Write as _;

use num_bigint::BigInt;

use crate::host::Arity;

use super::builtins::Builtin;

/// Index of an object in the heap. This is the raw form of a `Value`.
pub(super) type Id = usize;

pub(super) const NIL: Id = 0;
pub(super) const T: Id = 1;

/// Printing and structural comparison give up below this depth.
const MAX_DEPTH: usize = 200;

pub(super) struct SymbolCell {
    pub name: String,
    pub value: Option<Id>,
    pub function: Option<Id>,
    pub plist: Vec<(Id, Id)>,
    pub constant: bool,
}

pub(super) struct ModuleFn {
    pub arity: Arity,
    pub doc: Option<String>,
    pub data: u64,
    pub finalize: bool,
    pub finalized: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum TableTest {
    Eq,
    Eql,
    Equal,
    /// A test defined with `define-hash-table-test`.
    Custom { name: Id, equal: Id, hash: Id },
}

pub(super) struct Table {
    pub test: TableTest,
    /// Entries in insertion order.
    pub entries: Vec<(Id, Id)>,
}

pub(super) struct ErtTest {
    pub name: Id,
    pub body: Id,
    pub doc: Id,
}

pub(super) struct Pipe {
    pub name: String,
    #[cfg(unix)]
    pub read: std::fs::File,
    #[cfg(unix)]
    pub write: std::fs::File,
}

pub(super) enum Object {
    Symbol(SymbolCell),
    Int(BigInt),
    Float(f64),
    Str { bytes: Vec<u8>, multibyte: bool },
    Cons(Id, Id),
    Vector(Vec<Id>),
    Hash(Table),
    Subr(Builtin),
    ModuleFn(ModuleFn),
    Test(ErtTest),
    Pipe(Pipe),
}

pub(super) struct Heap {
    objects: Vec<Object>,
    symbols: HashMap<String, Id>,
}

impl Heap {
    pub fn new() -> Self {
        let mut heap = Self {
            objects: Vec::new(),
            symbols: HashMap::new(),
        };
        let nil = heap.intern("nil");
        let t = heap.intern("t");
        debug_assert_eq!((nil, t), (NIL, T));
        for id in [nil, t] {
            if let Object::Symbol(cell) = heap.get_mut(id) {
                cell.value = Some(id);
                cell.constant = true;
            }
        }
        heap
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn contains(&self, id: Id) -> bool {
        id < self.objects.len()
    }

    pub fn alloc(&mut self, object: Object) -> Id {
        self.objects.push(object);
        self.objects.len() - 1
    }

    /// The object behind `id`. Ids only come from this heap.
    pub fn get(&self, id: Id) -> &Object {
        &self.objects[id]
    }

    pub fn get_mut(&mut self, id: Id) -> &mut Object {
        &mut self.objects[id]
    }

    pub fn intern(&mut self, name: &str) -> Id {
        if let Some(&id) = self.symbols.get(name) {
            return id;
        }
        let id = self.alloc(Object::Symbol(SymbolCell {
            name: name.to_string(),
            value: None,
            function: None,
            plist: Vec::new(),
            // Keywords evaluate to themselves.
            constant: name.starts_with(':'),
        }));
        if name.starts_with(':') {
            if let Object::Symbol(cell) = self.get_mut(id) {
                cell.value = Some(id);
            }
        }
        self.symbols.insert(name.to_string(), id);
        id
    }

    pub fn symbol(&self, id: Id) -> Option<&SymbolCell> {
        match self.get(id) {
            Object::Symbol(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn symbol_mut(&mut self, id: Id) -> Option<&mut SymbolCell> {
        match self.get_mut(id) {
            Object::Symbol(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn get_prop(&self, symbol: Id, prop: Id) -> Option<Id> {
        let cell = self.symbol(symbol)?;
        cell.plist.iter().find(|(k, _)| *k == prop).map(|(_, v)| *v)
    }

    pub fn put_prop(&mut self, symbol: Id, prop: Id, value: Id) {
        if let Some(cell) = self.symbol_mut(symbol) {
            match cell.plist.iter_mut().find(|(k, _)| *k == prop) {
                Some(entry) => entry.1 = value,
                None => cell.plist.push((prop, value)),
            }
        }
    }

    pub fn bool(&self, b: bool) -> Id {
        if b {
            T
        } else {
            NIL
        }
    }

    pub fn int(&mut self, i: impl Into<BigInt>) -> Id {
        self.alloc(Object::Int(i.into()))
    }

    pub fn string(&mut self, s: &str) -> Id {
        self.alloc(Object::Str {
            bytes: s.as_bytes().to_vec(),
            multibyte: true,
        })
    }

    pub fn cons(&mut self, car: Id, cdr: Id) -> Id {
        self.alloc(Object::Cons(car, cdr))
    }

    pub fn list(&mut self, items: &[Id]) -> Id {
        items
            .iter()
            .rev()
            .fold(NIL, |tail, &head| self.alloc(Object::Cons(head, tail)))
    }

    /// Elements of a proper list, or `None` if `id` is not one.
    pub fn list_items(&self, id: Id) -> Option<Vec<Id>> {
        let mut items = Vec::new();
        let mut rest = id;
        loop {
            match self.get(rest) {
                _ if rest == NIL => return Some(items),
                Object::Cons(car, cdr) => {
                    items.push(*car);
                    rest = *cdr;
                }
                _ => return None,
            }
        }
    }

    pub fn type_of(&self, id: Id) -> &'static str {
        match self.get(id) {
            Object::Symbol(_) => "symbol",
            Object::Int(_) => "integer",
            Object::Float(_) => "float",
            Object::Str { .. } => "string",
            Object::Cons(..) => "cons",
            Object::Vector(_) => "vector",
            Object::Hash(_) => "hash-table",
            Object::Subr(_) => "subr",
            Object::ModuleFn(_) => "module-function",
            Object::Test(_) => "ert-test",
            Object::Pipe(_) => "process",
        }
    }

    // ========================================================================
    // Equality
    // ========================================================================

    /// Identity. Integers in the 64-bit range are eq by value, as fixnums
    /// are in the real runtime.
    pub fn eq(&self, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (Object::Int(x), Object::Int(y)) => x == y && i64::try_from(x).is_ok(),
            _ => false,
        }
    }

    pub fn eql(&self, a: Id, b: Id) -> bool {
        if self.eq(a, b) {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (Object::Int(x), Object::Int(y)) => x == y,
            (Object::Float(x), Object::Float(y)) => x.to_bits() == y.to_bits(),
            _ => false,
        }
    }

    pub fn equal(&self, a: Id, b: Id) -> bool {
        self.equal_depth(a, b, 0)
    }

    fn equal_depth(&self, a: Id, b: Id, depth: usize) -> bool {
        if self.eql(a, b) {
            return true;
        }
        if depth > MAX_DEPTH {
            return false;
        }
        match (self.get(a), self.get(b)) {
            (Object::Str { bytes: x, .. }, Object::Str { bytes: y, .. }) => x == y,
            (Object::Cons(a1, d1), Object::Cons(a2, d2)) => {
                self.equal_depth(*a1, *a2, depth + 1) && self.equal_depth(*d1, *d2, depth + 1)
            }
            (Object::Vector(x), Object::Vector(y)) => {
                x.len() == y.len()
                    && x
                        .iter()
                        .zip(y)
                        .all(|(p, q)| self.equal_depth(*p, *q, depth + 1))
            }
            _ => false,
        }
    }

    // ========================================================================
    // Printing
    // ========================================================================

    /// The printed representation of `id`, with strings quoted.
    pub fn prin1(&self, id: Id) -> String {
        let mut out = String::new();
        self.print(id, &mut out, 0);
        out
    }

    fn print(&self, id: Id, out: &mut String, depth: usize) {
        if depth > MAX_DEPTH {
            out.push_str("...");
            return;
        }
        match self.get(id) {
            Object::Symbol(cell) => out.push_str(&cell.name),
            Object::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Object::Float(x) => print_float(*x, out),
            Object::Str { bytes, multibyte } => print_string(bytes, *multibyte, out),
            Object::Cons(..) => {
                out.push('(');
                let mut rest = id;
                let mut first = true;
                while let Object::Cons(car, cdr) = self.get(rest) {
                    if !first {
                        out.push(' ');
                    }
                    first = false;
                    self.print(*car, out, depth + 1);
                    rest = *cdr;
                }
                if rest != NIL {
                    out.push_str(" . ");
                    self.print(rest, out, depth + 1);
                }
                out.push(')');
            }
            Object::Vector(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.print(*item, out, depth + 1);
                }
                out.push(']');
            }
            Object::Hash(table) => {
                let test = match table.test {
                    TableTest::Eq => "eq".to_string(),
                    TableTest::Eql => "eql".to_string(),
                    TableTest::Equal => "equal".to_string(),
                    TableTest::Custom { name, .. } => self.prin1(name),
                };
                let _ = write!(out, "#s(hash-table test {} data (", test);
                for (i, (k, v)) in table.entries.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.print(*k, out, depth + 1);
                    out.push(' ');
                    self.print(*v, out, depth + 1);
                }
                out.push_str("))");
            }
            Object::Subr(b) => {
                let _ = write!(out, "#<subr {}>", b.name);
            }
            Object::ModuleFn(f) => {
                let _ = write!(out, "#<module function {}>", f.data);
            }
            Object::Test(test) => {
                out.push_str("#s(ert-test ");
                self.print(test.name, out, depth + 1);
                out.push(')');
            }
            Object::Pipe(pipe) => {
                let _ = write!(out, "#<process {}>", pipe.name);
            }
        }
    }

    // ========================================================================
    // Reachability
    // ========================================================================

    /// Ids reachable from every interned symbol and from `roots`.
    pub fn mark(&self, roots: &[Id]) -> Vec<bool> {
        let mut marked = vec![false; self.objects.len()];
        let mut stack: Vec<Id> = self.symbols.values().copied().collect();
        stack.extend_from_slice(roots);
        while let Some(id) = stack.pop() {
            if !self.contains(id) || marked[id] {
                continue;
            }
            marked[id] = true;
            match self.get(id) {
                Object::Symbol(cell) => {
                    stack.extend(cell.value);
                    stack.extend(cell.function);
                    for (k, v) in &cell.plist {
                        stack.push(*k);
                        stack.push(*v);
                    }
                }
                Object::Cons(car, cdr) => {
                    stack.push(*car);
                    stack.push(*cdr);
                }
                Object::Vector(items) => stack.extend_from_slice(items),
                Object::Hash(table) => {
                    for (k, v) in &table.entries {
                        stack.push(*k);
                        stack.push(*v);
                    }
                    if let TableTest::Custom { name, equal, hash } = table.test {
                        stack.extend([name, equal, hash]);
                    }
                }
                Object::Test(test) => stack.extend([test.name, test.body, test.doc]),
                _ => {}
            }
        }
        marked
    }

    /// Mark every unreachable, unfinalized module function as finalized and
    /// return their data.
    pub fn sweep_functions(&mut self, marked: &[bool]) -> Vec<u64> {
        let mut finalized = Vec::new();
        for (id, object) in self.objects.iter_mut().enumerate() {
            if let Object::ModuleFn(f) = object {
                if f.finalize && !f.finalized && !marked.get(id).copied().unwrap_or(false) {
                    f.finalized = true;
                    finalized.push(f.data);
                }
            }
        }
        finalized
    }
}

fn print_float(x: f64, out: &mut String) {
    if x.is_nan() {
        out.push_str("0.0e+NaN");
    } else if x.is_infinite() {
        out.push_str(if x > 0.0 { "1.0e+INF" } else { "-1.0e+INF" });
    } else {
        let _ = write!(out, "{:?}", x);
    }
}

fn print_string(bytes: &[u8], multibyte: bool, out: &mut String) {
    out.push('"');
    if multibyte {
        for c in String::from_utf8_lossy(bytes).chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
    } else {
        for &b in bytes {
            match b {
                b'"' | b'\\' => {
                    out.push('\\');
                    out.push(char::from(b));
                }
                0x20..=0x7e => out.push(char::from(b)),
                _ => {
                    let _ = write!(out, "\\{:o}", b);
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_unique() {
        let mut heap = Heap::new();
        let a = heap.intern("foo");
        assert_eq!(heap.intern("foo"), a);
        assert_ne!(heap.intern("bar"), a);
        assert_eq!(heap.intern("nil"), NIL);
    }

    #[test]
    fn test_equality_levels() {
        let mut heap = Heap::new();
        let a = heap.int(5);
        let b = heap.int(5);
        assert!(heap.eq(a, b));
        let big = BigInt::from(u64::MAX) * 4u32;
        let x = heap.int(big.clone());
        let y = heap.int(big);
        assert!(!heap.eq(x, y));
        assert!(heap.eql(x, y));

        let s1 = heap.string("abc");
        let s2 = heap.string("abc");
        assert!(!heap.eql(s1, s2));
        assert!(heap.equal(s1, s2));
        let l1 = heap.list(&[a, s1]);
        let l2 = heap.list(&[b, s2]);
        assert!(heap.equal(l1, l2));
    }

    #[test]
    fn test_prin1() {
        let mut heap = Heap::new();
        let one = heap.int(1);
        let s = heap.string("a\"b");
        let f = heap.alloc(Object::Float(1.5));
        let sym = heap.intern("foo");
        let inner = heap.cons(one, sym);
        let v = heap.alloc(Object::Vector(vec![f, NIL]));
        let l = heap.list(&[inner, s, v]);
        assert_eq!(heap.prin1(l), "((1 . foo) \"a\\\"b\" [1.5 nil])");
        let raw = heap.alloc(Object::Str {
            bytes: vec![b'a', 0xff],
            multibyte: false,
        });
        assert_eq!(heap.prin1(raw), "\"a\\377\"");
    }

    #[test]
    fn test_mark_follows_symbols() {
        let mut heap = Heap::new();
        let held = heap.int(1);
        let loose = heap.int(2);
        let sym = heap.intern("holder");
        let list = heap.list(&[held]);
        if let Some(cell) = heap.symbol_mut(sym) {
            cell.value = Some(list);
        }
        let marked = heap.mark(&[]);
        assert!(marked[held]);
        assert!(!marked[loose]);
    }
}
