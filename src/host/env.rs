//! Call-scoped, checked access to a host.
//!
//! Every primitive is followed by a check of the host's pending nonlocal
//! exit. A pending exit is read and cleared in one step, so it surfaces as an
//! error exactly once and never leaks into a later call.

use std::marker::PhantomData;

use num_bigint::BigInt;

use super::{Arity, Exit, ExitKind, Host, ProcessInput, Value};
use crate::codec::{Decode, Encode};
use crate::error::{ConversionError, Error, Result, Signal, Throw};

/// A live environment, valid only for the duration of one host call.
///
/// `Env` is neither `Send` nor `Sync`; it cannot be moved to another thread
/// or retained past the call that supplied it.
pub struct Env<'a> {
    host: &'a mut dyn Host,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Env<'a> {
    pub fn new(host: &'a mut dyn Host) -> Self {
        Self {
            host,
            _not_send: PhantomData,
        }
    }

    /// Unchecked access to the underlying host.
    pub fn host(&mut self) -> &mut dyn Host {
        &mut *self.host
    }

    // ========================================================================
    // Nonlocal exits
    // ========================================================================

    /// Convert a pending nonlocal exit into an error and clear it.
    pub fn check(&mut self) -> Result<()> {
        if self.host.exit_check() == ExitKind::Return {
            return Ok(());
        }
        let exit = self.host.exit_get();
        self.host.exit_clear();
        match exit {
            Exit::Return => Ok(()),
            Exit::Signal { symbol, data } => Err(Error::Signal(Signal { symbol, data })),
            Exit::Throw { tag, value } => Err(Error::Throw(Throw { tag, value })),
        }
    }

    fn checked<T>(&mut self, value: T) -> Result<T> {
        self.check()?;
        Ok(value)
    }

    /// Signal `(symbol . data)` in the host.
    pub fn signal(&mut self, symbol: Value, data: Value) {
        self.host.exit_signal(symbol, data);
    }

    /// Throw `value` to `tag` in the host.
    pub fn throw(&mut self, tag: Value, value: Value) {
        self.host.exit_throw(tag, value);
    }

    /// The host's description of `err`.
    pub fn message(&mut self, err: &Error) -> String {
        match err {
            Error::Signal(s) => s.message(self),
            _ => err.to_string(),
        }
    }

    // ========================================================================
    // Symbols and calls
    // ========================================================================

    /// Intern `name`. Names the host cannot intern directly go through the
    /// `intern` function.
    pub fn intern(&mut self, name: &str) -> Result<Value> {
        if name.bytes().all(|b| b != 0 && b.is_ascii()) {
            let v = self.host.intern(name);
            return self.checked(v);
        }
        let s = self.make_string(name)?;
        self.call("intern", &[s])
    }

    pub fn nil(&mut self) -> Result<Value> {
        let v = self.host.intern("nil");
        self.checked(v)
    }

    pub fn t(&mut self) -> Result<Value> {
        let v = self.host.intern("t");
        self.checked(v)
    }

    /// The name of a symbol.
    pub fn symbol_name(&mut self, symbol: Value) -> Result<String> {
        let name = self.call("symbol-name", &[symbol])?;
        self.str(name)
    }

    pub fn funcall(&mut self, function: Value, args: &[Value]) -> Result<Value> {
        let v = self.host.funcall(function, args);
        self.checked(v)
    }

    /// Call the function named `name`.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let f = self.intern(name)?;
        self.funcall(f, args)
    }

    /// Call the function named `name` and decode its result.
    pub fn call_out<T: Decode>(&mut self, name: &str, args: &[Value]) -> Result<T> {
        let v = self.call(name, args)?;
        T::decode(self, v)
    }

    /// Encode `args`, then call the function named `name`.
    pub fn invoke(&mut self, name: &str, args: &[&dyn Encode]) -> Result<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(arg.encode(self)?);
        }
        self.call(name, &values)
    }

    pub fn eq(&mut self, a: Value, b: Value) -> bool {
        self.host.eq(a, b)
    }

    pub fn is_not_nil(&mut self, value: Value) -> bool {
        self.host.is_not_nil(value)
    }

    pub fn is_nil(&mut self, value: Value) -> bool {
        !self.host.is_not_nil(value)
    }

    // ========================================================================
    // Scalars
    // ========================================================================

    pub fn int(&mut self, value: Value) -> Result<i64> {
        let i = self.host.extract_integer(value);
        self.checked(i)
    }

    pub fn make_int(&mut self, i: i64) -> Result<Value> {
        let v = self.host.make_integer(i);
        self.checked(v)
    }

    pub fn big_int(&mut self, value: Value) -> Result<BigInt> {
        let i = self.host.extract_big_integer(value);
        self.checked(i)
    }

    pub fn make_big_int(&mut self, i: &BigInt) -> Result<Value> {
        let v = self.host.make_big_integer(i);
        self.checked(v)
    }

    pub fn float(&mut self, value: Value) -> Result<f64> {
        let f = self.host.extract_float(value);
        self.checked(f)
    }

    pub fn make_float(&mut self, f: f64) -> Result<Value> {
        let v = self.host.make_float(f);
        self.checked(v)
    }

    /// The raw bytes of a string.
    pub fn bytes(&mut self, value: Value) -> Result<Vec<u8>> {
        let bytes = self.host.copy_string_contents(value);
        self.check()?;
        bytes.ok_or_else(|| Error::wrong_type("stringp", format!("{:?}", value)))
    }

    /// The contents of a string, which must be valid UTF-8.
    pub fn str(&mut self, value: Value) -> Result<String> {
        let bytes = self.bytes(value)?;
        String::from_utf8(bytes).map_err(|_| ConversionError::InvalidUtf8.into())
    }

    pub fn make_string(&mut self, s: &str) -> Result<Value> {
        let v = self.host.make_string(s);
        self.checked(v)
    }

    pub fn make_unibyte_string(&mut self, bytes: &[u8]) -> Result<Value> {
        let v = self.host.make_unibyte_string(bytes);
        self.checked(v)
    }

    pub fn time(&mut self, value: Value) -> Result<(i64, u32)> {
        let t = self.host.extract_time(value);
        self.checked(t)
    }

    pub fn make_time(&mut self, secs: i64, nanos: u32) -> Result<Value> {
        let v = self.host.make_time(secs, nanos);
        self.checked(v)
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    pub fn vec_get(&mut self, vector: Value, index: usize) -> Result<Value> {
        let v = self.host.vec_get(vector, index);
        self.checked(v)
    }

    pub fn vec_set(&mut self, vector: Value, index: usize, value: Value) -> Result<()> {
        self.host.vec_set(vector, index, value);
        self.check()
    }

    pub fn vec_size(&mut self, vector: Value) -> Result<usize> {
        let n = self.host.vec_size(vector);
        self.checked(n)
    }

    /// A fresh vector holding `elems`.
    pub fn make_vector(&mut self, elems: &[Value]) -> Result<Value> {
        self.call("vector", elems)
    }

    // ========================================================================
    // Lists
    // ========================================================================

    pub fn list(&mut self, elems: &[Value]) -> Result<Value> {
        self.call("list", elems)
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value> {
        self.call("cons", &[car, cdr])
    }

    pub fn car(&mut self, cons: Value) -> Result<Value> {
        self.call("car", &[cons])
    }

    pub fn cdr(&mut self, cons: Value) -> Result<Value> {
        self.call("cdr", &[cons])
    }

    pub fn uncons(&mut self, cons: Value) -> Result<(Value, Value)> {
        Ok((self.car(cons)?, self.cdr(cons)?))
    }

    /// Length of a sequence.
    pub fn length(&mut self, seq: Value) -> Result<usize> {
        let n = self.call("length", &[seq])?;
        let n = self.int(n)?;
        usize::try_from(n).map_err(|_| Error::overflow(n))
    }

    /// Call `f` for each element of a proper list.
    pub fn dolist<F>(&mut self, list: Value, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Self, Value) -> Result<()>,
    {
        let mut rest = list;
        while self.is_not_nil(rest) {
            let (head, tail) = self.uncons(rest)?;
            f(self, head)?;
            rest = tail;
        }
        Ok(())
    }

    // ========================================================================
    // Hash tables
    // ========================================================================

    /// A fresh hash table with the given test and size hint.
    pub fn make_hash(&mut self, test: Value, size: usize) -> Result<Value> {
        let test_kw = self.intern(":test")?;
        let size_kw = self.intern(":size")?;
        let size = i64::try_from(size).map_err(|_| Error::overflow(size))?;
        let size = self.make_int(size)?;
        self.call("make-hash-table", &[test_kw, test, size_kw, size])
    }

    pub fn puthash(&mut self, key: Value, value: Value, table: Value) -> Result<()> {
        self.call("puthash", &[key, value, table])?;
        Ok(())
    }

    /// The value stored under `key`, or `None` when `table` has no such
    /// entry. A stored nil comes back as `Some`.
    pub fn gethash(&mut self, key: Value, table: Value) -> Result<Option<Value>> {
        // A fresh cons is eq to nothing already in the table.
        let nil = self.nil()?;
        let missing = self.cons(nil, nil)?;
        let v = self.call("gethash", &[key, table, missing])?;
        Ok(if self.eq(v, missing) { None } else { Some(v) })
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    pub fn make_function(
        &mut self,
        arity: Arity,
        doc: Option<&str>,
        data: u64,
        finalize: bool,
    ) -> Result<Value> {
        let v = self.host.make_function(arity, doc, data, finalize);
        self.checked(v)
    }

    /// Make `name` an alias of `definition`.
    pub fn defalias(&mut self, name: &str, definition: Value) -> Result<()> {
        let name = self.intern(name)?;
        self.call("defalias", &[name, definition])?;
        Ok(())
    }

    /// Evaluate `(defvar NAME (quote INIT) DOC)`.
    pub fn defvar(&mut self, name: &str, init: Value, doc: &str) -> Result<()> {
        let defvar = self.intern("defvar")?;
        let quote = self.intern("quote")?;
        let name = self.intern(name)?;
        let quoted = self.list(&[quote, init])?;
        let doc = self.make_string(doc)?;
        let form = self.list(&[defvar, name, quoted, doc])?;
        self.call("eval", &[form])?;
        Ok(())
    }

    // ========================================================================
    // Interruption and pipes
    // ========================================================================

    /// Whether the user has requested a quit.
    pub fn should_quit(&mut self) -> bool {
        self.host.should_quit()
    }

    /// Process pending input. On `Quit` the host leaves a pending quit
    /// signal, which is returned as an error.
    pub fn process_input(&mut self) -> Result<ProcessInput> {
        let r = self.host.process_input();
        self.check()?;
        Ok(r)
    }

    /// Open a writable file feeding the given pipe process.
    #[cfg(unix)]
    pub fn open_pipe(&mut self, pipe_process: Value) -> Result<std::fs::File> {
        use std::os::unix::io::FromRawFd;

        let fd = self.host.open_channel(pipe_process);
        self.check()?;
        let fd = std::os::raw::c_int::try_from(fd).map_err(|_| Error::overflow(fd))?;
        if fd < 0 {
            return Err(Error::wrong_type("file-descriptor-p", fd));
        }
        // The host hands over ownership of the descriptor.
        Ok(unsafe { std::fs::File::from_raw_fd(fd) })
    }
}
