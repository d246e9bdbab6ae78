//! Sequence codecs.
//!
//! Slices and `Vec`s map to host vectors, `List` maps to proper lists and
//! `Cons` to a single cons cell. Element order is preserved both ways.

use super::{Decode, Encode};
use crate::error::Result;
use crate::host::{Env, Value};

impl<T: Encode> Encode for [T] {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let mut elems = Vec::with_capacity(self.len());
        for x in self {
            elems.push(x.encode(env)?);
        }
        env.make_vector(&elems)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        self.as_slice().encode(env)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let n = env.vec_size(value)?;
        let mut r = Vec::with_capacity(n);
        for i in 0..n {
            let elem = env.vec_get(value, i)?;
            r.push(T::decode(env, elem)?);
        }
        Ok(r)
    }
}

/// A proper list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct List<T>(pub Vec<T>);

impl<T> From<Vec<T>> for List<T> {
    fn from(v: Vec<T>) -> Self {
        List(v)
    }
}

impl<T> IntoIterator for List<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: Encode> Encode for List<T> {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let mut elems = Vec::with_capacity(self.0.len());
        for x in &self.0 {
            elems.push(x.encode(env)?);
        }
        env.list(&elems)
    }
}

impl<T: Decode> Decode for List<T> {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let mut r = Vec::new();
        env.dolist(value, |env, elem| {
            r.push(T::decode(env, elem)?);
            Ok(())
        })?;
        Ok(List(r))
    }
}

/// A single cons cell `(car . cdr)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cons<A, B> {
    pub car: A,
    pub cdr: B,
}

impl<A, B> Cons<A, B> {
    pub fn new(car: A, cdr: B) -> Self {
        Self { car, cdr }
    }
}

impl<A: Encode, B: Encode> Encode for Cons<A, B> {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let car = self.car.encode(env)?;
        let cdr = self.cdr.encode(env)?;
        env.cons(car, cdr)
    }
}

impl<A: Decode, B: Decode> Decode for Cons<A, B> {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let (car, cdr) = env.uncons(value)?;
        Ok(Self {
            car: A::decode(env, car)?,
            cdr: B::decode(env, cdr)?,
        })
    }
}
