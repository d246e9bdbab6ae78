//! Hash table codecs.
//!
//! Maps become host hash tables. The table's test is picked from the key
//! type: `eq` for integers and booleans, `eql` for floats and big integers,
//! `equal` for everything else. Decoding reads the table through `map-pairs`
//! and fails if two host keys collapse to the same native key.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

use num_bigint::BigInt;

use super::{Bytes, Decode, Encode, List, Name, Symbol};
use crate::error::{ConversionError, Result};
use crate::host::{Env, Value};

/// The equality test of a hash table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashTest {
    Eq,
    Eql,
    Equal,
    /// A test defined with `define-hash-table-test`.
    Custom(Name),
}

impl HashTest {
    pub fn name(&self) -> &str {
        match self {
            HashTest::Eq => "eq",
            HashTest::Eql => "eql",
            HashTest::Equal => "equal",
            HashTest::Custom(n) => n.as_str(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, HashTest::Custom(_))
    }
}

impl fmt::Display for HashTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Encode for HashTest {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.intern(self.name())
    }
}

/// Key types with a natural hash table test.
pub trait HashKey {
    fn hash_test() -> HashTest {
        HashTest::Equal
    }
}

macro_rules! impl_hash_key {
    ($test:expr => $($t:ty),*) => {
        $(
            impl HashKey for $t {
                fn hash_test() -> HashTest {
                    $test
                }
            }
        )*
    };
}

impl_hash_key!(HashTest::Eq =>
    bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, Symbol, Name, Value);
impl_hash_key!(HashTest::Eql => f32, f64, BigInt);

impl HashKey for String {}
impl HashKey for Bytes {}
impl<T> HashKey for Vec<T> {}
impl<T> HashKey for List<T> {}

/// Read all `(key . value)` pairs of a host map.
fn map_pairs(env: &mut Env<'_>, table: Value) -> Result<Value> {
    let feature = env.intern("map")?;
    env.call("require", &[feature])?;
    env.call("map-pairs", &[table])
}

fn encode_map<'a, K, V, I>(env: &mut Env<'_>, test: HashTest, len: usize, entries: I) -> Result<Value>
where
    K: Encode + 'a,
    V: Encode + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let test = test.encode(env)?;
    let table = env.make_hash(test, len)?;
    for (k, v) in entries {
        let k = k.encode(env)?;
        let v = v.encode(env)?;
        env.puthash(k, v, table)?;
    }
    Ok(table)
}

fn decode_map<K, V, F>(env: &mut Env<'_>, table: Value, mut insert: F) -> Result<()>
where
    K: Decode + fmt::Debug,
    V: Decode,
    F: FnMut(K, V) -> Option<K>,
{
    let pairs = map_pairs(env, table)?;
    env.dolist(pairs, |env, pair| {
        let (k, v) = env.uncons(pair)?;
        let k = K::decode(env, k)?;
        let v = V::decode(env, v)?;
        match insert(k, v) {
            None => Ok(()),
            Some(dup) => Err(ConversionError::DuplicateKey(format!("{:?}", dup)).into()),
        }
    })
}

impl<K, V, S> Encode for HashMap<K, V, S>
where
    K: Encode + HashKey,
    V: Encode,
{
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        encode_map(env, K::hash_test(), self.len(), self.iter())
    }
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Eq + Hash + fmt::Debug,
    V: Decode,
    S: BuildHasher + Default,
{
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let mut m = HashMap::default();
        decode_map(env, value, |k: K, v: V| {
            if m.contains_key(&k) {
                return Some(k);
            }
            m.insert(k, v);
            None
        })?;
        Ok(m)
    }
}

impl<K, V> Encode for BTreeMap<K, V>
where
    K: Encode + HashKey,
    V: Encode,
{
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        encode_map(env, K::hash_test(), self.len(), self.iter())
    }
}

impl<K, V> Decode for BTreeMap<K, V>
where
    K: Decode + Ord + fmt::Debug,
    V: Decode,
{
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let mut m = BTreeMap::new();
        decode_map(env, value, |k: K, v: V| {
            if m.contains_key(&k) {
                return Some(k);
            }
            m.insert(k, v);
            None
        })?;
        Ok(m)
    }
}
