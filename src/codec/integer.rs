//! Integer codecs.
//!
//! Values that fit a fixnum use the host's 64-bit primitives. Wider values
//! are carried as arbitrary-precision integers. Decoding into a narrower
//! native type fails with an overflow error instead of truncating.

use num_bigint::BigInt;

use super::{Decode, Encode};
use crate::error::{Error, Result};
use crate::host::{Env, Value};

/// Decode any host integer into `T`, failing if it does not fit.
fn decode_narrow<T>(env: &mut Env<'_>, value: Value) -> Result<T>
where
    T: for<'a> TryFrom<&'a BigInt>,
{
    let big = env.big_int(value)?;
    T::try_from(&big).map_err(|_| Error::overflow(&big))
}

macro_rules! impl_small_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
                    env.make_int(i64::from(*self))
                }
            }

            impl Decode for $t {
                fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
                    decode_narrow(env, value)
                }
            }
        )*
    };
}

impl_small_int!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_wide_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
                    match i64::try_from(*self) {
                        Ok(i) => env.make_int(i),
                        Err(_) => env.make_big_int(&BigInt::from(*self)),
                    }
                }
            }

            impl Decode for $t {
                fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
                    decode_narrow(env, value)
                }
            }
        )*
    };
}

impl_wide_int!(u64, i128, u128, isize, usize);

impl Encode for BigInt {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        env.make_big_int(self)
    }
}

impl Decode for BigInt {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        env.big_int(value)
    }
}
