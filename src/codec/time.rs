//! Time codecs.
//!
//! `SystemTime` and `Duration` go through the host's timestamp primitives at
//! nanosecond precision. `Picoseconds` carries the full precision of a host
//! time value as an arbitrary-precision count and uses the
//! `(HIGH LOW USEC PSEC)` list representation.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive};

use super::{Decode, Encode};
use crate::error::{Error, Result};
use crate::host::{Env, Value};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Floored quotient and remainder for a positive divisor `d`.
fn div_mod_floor(n: &BigInt, d: &BigInt) -> (BigInt, BigInt) {
    let (q, r) = (n / d, n % d);
    if r.is_negative() {
        (q - 1i32, r + d)
    } else {
        (q, r)
    }
}

impl Encode for SystemTime {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let (secs, nanos) = match self.duration_since(UNIX_EPOCH) {
            Ok(d) => (
                i64::try_from(d.as_secs()).map_err(|_| Error::overflow(format!("{:?}", self)))?,
                d.subsec_nanos(),
            ),
            Err(e) => {
                let d = e.duration();
                let secs = i64::try_from(d.as_secs())
                    .map_err(|_| Error::overflow(format!("{:?}", self)))?;
                match d.subsec_nanos() {
                    0 => (-secs, 0),
                    n => (-secs - 1, NANOS_PER_SEC as u32 - n),
                }
            }
        };
        env.make_time(secs, nanos)
    }
}

impl Decode for SystemTime {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let (secs, nanos) = env.time(value)?;
        system_time(secs, nanos)
    }
}

fn system_time(secs: i64, nanos: u32) -> Result<SystemTime> {
    let overflow = || Error::overflow(format!("{}.{:09}s", secs, nanos));
    let t = if secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::new(secs.unsigned_abs(), nanos))
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nanos))))
    };
    t.ok_or_else(overflow)
}

impl Encode for Duration {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let secs = i64::try_from(self.as_secs()).map_err(|_| Error::overflow(format!("{:?}", self)))?;
        env.make_time(secs, self.subsec_nanos())
    }
}

impl Decode for Duration {
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let (secs, nanos) = env.time(value)?;
        let secs = u64::try_from(secs).map_err(|_| Error::overflow(format!("{}.{:09}s", secs, nanos)))?;
        Ok(Duration::new(secs, nanos))
    }
}

/// A time value in picoseconds since the epoch, or a duration in
/// picoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Picoseconds(pub BigInt);

impl Picoseconds {
    fn from_quad(high: &BigInt, low: &BigInt, usec: &BigInt, psec: &BigInt) -> Self {
        let secs: BigInt = (high << 16u32) + low;
        let usecs = secs * 1_000_000i64 + usec;
        Picoseconds(usecs * 1_000_000i64 + psec)
    }

    /// Whole nanoseconds, rounding toward negative infinity.
    fn nanos(&self) -> BigInt {
        div_mod_floor(&self.0, &BigInt::from(1000)).0
    }

    /// Truncate to nanosecond precision and convert to a `SystemTime`.
    pub fn to_system_time(&self) -> Result<SystemTime> {
        let (secs, nanos) = div_mod_floor(&self.nanos(), &BigInt::from(NANOS_PER_SEC));
        match (secs.to_i64(), nanos.to_u32()) {
            (Some(s), Some(n)) => system_time(s, n),
            _ => Err(Error::overflow(self)),
        }
    }

    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::from_duration(d),
            Err(e) => Picoseconds(-Self::from_duration(e.duration()).0),
        }
    }

    /// Truncate to nanosecond precision and convert to a `Duration`.
    pub fn to_duration(&self) -> Result<Duration> {
        self.nanos()
            .to_u64()
            .map(Duration::from_nanos)
            .ok_or_else(|| Error::overflow(self))
    }

    pub fn from_duration(d: Duration) -> Self {
        Picoseconds(BigInt::from(d.as_nanos()) * 1000u32)
    }
}

impl fmt::Display for Picoseconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ps", self.0)
    }
}

impl Encode for Picoseconds {
    fn encode(&self, env: &mut Env<'_>) -> Result<Value> {
        let million = BigInt::from(1_000_000);
        let (usecs, psec) = div_mod_floor(&self.0, &million);
        let (secs, usec) = div_mod_floor(&usecs, &million);
        let low = &secs & BigInt::from(0xffff);
        let high = secs >> 16u32;
        let elems = [
            high.encode(env)?,
            low.encode(env)?,
            usec.encode(env)?,
            psec.encode(env)?,
        ];
        env.list(&elems)
    }
}

impl Decode for Picoseconds {
    /// Accepts an integer number of seconds, a float, `(HIGH . LOW)` and
    /// `(HIGH LOW USEC PSEC)` with optional trailing components.
    fn decode(env: &mut Env<'_>, value: Value) -> Result<Self> {
        let integerp = env.intern("integerp")?;
        let floatp = env.intern("floatp")?;
        if env.funcall(integerp, &[value]).map(|v| env.is_not_nil(v))? {
            let secs = env.big_int(value)?;
            return Ok(Picoseconds(secs * NANOS_PER_SEC * 1000i64));
        }
        if env.funcall(floatp, &[value]).map(|v| env.is_not_nil(v))? {
            let f = env.float(value)?;
            return BigInt::from_f64((f * 1e12).trunc())
                .map(Picoseconds)
                .ok_or_else(|| Error::overflow(f));
        }
        let (high, rest) = env.uncons(value)?;
        let high = env.big_int(high)?;
        if env.funcall(integerp, &[rest]).map(|v| env.is_not_nil(v))? {
            let low = env.big_int(rest)?;
            let zero = BigInt::from(0);
            return Ok(Self::from_quad(&high, &low, &zero, &zero));
        }
        let (low, rest) = env.uncons(rest)?;
        let low = env.big_int(low)?;
        let mut parts = [BigInt::from(0), BigInt::from(0)];
        let mut rest = rest;
        for part in parts.iter_mut() {
            let (car, cdr) = env.uncons(rest)?;
            if env.is_not_nil(car) {
                *part = env.big_int(car)?;
            }
            rest = cdr;
        }
        if env.is_not_nil(rest) {
            return Err(Error::wrong_type("timep", format!("{:?}", value)));
        }
        Ok(Self::from_quad(&high, &low, &parts[0], &parts[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picoseconds_truncate_to_nanos() {
        let ps = Picoseconds(BigInt::from(1_500_000_000_123_456i64));
        let t = ps.to_system_time().unwrap();
        let d = t.duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(d.as_secs(), 1500);
        assert_eq!(d.subsec_nanos(), 123);
    }

    #[test]
    fn test_picoseconds_negative_time() {
        let t = UNIX_EPOCH - Duration::from_millis(1500);
        let ps = Picoseconds::from_system_time(t);
        assert_eq!(ps.0, BigInt::from(-1_500_000_000_000i64));
        assert_eq!(ps.to_system_time().unwrap(), t);
    }

    #[test]
    fn test_picoseconds_duration_overflow() {
        let ps = Picoseconds(BigInt::from(u64::MAX) * 1000u32 + 1000u32);
        assert!(ps.to_duration().is_err());
        let ps = Picoseconds(BigInt::from(-1000));
        assert!(ps.to_duration().is_err());
    }

    #[test]
    fn test_picoseconds_quad() {
        let secs = BigInt::from(0x1_0002i64);
        let ps = Picoseconds::from_quad(
            &BigInt::from(1),
            &BigInt::from(2),
            &BigInt::from(3),
            &BigInt::from(4),
        );
        assert_eq!(ps.0, (secs * 1_000_000i64 + 3i64) * 1_000_000i64 + 4i64);
    }
}
