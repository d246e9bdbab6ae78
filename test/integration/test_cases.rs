//! Test Case Definitions
//!
//! Each case calls one function of the demo module with host arguments and
//! states what the host should see afterwards.

use modbridge::Datum;
use num_bigint::BigInt;

/// What a call is expected to produce.
#[derive(Debug, Clone)]
pub enum Expected {
    /// The call returns this value.
    Value(Datum),
    /// The call signals; the message starts with this text.
    Signal(&'static str),
}

/// A single call through the module boundary
#[derive(Debug, Clone)]
pub struct TestCase {
    /// Name of the test
    pub name: &'static str,
    /// Lisp name of the function to call
    pub function: &'static str,
    /// Builds the arguments
    pub args: fn() -> Vec<Datum>,
    /// Builds the expected outcome
    pub expected: fn() -> Expected,
    /// Description of what the test verifies
    #[allow(dead_code)]
    pub description: &'static str,
}

impl TestCase {
    pub const fn new(
        name: &'static str,
        function: &'static str,
        args: fn() -> Vec<Datum>,
        expected: fn() -> Expected,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            function,
            args,
            expected,
            description,
        }
    }
}

fn big(s: &str) -> BigInt {
    s.parse().unwrap_or_default()
}

fn text(s: &str) -> Datum {
    Datum::Str(s.to_string())
}

// ============================================================================
// Scalar conversions
// ============================================================================

pub static TEST_CASES: &[TestCase] = &[
    TestCase::new(
        "add_small",
        "add",
        || vec![Datum::Int(2), Datum::Int(40)],
        || Expected::Value(Datum::Int(42)),
        "Two fixnums in, one fixnum out",
    ),
    TestCase::new(
        "add_wrong_type",
        "add",
        || vec![text("2"), Datum::Int(40)],
        || Expected::Signal("Wrong type argument: integerp"),
        "A string where an integer is expected signals wrong-type-argument",
    ),
    TestCase::new(
        "add_arity",
        "add",
        || vec![Datum::Int(1)],
        || Expected::Signal("Wrong number of arguments"),
        "Missing arguments are caught by the host",
    ),
    TestCase::new(
        "narrow_overflow",
        "echo-u8",
        || vec![Datum::Int(256)],
        || Expected::Signal("Arithmetic overflow error"),
        "Integers outside the parameter type signal overflow-error",
    ),
    TestCase::new(
        "bigint_round_trip",
        "negate-big",
        || vec![Datum::Big(big("123456789012345678901234567890"))],
        || Expected::Value(Datum::Big(big("-123456789012345678901234567890"))),
        "Bignums survive both directions",
    ),
    TestCase::new(
        "bigint_shrinks_to_fixnum",
        "negate-big",
        || vec![Datum::Int(-7)],
        || Expected::Value(Datum::Int(7)),
        "Small results come back as fixnums",
    ),
    TestCase::new(
        "u64_max",
        "echo-u64",
        || vec![Datum::int(u64::MAX)],
        || Expected::Value(Datum::int(u64::MAX)),
        "The full unsigned range is representable",
    ),
    TestCase::new(
        "float_scale",
        "scale",
        || vec![Datum::Float(1.5), Datum::Int(4)],
        || Expected::Value(Datum::Float(6.0)),
        "Floats and integers mix in one signature",
    ),
    TestCase::new(
        "shout",
        "shout",
        || vec![text("héllo")],
        || Expected::Value(text("HÉLLO")),
        "Multibyte strings are UTF-8 on the native side",
    ),
    TestCase::new(
        "unibyte_length",
        "byte-length",
        || vec![Datum::Bytes(vec![0xff, 0x00, 0x80])],
        || Expected::Value(Datum::Int(3)),
        "Raw bytes are accepted without UTF-8 validation",
    ),
    TestCase::new(
        "invalid_utf8",
        "shout",
        || vec![Datum::Bytes(vec![0xff])],
        || Expected::Signal("Wrong type argument: utf-8-string-p"),
        "A unibyte string is not a valid String argument",
    ),
    TestCase::new(
        "optional_nil",
        "or-zero",
        || vec![Datum::Nil],
        || Expected::Value(Datum::Int(0)),
        "nil decodes to None",
    ),
];

// ============================================================================
// Sequences and maps
// ============================================================================

pub static COLLECTION_TEST_CASES: &[TestCase] = &[
    TestCase::new(
        "sum_list",
        "sum-list",
        || vec![Datum::List(vec![Datum::Int(1), Datum::Int(2), Datum::Int(3)])],
        || Expected::Value(Datum::Int(6)),
        "Proper lists decode element by element",
    ),
    TestCase::new(
        "sum_list_rejects_vector",
        "sum-list",
        || vec![Datum::Seq(vec![Datum::Int(1)])],
        || Expected::Signal("Wrong type argument: listp"),
        "A vector is not a list",
    ),
    TestCase::new(
        "reverse_vector",
        "reverse-vector",
        || vec![Datum::Seq(vec![Datum::Float(1.0), Datum::Float(2.5)])],
        || Expected::Value(Datum::Seq(vec![Datum::Float(2.5), Datum::Float(1.0)])),
        "Vec maps to a host vector",
    ),
    TestCase::new(
        "sum_rest",
        "sum-rest",
        || vec![Datum::Int(1), Datum::Int(2), Datum::Int(3), Datum::Int(4)],
        || Expected::Value(Datum::Int(10)),
        "Trailing arguments collect into the rest parameter",
    ),
    TestCase::new(
        "sum_rest_empty",
        "sum-rest",
        || vec![Datum::Int(5)],
        || Expected::Value(Datum::Int(5)),
        "The rest parameter may be empty",
    ),
    TestCase::new(
        "map_total",
        "map-total",
        || {
            vec![Datum::Map(vec![
                (text("a"), Datum::Int(1)),
                (text("b"), Datum::Int(2)),
            ])]
        },
        || Expected::Value(Datum::Int(3)),
        "Hash tables decode into HashMap",
    ),
    TestCase::new(
        "map_build",
        "single-entry",
        || vec![text("k"), Datum::Int(9)],
        || Expected::Value(Datum::Map(vec![(text("k"), Datum::Int(9))])),
        "HashMap results become host hash tables",
    ),
];

// ============================================================================
// Errors
// ============================================================================

pub static ERROR_TEST_CASES: &[TestCase] = &[
    TestCase::new(
        "checked_div",
        "checked-div",
        || vec![Datum::Int(9), Datum::Int(3)],
        || Expected::Value(Datum::Int(3)),
        "Ok results are returned",
    ),
    TestCase::new(
        "checked_div_by_zero",
        "checked-div",
        || vec![Datum::Int(1), Datum::Int(0)],
        || Expected::Signal("Generic native error: \"division by zero\""),
        "Err results signal the module's error condition",
    ),
    TestCase::new(
        "panic",
        "explode",
        Vec::new,
        || Expected::Signal("Panic while running module function: \"boom\""),
        "Panics are caught and signalled",
    ),
    TestCase::new(
        "after_panic",
        "add",
        || vec![Datum::Int(1), Datum::Int(1)],
        || Expected::Value(Datum::Int(2)),
        "The module keeps working after a panic",
    ),
];
