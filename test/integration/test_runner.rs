//! Test Runner for Integration Tests
//!
//! Loads a demo module into a sandbox host and drives calls through the
//! trampoline exactly as the runtime would.

use std::collections::HashMap;
use std::time::Instant;

use modbridge::host::sandbox::Sandbox;
use modbridge::{Datum, Decode, Encode, Env, Error, List, Module, Rest, Value};
use num_bigint::BigInt;

use super::test_cases::{Expected, TestCase};

/// Result of running a test
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub actual: Option<Datum>,
    pub error: Option<String>,
    pub run_time_us: u64,
}

/// The module every table case calls into.
pub fn demo_module() -> Module {
    let module = Module::new();
    let exports = [
        module.export("add", |a: i64, b: i64| a + b, "Add two integers."),
        module.export("echo-u8", |x: u8| x, ""),
        module.export("echo-u64", |x: u64| x, ""),
        module.export("negate-big", |x: BigInt| -x, "Negate any integer."),
        module.export("scale", |x: f64, n: i64| x * n as f64, ""),
        module.export("shout", |s: String| s.to_uppercase(), ""),
        module.export("byte-length", |b: modbridge::Bytes| b.0.len(), ""),
        module.export("or-zero", |x: Option<i64>| x.unwrap_or(0), ""),
        module.export("sum-list", |xs: List<i64>| xs.0.iter().sum::<i64>(), ""),
        module.export(
            "reverse-vector",
            |mut xs: Vec<f64>| {
                xs.reverse();
                xs
            },
            "",
        ),
        module.export(
            "sum-rest",
            |first: i64, rest: Rest<i64>| first + rest.iter().sum::<i64>(),
            "",
        ),
        module.export(
            "map-total",
            |m: HashMap<String, i64>| m.values().sum::<i64>(),
            "",
        ),
        module.export(
            "single-entry",
            |k: String, v: i64| HashMap::from([(k, v)]),
            "",
        ),
        module.export(
            "checked-div",
            |a: i64, b: i64| -> Result<i64, Error> {
                if b == 0 {
                    return Err(Error::other("division by zero"));
                }
                Ok(a / b)
            },
            "",
        ),
        module.export("explode", || -> i64 { panic!("boom") }, ""),
    ];
    for export in exports {
        if let Err(err) = export {
            panic!("demo module export failed: {}", err);
        }
    }
    module
}

/// Test runner owning one loaded module
pub struct TestRunner {
    sandbox: Sandbox,
}

impl TestRunner {
    /// Create a new test runner
    pub fn new() -> Self {
        let module = demo_module();
        let mut sandbox = Sandbox::with_trampoline(module.trampoline());
        if let Err(err) = sandbox.with_env(|env| module.init(env)) {
            panic!("demo module failed to load: {}", err);
        }
        Self { sandbox }
    }

    /// Run a single test case
    pub fn run_test(&mut self, test: &TestCase) -> TestResult {
        let start = Instant::now();
        let outcome = self.sandbox.with_env(|env| call(env, test));
        let run_time_us = start.elapsed().as_micros() as u64;

        let (actual, error) = match outcome {
            Ok(datum) => (Some(datum), None),
            Err(message) => (None, Some(message)),
        };
        let passed = match ((test.expected)(), &actual, &error) {
            (Expected::Value(want), Some(got), _) => &want == got,
            (Expected::Signal(prefix), None, Some(message)) => message.starts_with(prefix),
            _ => false,
        };

        TestResult {
            name: test.name.to_string(),
            passed,
            actual,
            error,
            run_time_us,
        }
    }

    /// Run all tests in a table
    pub fn run_all(&mut self, tests: &[TestCase]) -> Vec<TestResult> {
        tests.iter().map(|t| self.run_test(t)).collect()
    }

    /// Print a summary of test results
    pub fn print_summary(results: &[TestResult]) {
        let passed = results.iter().filter(|r| r.passed).count();
        println!("\n{}/{} cases passed", passed, results.len());
        for r in results.iter().filter(|r| !r.passed) {
            println!(
                "  FAIL {}: actual={:?} error={:?} ({}us)",
                r.name, r.actual, r.error, r.run_time_us
            );
        }
    }
}

/// Returns the decoded result, or the signal message.
fn call(env: &mut Env<'_>, test: &TestCase) -> Result<Datum, String> {
    let mut args: Vec<Value> = Vec::new();
    for datum in (test.args)() {
        args.push(datum.encode(env).map_err(|e| format!("encode: {}", e))?);
    }
    match env.call(test.function, &args) {
        Ok(v) => Datum::decode(env, v).map_err(|e| format!("decode: {}", e)),
        Err(Error::Signal(s)) => Err(s.message(env)),
        Err(other) => Err(format!("unexpected error: {}", other)),
    }
}
