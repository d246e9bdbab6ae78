pub mod test_cases;
pub mod test_runner;
