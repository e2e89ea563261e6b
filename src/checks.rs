use std::fmt::Display;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Named pass/fail outcomes, recorded without aborting on the first failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checks {
    results: Vec<CheckResult>,
}

impl Checks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, name: impl Into<String>, passed: bool) -> bool {
        let name = name.into();

        if passed {
            debug!(check = %name, "check passed");
        } else {
            warn!(check = %name, "check failed");
        }

        self.results.push(CheckResult { name, passed });

        passed
    }

    #[must_use]
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    #[must_use]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|result| result.passed).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|result| !result.passed)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|result| result.name == name)
    }
}

impl Display for Checks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for result in &self.results {
            let mark = if result.passed { "✓" } else { "✗" };

            writeln!(f, "{mark} {}", result.name)?;
        }

        write!(f, "checks: {} passed, {} failed", self.passed(), self.failed())
    }
}
