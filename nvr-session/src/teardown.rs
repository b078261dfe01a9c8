//! Best-effort teardown chains.
//!
//! Every release step runs even if an earlier one failed or panicked. A
//! failing step is logged and recorded; it never aborts the chain.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{trace, warn};

use crate::Result;

/// A step that failed during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: &'static str,
    pub error: String,
}

/// Summary of a finished teardown chain.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub steps: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs teardown steps one by one, capturing each step's failure.
pub struct Teardown {
    scope: &'static str,
    id: String,
    report: TeardownReport,
}

impl Teardown {
    pub fn new(scope: &'static str, id: impl Into<String>) -> Self {
        Self {
            scope,
            id: id.into(),
            report: TeardownReport::default(),
        }
    }

    /// Run one step. Returns whether it succeeded.
    pub fn run<F>(&mut self, step: &'static str, f: F) -> bool
    where
        F: FnOnce() -> Result<()>,
    {
        self.report.steps += 1;

        let error = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => {
                trace!(scope = self.scope, id = %self.id, step, "Teardown step done");
                return true;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        warn!(
            scope = self.scope,
            id = %self.id,
            step,
            error = %error,
            "Teardown step failed, continuing"
        );
        self.report.failures.push(TeardownFailure { step, error });
        false
    }

    pub fn finish(self) -> TeardownReport {
        self.report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_all_steps_run_after_failure() {
        let mut calls = Vec::new();
        let mut teardown = Teardown::new("stream", "s-1");

        assert!(!teardown.run("stop", || {
            calls.push("stop");
            Err(Error::engine("already stopped"))
        }));
        assert!(teardown.run("detach", || {
            calls.push("detach");
            Ok(())
        }));
        assert!(teardown.run("release", || {
            calls.push("release");
            Ok(())
        }));

        let report = teardown.finish();
        assert_eq!(calls, vec!["stop", "detach", "release"]);
        assert_eq!(report.steps, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "stop");
        assert!(report.failures[0].error.contains("already stopped"));
    }

    #[test]
    fn test_panicking_step_is_contained() {
        let mut teardown = Teardown::new("recording", "r-1");
        assert!(!teardown.run("finalize", || panic!("native crash")));
        assert!(teardown.run("release", || Ok(())));

        let report = teardown.finish();
        assert!(!report.is_clean());
        assert!(report.failures[0].error.contains("native crash"));
    }

    #[test]
    fn test_clean_report() {
        let mut teardown = Teardown::new("probe", "p-1");
        teardown.run("release", || Ok(()));
        assert!(teardown.finish().is_clean());
    }
}
