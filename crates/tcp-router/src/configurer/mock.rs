//! Configurer fakes for tests.

use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Script runner that counts runs and can be told to fail.
#[derive(Default)]
pub struct MockScriptRunner {
    fail: AtomicBool,
    runs: AtomicUsize,
}

impl MockScriptRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner whose every run exits non-zero.
    #[must_use]
    pub fn failing() -> Self {
        let runner = Self::default();
        runner.set_failing(true);
        runner
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn run_call_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptRunner for MockScriptRunner {
    async fn run(&self) -> Result<(), ScriptError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScriptError::NonZeroExit {
                path: "mock-reload".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "mock reload failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Configurer that records every table it is asked to apply.
#[derive(Default)]
pub struct MockConfigurer {
    fail: AtomicBool,
    tables: Mutex<Vec<RoutingTable>>,
}

impl MockConfigurer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn configure_call_count(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The most recently configured table.
    pub fn last_table(&self) -> Option<RoutingTable> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl Configurer for MockConfigurer {
    async fn configure(&self, table: &RoutingTable) -> Result<(), ConfigurerError> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(table.clone());

        if self.fail.load(Ordering::SeqCst) {
            return Err(ConfigurerError::Reload(ScriptError::Spawn {
                path: "mock-reload".to_string(),
                message: "mock configure failure".to_string(),
            }));
        }
        Ok(())
    }
}
