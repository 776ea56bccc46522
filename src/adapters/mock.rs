//! Scripted transport for tests.
//!
//! Every written command is logged and answered from a set of prefix rules;
//! commands with no matching rule get a bare `ok`, which is enough for the
//! G-code acknowledge cycle. Failure injection covers the transport-error
//! paths without hardware.

use crate::adapters::Transport;
use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    open: bool,
    commands: Vec<String>,
    rules: Vec<(String, Vec<String>)>,
    pending: VecDeque<String>,
    fail_on: Option<String>,
}

/// Observer half of a [`MockTransport`], usable after the transport has been
/// moved into a motion link.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    /// All command lines written so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Reply to commands starting with `prefix` using `lines` instead of the
    /// default `ok`. The reply set must include its own `ok` terminator.
    pub fn respond_with<I, S>(&self, prefix: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .rules
            .push((prefix.to_string(), lines.into_iter().map(Into::into).collect()));
    }

    /// Make writes of commands starting with `prefix` fail like a broken
    /// transport.
    pub fn fail_on(&self, prefix: &str) {
        self.lock().fail_on = Some(prefix.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// In-memory [`Transport`] with scripted firmware replies.
pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> RigResult<()> {
        self.lock().open = true;
        Ok(())
    }

    async fn close(&mut self) -> RigResult<()> {
        self.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    async fn write_line(&mut self, line: &str) -> RigResult<()> {
        let mut shared = self.lock();
        if !shared.open {
            return Err(RigError::Connection("mock transport not open".to_string()));
        }
        if let Some(prefix) = &shared.fail_on {
            if line.starts_with(prefix.as_str()) {
                return Err(RigError::Connection(format!(
                    "injected write failure on '{line}'"
                )));
            }
        }
        shared.commands.push(line.to_string());

        let reply = shared
            .rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, lines)| lines.clone())
            .unwrap_or_else(|| vec!["ok".to_string()]);
        shared.pending.extend(reply);
        Ok(())
    }

    async fn read_line(&mut self) -> RigResult<String> {
        self.lock()
            .pending
            .pop_front()
            .ok_or_else(|| RigError::Connection("mock read timeout: no scripted reply".to_string()))
    }
}
