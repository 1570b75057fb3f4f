//! Per-execution state shared by the normalizer stages.
//!
//! One [`ExecutionContext`] exists per `execute` call and is dropped with its
//! stream. Nothing here is process-wide.

use std::collections::VecDeque;

use tracing::debug;

use super::events::ProviderMessage;

#[derive(Debug, Default)]
pub struct ExecutionContext {
    session_id: Option<String>,
    tool_counter: u64,
    /// Messages normalized before any session id was known.
    held: VecDeque<ProviderMessage>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Record a session id reported by the backend. The first non-empty id wins.
    pub fn capture_session(&mut self, id: &str) {
        if id.is_empty() || self.session_id.is_some() {
            return;
        }
        debug!(session_id = %id, "Captured backend session id");
        self.session_id = Some(id.to_string());
    }

    /// Fallback id for tool calls the backend did not label.
    pub fn next_tool_use_id(&mut self, prefix: &str) -> String {
        self.tool_counter += 1;
        format!("{}-tool-{}", prefix, self.tool_counter)
    }

    /// Reset the fallback tool-use counter.
    #[cfg(test)]
    pub fn reset_tool_counter(&mut self) {
        self.tool_counter = 0;
    }

    /// Accept a normalized message and return whatever is ready to yield.
    ///
    /// Messages without a session id are held until one is known, then
    /// released in order with the id backfilled.
    pub fn release(&mut self, message: ProviderMessage) -> Vec<ProviderMessage> {
        if let Some(id) = message.session_id() {
            let id = id.to_string();
            self.capture_session(&id);
        }

        match self.session_id.clone() {
            Some(id) => {
                let mut ready: Vec<ProviderMessage> = self.held.drain(..).collect();
                ready.push(message);
                for msg in ready.iter_mut() {
                    msg.backfill_session_id(&id);
                }
                ready
            }
            None => {
                self.held.push_back(message);
                Vec::new()
            }
        }
    }

    /// Release held messages if a session id has become known.
    pub fn release_held(&mut self) -> Vec<ProviderMessage> {
        if self.session_id.is_none() {
            return Vec::new();
        }
        self.flush()
    }

    /// Release held messages at stream end, backfilled if possible.
    pub fn flush(&mut self) -> Vec<ProviderMessage> {
        let mut ready: Vec<ProviderMessage> = self.held.drain(..).collect();
        if let Some(id) = &self.session_id {
            for msg in ready.iter_mut() {
                msg.backfill_session_id(id);
            }
        }
        ready
    }
}
