//! Error sink used by the background tasks.
//!
//! The push reporter and the standalone metrics listener have nobody to return
//! errors to, so they hand them to a [`Logger`]. The default writes through
//! `tracing` under the `prom` target.

use std::sync::Arc;

pub trait Logger: Send + Sync {
    fn error(&self, message: &str);
}

/// Default logger backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "prom", "{}", message);
    }
}

pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Logger;
    use parking_lot::Mutex;

    /// Captures every message so tests can assert on failures.
    #[derive(Default)]
    pub struct RecordingLogger {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingLogger {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().clone()
        }

        pub fn count(&self) -> usize {
            self.messages.lock().len()
        }
    }

    impl Logger for RecordingLogger {
        fn error(&self, message: &str) {
            self.messages.lock().push(message.to_string());
        }
    }
}
