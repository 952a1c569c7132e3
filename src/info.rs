//! Progress and diagnostic messages
//!
//! Every long-running operation reports what it is doing through an
//! [`InfoCallback`]. The CLI renders these messages, the server forwards
//! them to its clients, and the default sink writes them to `tracing`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Verbosity of an info message, from always-shown to debugging detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageLevel {
    /// Primary output, always shown
    Output,
    /// Progress information
    Info,
    /// Extra details (`-v`)
    Details,
    /// Every native call and external command (`-vv`)
    Trace,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageLevel::Output => "output",
            MessageLevel::Info => "info",
            MessageLevel::Details => "details",
            MessageLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Sink for info messages
pub type InfoCallback = Arc<dyn Fn(MessageLevel, &str) + Send + Sync>;

/// Callback that forwards every message to `tracing`
pub fn tracing_callback() -> InfoCallback {
    Arc::new(|level, msg| match level {
        MessageLevel::Output | MessageLevel::Info => tracing::info!("{}", msg),
        MessageLevel::Details => tracing::debug!("{}", msg),
        MessageLevel::Trace => tracing::trace!("{}", msg),
    })
}

/// Callback that drops every message
pub fn silent_callback() -> InfoCallback {
    Arc::new(|_, _| {})
}

/// Callback that feeds both `first` and `second`
pub fn tee(first: InfoCallback, second: InfoCallback) -> InfoCallback {
    Arc::new(move |level, msg| {
        first(level, msg);
        second(level, msg);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_levels_are_ordered_by_verbosity() {
        assert!(MessageLevel::Output < MessageLevel::Info);
        assert!(MessageLevel::Details < MessageLevel::Trace);
    }

    #[test]
    fn test_tee_feeds_both_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        let b = seen.clone();
        let cb = tee(
            Arc::new(move |l, m: &str| a.lock().push(format!("a:{}:{}", l, m))),
            Arc::new(move |l, m: &str| b.lock().push(format!("b:{}:{}", l, m))),
        );

        cb(MessageLevel::Trace, "x");

        assert_eq!(*seen.lock(), vec!["a:trace:x", "b:trace:x"]);
    }
}
