//! Runtime configuration for connections.

use std::time::Duration;

use testwire_core::frame::DEFAULT_MAX_FRAME_LEN;

const DEFAULT_OUTBOUND_QUEUE: usize = 256;
const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;
const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

fn parse_positive<T: std::str::FromStr + PartialOrd + Default>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
}

/// Knobs shared by every connection role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Largest inbound payload accepted before the connection is torn down.
    pub max_frame_len: usize,
    /// Depth of the outbound frame queue feeding the writer task.
    pub outbound_queue: usize,
    /// Buffer size of the in-memory duplex used by pipe servers.
    pub pipe_buffer: usize,
    /// How long the writer may spend flushing queued frames after a stop.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
        }
    }
}

impl ConnectionConfig {
    /// Defaults, overridden by `TESTWIRE_MAX_FRAME_LEN`, `TESTWIRE_OUTBOUND_QUEUE`,
    /// `TESTWIRE_PIPE_BUFFER` and `TESTWIRE_CLOSE_TIMEOUT_MS`.
    ///
    /// Unparsable or zero values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_frame_len: parse_positive(lookup("TESTWIRE_MAX_FRAME_LEN"))
                .unwrap_or(defaults.max_frame_len),
            outbound_queue: parse_positive(lookup("TESTWIRE_OUTBOUND_QUEUE"))
                .unwrap_or(defaults.outbound_queue),
            pipe_buffer: parse_positive(lookup("TESTWIRE_PIPE_BUFFER"))
                .unwrap_or(defaults.pipe_buffer),
            close_timeout: parse_positive(lookup("TESTWIRE_CLOSE_TIMEOUT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_timeout),
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_outbound_queue(mut self, outbound_queue: usize) -> Self {
        self.outbound_queue = outbound_queue.max(1);
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn outbound_queue_is_never_zero() {
        let config = ConnectionConfig::default().with_outbound_queue(0);
        assert_eq!(config.outbound_queue, 1);
    }

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_variables_keep_defaults() {
        assert_eq!(ConnectionConfig::from_lookup(|_| None), ConnectionConfig::default());
    }

    #[test]
    fn valid_variables_override_defaults() {
        let config = ConnectionConfig::from_lookup(lookup_from(&[
            ("TESTWIRE_MAX_FRAME_LEN", "1024"),
            ("TESTWIRE_OUTBOUND_QUEUE", " 8 "),
            ("TESTWIRE_PIPE_BUFFER", "4096"),
            ("TESTWIRE_CLOSE_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.max_frame_len, 1024);
        assert_eq!(config.outbound_queue, 8);
        assert_eq!(config.pipe_buffer, 4096);
        assert_eq!(config.close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_or_zero_variables_fall_back() {
        let defaults = ConnectionConfig::default();
        let config = ConnectionConfig::from_lookup(lookup_from(&[
            ("TESTWIRE_MAX_FRAME_LEN", "0"),
            ("TESTWIRE_OUTBOUND_QUEUE", "-3"),
            ("TESTWIRE_PIPE_BUFFER", "lots"),
            ("TESTWIRE_CLOSE_TIMEOUT_MS", ""),
        ]));
        assert_eq!(config, defaults);
    }
}
