//! Leveled diagnostic sink used by the connection manager and the
//! transaction helpers.
//!
//! The default [`TracingObserver`] forwards events to `tracing`. A
//! [`MemoryObserver`] keeps events in memory so callers can assert on what
//! was reported.

use std::fmt;

use parking_lot::Mutex;

/// Severity of an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Structured key-value context attached to an event.
pub type Fields<'a> = &'a [(&'static str, &'a dyn fmt::Display)];

/// Receives leveled diagnostic events with structured context.
pub trait Observer: Send + Sync {
    fn event(&self, level: Level, message: &str, fields: Fields<'_>);

    fn info(&self, message: &str, fields: Fields<'_>) {
        self.event(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        self.event(Level::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: Fields<'_>) {
        self.event(Level::Error, message, fields);
    }
}

/// Forwards events to the `tracing` subscriber.
///
/// `host`, `port`, `database`, `attempt`, `attempts` and `error` become
/// tracing fields of the same name. Any other key is rendered as `key=value`
/// into a single `context` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn event(&self, level: Level, message: &str, fields: Fields<'_>) {
        let f = EventFields::split(fields);
        macro_rules! emit {
            ($event:ident) => {
                tracing::$event!(
                    host = f.host.as_deref(),
                    port = f.port.as_deref(),
                    database = f.database.as_deref(),
                    attempt = f.attempt.as_deref(),
                    attempts = f.attempts.as_deref(),
                    error = f.error.as_deref(),
                    context = f.context.as_deref(),
                    "{}",
                    message
                )
            };
        }
        match level {
            Level::Info => emit!(info),
            Level::Warn => emit!(warn),
            Level::Error => emit!(error),
        }
    }
}

/// Observer fields split into the keys emitted as tracing fields and the
/// rendered remainder.
#[derive(Debug, Default, PartialEq, Eq)]
struct EventFields {
    host: Option<String>,
    port: Option<String>,
    database: Option<String>,
    attempt: Option<String>,
    attempts: Option<String>,
    error: Option<String>,
    context: Option<String>,
}

impl EventFields {
    fn split(fields: Fields<'_>) -> Self {
        let mut split = Self::default();
        let mut rest = Vec::new();
        for (key, value) in fields {
            let slot = match *key {
                "host" => &mut split.host,
                "port" => &mut split.port,
                "database" => &mut split.database,
                "attempt" => &mut split.attempt,
                "attempts" => &mut split.attempts,
                "error" => &mut split.error,
                _ => {
                    rest.push(format!("{}={}", key, value));
                    continue;
                }
            };
            *slot = Some(value.to_string());
        }
        if !rest.is_empty() {
            split.context = Some(rest.join(" "));
        }
        split
    }
}

/// An event captured by [`MemoryObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl ObservedEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Observer for MemoryObserver {
    fn event(&self, level: Level, message: &str, fields: Fields<'_>) {
        let fields = fields
            .iter()
            .map(|(key, value)| (*key, value.to_string()))
            .collect();
        self.events.lock().push(ObservedEvent {
            level,
            message: message.to_string(),
            fields,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_memory_observer_records_levels() {
        let observer = MemoryObserver::new();
        assert!(observer.is_empty());

        observer.info("connected", &[("attempts", &3)]);
        observer.warn("slow", &[]);
        observer.error("failed", &[("error", &"boom")]);

        assert_eq!(observer.count(Level::Info), 1);
        assert_eq!(observer.count(Level::Warn), 1);
        assert_eq!(observer.count(Level::Error), 1);

        let events = observer.events();
        assert_eq!(events[0].field("attempts"), Some("3"));
        assert_eq!(events[2].field("error"), Some("boom"));
        assert_eq!(events[2].level.as_str(), "ERROR");
    }

    #[test]
    fn test_split_known_and_unknown_fields() {
        let split = EventFields::split(&[
            ("host", &"db.local"),
            ("port", &5432),
            ("pool", &"primary"),
            ("shard", &3),
        ]);
        assert_eq!(split.host.as_deref(), Some("db.local"));
        assert_eq!(split.port.as_deref(), Some("5432"));
        assert_eq!(split.error, None);
        assert_eq!(split.context.as_deref(), Some("pool=primary shard=3"));

        assert_eq!(EventFields::split(&[]), EventFields::default());
    }

    #[test]
    fn test_tracing_observer_without_subscriber() {
        // No subscriber installed; must not panic.
        TracingObserver.warn("rollback skipped", &[("error", &"tx is closed")]);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_observer_emits_structured_fields() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            TracingObserver.warn(
                "connection attempt failed",
                &[("attempt", &2), ("error", &"connection refused")],
            );
        });

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        let fields = &line["fields"];
        assert_eq!(line["level"], "WARN");
        assert_eq!(fields["message"], "connection attempt failed");
        assert_eq!(fields["attempt"], "2");
        assert_eq!(fields["error"], "connection refused");
        assert!(fields.get("host").is_none());
        assert!(fields.get("context").is_none());
    }
}
