use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// One recorded event, as shown in a host's activity view.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActivityEntry {
    pub timestamp_ms: u64,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Structured fields other than `message`, in record order.
    pub fields: Vec<(String, String)>,
}

/// Bounded buffer of the most recent events.
pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    max_size: usize,
}

impl ActivityLog {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    pub fn push(&self, entry: ActivityEntry) {
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.entries();
        if entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries_snapshot(&self) -> Vec<ActivityEntry> {
        self.entries().iter().cloned().collect()
    }

    /// Entries carrying `fingerprint=<value>`.
    pub fn for_fingerprint(&self, fingerprint: &str) -> Vec<ActivityEntry> {
        self.entries()
            .iter()
            .filter(|entry| {
                entry
                    .fields
                    .iter()
                    .any(|(name, value)| name == "fingerprint" && value == fingerprint)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<ActivityEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Layer copying every event it sees into an [`ActivityLog`].
pub struct ActivityLogLayer {
    log: Arc<ActivityLog>,
}

impl ActivityLogLayer {
    pub fn new(log: Arc<ActivityLog>) -> Self {
        Self { log }
    }
}

impl<S> Layer<S> for ActivityLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.log.push(ActivityEntry {
            timestamp_ms,
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.fields
                .push((field.name().to_string(), format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. When `activity` is given,
/// events are also copied into that buffer.
pub fn init_logging(
    default_filter: &str,
    activity: Option<Arc<ActivityLog>>,
) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(activity.map(ActivityLogLayer::new))
        .try_init()?;
    Ok(())
}
