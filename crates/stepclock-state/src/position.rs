//! Persisted clock position - the last minute the hands are known to show

use stepclock_core::{MinuteOfDay, StepClockError, StepClockResult};

use crate::RecordStore;

/// How the position was obtained at load time
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Parsed from an existing record
    Restored,
    /// No record existed; initialized from the current time
    Initialized,
    /// Record was unreadable or unparseable; reset to 00:00
    Reset(StepClockError),
}

/// Result of loading the position
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PositionLoad {
    pub position: MinuteOfDay,
    pub origin: LoadOrigin,
}

/// Parse a stored record.
///
/// Accepts `HH:MM` or the legacy `YYYY-MM-DD HH:MM`; the date is ignored.
/// Only the first line is considered.
pub fn parse_record(record: &str) -> Option<MinuteOfDay> {
    let line = record.lines().next()?.trim();
    let mut fields = line.split_whitespace();
    let first = fields.next()?;

    match (fields.next(), fields.next()) {
        (None, _) => first.parse().ok(),
        (Some(time), None) if is_legacy_date(first) => time.parse().ok(),
        _ => None,
    }
}

fn is_legacy_date(field: &str) -> bool {
    let parts: Vec<&str> = field.split('-').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Format a position as a record (`HH:MM` plus newline)
pub fn format_record(position: MinuteOfDay) -> String {
    format!("{}\n", position)
}

/// Durable store of the clock position
pub struct PersistedPosition {
    store: Box<dyn RecordStore>,
}

impl PersistedPosition {
    pub fn new(store: Box<dyn RecordStore>) -> Self {
        PersistedPosition { store }
    }

    /// Load the position, healing the record when needed.
    ///
    /// `now` is used when no record exists yet. This never fails: a broken
    /// record is reset to 00:00 and rewritten.
    pub fn load(&mut self, now: MinuteOfDay) -> PositionLoad {
        let content = match self.store.read() {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::warn!(position = %now, "no persisted position, initializing from current time");
                self.rewrite(now);
                return PositionLoad {
                    position: now,
                    origin: LoadOrigin::Initialized,
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read persisted position, resetting to 00:00");
                return self.reset(e);
            }
        };

        match parse_record(&content) {
            Some(position) => PositionLoad {
                position,
                origin: LoadOrigin::Restored,
            },
            None => {
                let err = StepClockError::CorruptPersistedState(content.trim().to_string());
                tracing::error!(error = %err, "invalid persisted position, resetting to 00:00");
                self.reset(err)
            }
        }
    }

    /// Overwrite the stored position
    pub fn save(&mut self, position: MinuteOfDay) -> StepClockResult<()> {
        self.store.write(&format_record(position))
    }

    fn reset(&mut self, cause: StepClockError) -> PositionLoad {
        self.rewrite(MinuteOfDay::MIDNIGHT);
        PositionLoad {
            position: MinuteOfDay::MIDNIGHT,
            origin: LoadOrigin::Reset(cause),
        }
    }

    fn rewrite(&mut self, position: MinuteOfDay) {
        if let Err(e) = self.save(position) {
            tracing::warn!(error = %e, "could not write persisted position");
        }
    }
}
