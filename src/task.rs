//! Schedulable units of work

use crate::frequency::{truncate_to_minute, Frequency};
use crate::store::TaskStore;
use crate::types::{FrequencyError, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures reported by [`Task::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    /// The task type is empty
    #[error("the task type is required")]
    MissingType,

    /// Neither a planned timestamp nor a frequency is set
    #[error("a planned timestamp or a frequency is required")]
    MissingSchedule,

    /// The planned timestamp lies before the current minute
    #[error("the planned timestamp {0} is in the past")]
    PlannedInPast(DateTime<Utc>),
}

/// A schedulable unit of work.
///
/// A task is pure data: a type string identifying the
/// [`Executor`](crate::Executor) responsible for it, an optional planned
/// timestamp, and an optional recurrence [`Frequency`]. Identity is assigned
/// by the [`TaskStore`] on insertion; a freshly built task carries no id.
///
/// The `busy` flag marks a task whose execution is in flight so it is not
/// picked up twice. It belongs to the store's bookkeeping and does not
/// participate in equality.
///
/// ```
/// use taskwheel::{Frequency, Task};
///
/// let task = Task::new()
///     .with_type("backup")
///     .with_frequency(Frequency::daily());
/// assert!(task.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    id: Option<i64>,
    task_type: String,
    planned: Option<DateTime<Utc>>,
    frequency: Option<Frequency>,
    busy: bool,
}

impl Task {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task type that selects the responsible executor.
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Set the planned timestamp, truncated to the whole minute.
    pub fn with_planned(mut self, planned: DateTime<Utc>) -> Self {
        self.planned = Some(truncate_to_minute(planned));
        self
    }

    /// Set the recurrence rule.
    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Parse and set the recurrence rule from a crontab-style string.
    pub fn with_frequency_spec(mut self, specification: &str) -> Result<Self, FrequencyError> {
        self.frequency = Some(Frequency::parse(specification)?);
        Ok(self)
    }

    /// Set the store-assigned identity. Intended for [`TaskStore`]
    /// implementations.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn planned(&self) -> Option<DateTime<Utc>> {
        self.planned
    }

    pub fn frequency(&self) -> Option<&Frequency> {
        self.frequency.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Flip the in-flight marker. Intended for [`TaskStore`] implementations.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Check that the task is complete enough to schedule.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.task_type.is_empty() {
            return Err(TaskValidationError::MissingType);
        }
        if self.planned.is_none() && self.frequency.is_none() {
            return Err(TaskValidationError::MissingSchedule);
        }
        if let Some(planned) = self.planned {
            if planned < truncate_to_minute(Utc::now()) {
                return Err(TaskValidationError::PlannedInPast(planned));
            }
        }
        Ok(())
    }

    /// The next occurrence after the current minute, or `None` when the task
    /// has no frequency or its planned timestamp is still in the future.
    pub fn next_timestamp(&self) -> Result<Option<DateTime<Utc>>, FrequencyError> {
        let now = truncate_to_minute(Utc::now());
        if let Some(planned) = self.planned {
            if planned > now {
                return Ok(None);
            }
        }
        self.next_timestamp_after(now)
    }

    /// The next occurrence strictly after `start`, or `None` without a
    /// frequency.
    pub fn next_timestamp_after(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, FrequencyError> {
        match &self.frequency {
            Some(frequency) => frequency.next_timestamp(start).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve a named option for this task through the store.
    ///
    /// Fails with [`StoreError::UnsavedTask`] when the task has no identity
    /// yet.
    pub async fn option_value(
        &self,
        store: &dyn TaskStore,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let id = self.id.ok_or(StoreError::UnsavedTask)?;
        store.task_option(id, name).await
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.task_type == other.task_type
            && self.planned == other.planned
            && self.frequency == other.frequency
    }
}

impl Eq for Task {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn planned_timestamps_are_truncated_to_the_minute() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 42).unwrap();
        let task = Task::new().with_type("report").with_planned(ts);
        let planned = task.planned().unwrap();
        assert_eq!(planned.second(), 0);
        assert_eq!(planned, Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn validation() {
        assert_eq!(Task::new().validate(), Err(TaskValidationError::MissingType));
        assert_eq!(
            Task::new().with_type("report").validate(),
            Err(TaskValidationError::MissingSchedule)
        );

        let past = Utc::now() - Duration::hours(2);
        assert!(matches!(
            Task::new().with_type("report").with_planned(past).validate(),
            Err(TaskValidationError::PlannedInPast(_))
        ));

        let future = Utc::now() + Duration::hours(2);
        assert!(Task::new().with_type("report").with_planned(future).validate().is_ok());
        assert!(Task::new()
            .with_type("report")
            .with_frequency(Frequency::hourly())
            .validate()
            .is_ok());
    }

    #[test]
    fn equality_ignores_the_busy_flag() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let a = Task::new().with_type("report").with_planned(ts).with_id(7);
        let mut b = a.clone();
        b.set_busy(true);
        assert_eq!(a, b);

        let c = a.clone().with_type("cleanup");
        assert_ne!(a, c);
    }

    #[test]
    fn next_timestamp_without_frequency_is_none() {
        let task = Task::new().with_type("report").with_planned(Utc::now());
        assert_eq!(task.next_timestamp().unwrap(), None);
    }

    #[test]
    fn next_timestamp_defers_to_a_future_planned_timestamp() {
        let task = Task::new()
            .with_type("report")
            .with_planned(Utc::now() + Duration::hours(1))
            .with_frequency(Frequency::minutely());
        assert_eq!(task.next_timestamp().unwrap(), None);
    }

    #[test]
    fn next_timestamp_follows_the_frequency_once_due() {
        let task = Task::new()
            .with_type("report")
            .with_planned(Utc::now() - Duration::minutes(5))
            .with_frequency(Frequency::minutely());
        let next = task.next_timestamp().unwrap().unwrap();
        assert!(next > Utc::now() - Duration::minutes(1));
    }

    #[test]
    fn next_timestamp_after_delegates_to_the_frequency() {
        let task = Task::new()
            .with_type("report")
            .with_frequency(Frequency::parse("0 12 * * *").unwrap());
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();
        assert_eq!(
            task.next_timestamp_after(start).unwrap(),
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn serde_round_trip() {
        let task = Task::new()
            .with_type("report")
            .with_planned(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap())
            .with_frequency(Frequency::daily())
            .with_id(3);
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"0 0 * * *\""));
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
