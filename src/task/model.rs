#![forbid(unsafe_code)]

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Repeat {
    Daily,
    Weekly,
    Monthly,
    #[default]
    #[serde(rename = "No repeat", alias = "NoRepeat")]
    NoRepeat,
}

impl Repeat {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
            Self::NoRepeat => "No repeat",
        }
    }
}

impl FromStr for Repeat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "none" | "no repeat" | "no-repeat" | "norepeat" => Ok(Self::NoRepeat),
            other => Err(format!(
                "expected daily|weekly|monthly|none, got '{other}'"
            )),
        }
    }
}

/// A single to-do item. Serialized with the camelCase field names of the
/// `task-storage` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default)]
    pub reminder: bool,
    /// Handle of the reminder currently scheduled for this task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
}

impl Task {
    #[must_use]
    pub fn new_id() -> String {
        let id = Uuid::new_v4().simple().to_string();
        id.chars().take(9).collect()
    }

    #[must_use]
    pub fn from_new(id: String, fields: NewTask) -> Self {
        Self {
            id,
            title: fields.title,
            description: fields.description,
            date: fields.date,
            time: fields.time,
            is_completed: false,
            repeat: fields.repeat,
            reminder: fields.reminder,
            notification_id: None,
        }
    }
}

/// Fields accepted by the store's create operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub date: OffsetDateTime,
    pub time: Option<String>,
    pub repeat: Repeat,
    pub reminder: bool,
}

impl NewTask {
    #[must_use]
    pub fn new(title: impl Into<String>, date: OffsetDateTime) -> Self {
        Self {
            title: title.into(),
            description: None,
            date,
            time: None,
            repeat: Repeat::NoRepeat,
            reminder: false,
        }
    }
}

/// Partial update. `None` leaves a field untouched; for optional fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub date: Option<OffsetDateTime>,
    pub time: Option<Option<String>>,
    pub repeat: Option<Repeat>,
    pub reminder: Option<bool>,
    pub notification_id: Option<Option<String>>,
}

impl TaskUpdate {
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(date) = self.date {
            task.date = date;
        }
        if let Some(time) = &self.time {
            task.time.clone_from(time);
        }
        if let Some(repeat) = self.repeat {
            task.repeat = repeat;
        }
        if let Some(reminder) = self.reminder {
            task.reminder = reminder;
        }
        if let Some(notification_id) = &self.notification_id {
            task.notification_id.clone_from(notification_id);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Completed,
    Incomplete,
}

impl StatusFilter {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Completed => "Completed",
            Self::Incomplete => "Incomplete",
        }
    }

    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Completed => task.is_completed,
            Self::Incomplete => !task.is_completed,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "completed" | "done" => Ok(Self::Completed),
            "incomplete" | "open" | "pending" => Ok(Self::Incomplete),
            other => Err(format!(
                "expected all|completed|incomplete, got '{other}'"
            )),
        }
    }
}

/// View predicate remembered by the store between runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Filter {
    pub status: StatusFilter,
}

impl Filter {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.matches(task)
    }
}

/// Display text cached in `Task::time`, e.g. `09:00 AM` or `21:30`.
#[must_use]
pub fn time_label(date: OffsetDateTime, clock_24h: bool) -> String {
    let formatted = if clock_24h {
        date.format(format_description!("[hour]:[minute]"))
    } else {
        date.format(format_description!(
            "[hour repr:12]:[minute] [period case:upper]"
        ))
    };
    formatted.unwrap_or_else(|_| "--:--".to_owned())
}
