#![forbid(unsafe_code)]

pub mod outbox;

use std::future::Future;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub fire_at: OffsetDateTime,
}

/// Identifier handed out by a notification service for a scheduled reminder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NotificationHandle(pub String);

impl NotificationHandle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform notification adapters implement this.
pub trait NotificationService {
    fn request_permission(&self) -> impl Future<Output = PermissionStatus> + Send;

    fn schedule_one_shot(
        &self,
        request: &NotificationRequest,
    ) -> impl Future<Output = anyhow::Result<NotificationHandle>> + Send;

    fn cancel(&self, handle: &NotificationHandle) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// A message the front end should show the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    NotificationsDisabled,
    PermissionRequired,
    DataCleared,
}

impl Notice {
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::NotificationsDisabled => "Notifications Disabled",
            Self::PermissionRequired => "Permission Required",
            Self::DataCleared => "Success",
        }
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::NotificationsDisabled => {
                "Please enable notifications in settings to receive reminders."
            }
            Self::PermissionRequired => {
                "Please enable notifications in your device settings to receive reminders."
            }
            Self::DataCleared => "All data has been cleared.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// The task does not ask for a reminder.
    NotRequested,
    NotificationsDisabled,
    /// The target time is not in the future; past reminders are dropped.
    PastDue,
    PermissionDenied,
    Scheduled(NotificationHandle),
    Failed(String),
}

impl ReminderOutcome {
    #[must_use]
    pub fn handle(&self) -> Option<&NotificationHandle> {
        match self {
            Self::Scheduled(h) => Some(h),
            _ => None,
        }
    }

    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        match self {
            Self::NotificationsDisabled => Some(Notice::NotificationsDisabled),
            Self::PermissionDenied => Some(Notice::PermissionRequired),
            _ => None,
        }
    }
}

/// Turns a reminder intent into at most one scheduled notification.
#[derive(Debug)]
pub struct ReminderScheduler<N> {
    service: N,
    granted: bool,
}

impl<N: NotificationService> ReminderScheduler<N> {
    #[must_use]
    pub fn new(service: N) -> Self {
        Self {
            service,
            granted: false,
        }
    }

    #[must_use]
    pub fn service(&self) -> &N {
        &self.service
    }

    /// Asks the service unless permission was already granted in this
    /// process. Denials are not cached.
    pub async fn request_permission(&mut self) -> PermissionStatus {
        if self.granted {
            return PermissionStatus::Granted;
        }
        let status = self.service.request_permission().await;
        self.granted = status == PermissionStatus::Granted;
        status
    }

    pub async fn schedule_reminder(
        &mut self,
        request: &NotificationRequest,
        reminder_enabled: bool,
        notifications_enabled: bool,
        now: OffsetDateTime,
    ) -> ReminderOutcome {
        if !reminder_enabled {
            return ReminderOutcome::NotRequested;
        }
        if !notifications_enabled {
            return ReminderOutcome::NotificationsDisabled;
        }
        if request.fire_at <= now {
            tracing::debug!(fire_at = %request.fire_at, "reminder time already passed; not scheduling");
            return ReminderOutcome::PastDue;
        }
        if self.request_permission().await == PermissionStatus::Denied {
            return ReminderOutcome::PermissionDenied;
        }

        match self.service.schedule_one_shot(request).await {
            Ok(handle) => {
                tracing::info!(handle = %handle, fire_at = %request.fire_at, "reminder scheduled");
                ReminderOutcome::Scheduled(handle)
            }
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::warn!(error = %msg, "failed to schedule reminder");
                ReminderOutcome::Failed(msg)
            }
        }
    }

    /// Best-effort: failures are logged, never returned.
    pub async fn cancel(&self, handle: &NotificationHandle) {
        match self.service.cancel(handle).await {
            Ok(()) => tracing::info!(handle = %handle, "reminder cancelled"),
            Err(e) => {
                tracing::warn!(handle = %handle, error = %format!("{e:#}"), "failed to cancel reminder");
            }
        }
    }
}
