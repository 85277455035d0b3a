#![forbid(unsafe_code)]

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::reminder::{NotificationHandle, NotificationRequest, NotificationService, PermissionStatus};
use crate::task::storage::KeyValueStore;

pub const OUTBOX_KEY: &str = "notification-outbox";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingNotification {
    pub handle: NotificationHandle,
    pub request: NotificationRequest,
}

/// Notification service that queues one-shot reminders in key-value storage
/// until something delivers them (`take_due`). Permission is a fixed answer,
/// normally taken from configuration.
#[derive(Debug, Clone)]
pub struct OutboxNotifier<S> {
    storage: S,
    permission: PermissionStatus,
}

impl<S: KeyValueStore> OutboxNotifier<S> {
    #[must_use]
    pub fn new(storage: S, permission: PermissionStatus) -> Self {
        Self {
            storage,
            permission,
        }
    }

    /// Pending reminders, soonest first.
    pub fn pending(&self) -> anyhow::Result<Vec<PendingNotification>> {
        let mut items = self.read()?;
        items.sort_by(|a, b| a.request.fire_at.cmp(&b.request.fire_at));
        Ok(items)
    }

    /// Removes and returns every reminder whose time has come.
    pub fn take_due(&self, now: OffsetDateTime) -> anyhow::Result<Vec<PendingNotification>> {
        let (mut due, rest): (Vec<_>, Vec<_>) = self
            .read()?
            .into_iter()
            .partition(|p| p.request.fire_at <= now);
        if due.is_empty() {
            return Ok(due);
        }
        self.write(&rest)?;
        due.sort_by(|a, b| a.request.fire_at.cmp(&b.request.fire_at));
        Ok(due)
    }

    fn read(&self) -> anyhow::Result<Vec<PendingNotification>> {
        let Some(raw) = self.storage.get(OUTBOX_KEY)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).with_context(|| format!("failed to parse '{OUTBOX_KEY}'"))
    }

    fn write(&self, items: &[PendingNotification]) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(items)?;
        self.storage.set(OUTBOX_KEY, &data)
    }
}

impl<S: KeyValueStore + Sync> NotificationService for OutboxNotifier<S> {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn schedule_one_shot(
        &self,
        request: &NotificationRequest,
    ) -> anyhow::Result<NotificationHandle> {
        let id: String = Uuid::new_v4().simple().to_string().chars().take(12).collect();
        let handle = NotificationHandle(format!("ntf-{id}"));
        let mut items = self.read()?;
        items.push(PendingNotification {
            handle: handle.clone(),
            request: request.clone(),
        });
        self.write(&items)?;
        Ok(handle)
    }

    async fn cancel(&self, handle: &NotificationHandle) -> anyhow::Result<()> {
        let mut items = self.read()?;
        let before = items.len();
        items.retain(|p| &p.handle != handle);
        if items.len() != before {
            self.write(&items)?;
        }
        Ok(())
    }
}
