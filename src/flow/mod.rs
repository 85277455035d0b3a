#![forbid(unsafe_code)]

//! Save, delete and settings flows that sit between the front end and the
//! store. Input validation lives here; the store itself accepts anything.

use time::OffsetDateTime;

use crate::error::OnyxError;
use crate::reminder::{
    NotificationHandle, NotificationRequest, NotificationService, Notice, PermissionStatus,
    ReminderOutcome, ReminderScheduler,
};
use crate::task::model::{NewTask, Repeat, Task, TaskUpdate, time_label};
use crate::task::storage::KeyValueStore;
use crate::task::store::TaskStore;

/// Draft state of the create/edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskForm {
    pub title: String,
    pub description: String,
    pub date: OffsetDateTime,
    pub repeat: Repeat,
    pub reminder: bool,
}

impl TaskForm {
    #[must_use]
    pub fn new(date: OffsetDateTime) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            date,
            repeat: Repeat::NoRepeat,
            reminder: false,
        }
    }

    #[must_use]
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
            date: task.date,
            repeat: task.repeat,
            reminder: task.reminder,
        }
    }

    fn description(&self) -> Option<String> {
        if self.description.trim().is_empty() {
            None
        } else {
            Some(self.description.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub task: Task,
    pub created: bool,
    pub reminder: ReminderOutcome,
}

impl SaveReport {
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        self.reminder.notice()
    }
}

/// Creates a task (`editing == None`) or updates one, then runs the reminder
/// flow for it. Re-saving an existing task cancels its previous reminder.
pub async fn save_task<S, N>(
    store: &mut TaskStore<S>,
    scheduler: &mut ReminderScheduler<N>,
    editing: Option<&str>,
    form: TaskForm,
    clock_24h: bool,
    now: OffsetDateTime,
) -> Result<SaveReport, OnyxError>
where
    S: KeyValueStore,
    N: NotificationService,
{
    if form.title.trim().is_empty() {
        return Err(OnyxError::EmptyTitle);
    }

    // The cached label is wall-clock time in the caller's zone, taken from `now`.
    let time = Some(time_label(form.date.to_offset(now.offset()), clock_24h));
    let description = form.description();

    let (id, created) = if let Some(id) = editing {
        let previous = store
            .get(id)
            .cloned()
            .ok_or_else(|| OnyxError::TaskNotFound(id.to_owned()))?;
        if let Some(handle) = previous.notification_id.as_deref() {
            scheduler
                .cancel(&NotificationHandle(handle.to_owned()))
                .await;
        }
        store.update(
            id,
            &TaskUpdate {
                title: Some(form.title.clone()),
                description: Some(description.clone()),
                date: Some(form.date),
                time: Some(time),
                repeat: Some(form.repeat),
                reminder: Some(form.reminder),
                notification_id: Some(None),
            },
        );
        (id.to_owned(), false)
    } else {
        let task = store.create(NewTask {
            title: form.title.clone(),
            description: description.clone(),
            date: form.date,
            time,
            repeat: form.repeat,
            reminder: form.reminder,
        });
        (task.id, true)
    };

    let request = NotificationRequest {
        title: form.title,
        body: description.unwrap_or_default(),
        fire_at: form.date,
    };
    let reminder = scheduler
        .schedule_reminder(&request, form.reminder, store.notifications_enabled(), now)
        .await;
    if let Some(handle) = reminder.handle() {
        store.update(
            &id,
            &TaskUpdate {
                notification_id: Some(Some(handle.as_str().to_owned())),
                ..TaskUpdate::default()
            },
        );
    }

    let task = store
        .get(&id)
        .cloned()
        .ok_or_else(|| OnyxError::TaskNotFound(id.clone()))?;
    Ok(SaveReport {
        task,
        created,
        reminder,
    })
}

/// Deletes a task and cancels its pending reminder.
pub async fn delete_task<S, N>(
    store: &mut TaskStore<S>,
    scheduler: &ReminderScheduler<N>,
    id: &str,
) -> Option<Task>
where
    S: KeyValueStore,
    N: NotificationService,
{
    let removed = store.delete(id)?;
    cancel_reminder(scheduler, &removed).await;
    Some(removed)
}

/// Removes every task and every reminder tracked for them.
pub async fn clear_all<S, N>(store: &mut TaskStore<S>, scheduler: &ReminderScheduler<N>) -> Notice
where
    S: KeyValueStore,
    N: NotificationService,
{
    for task in store.clear_all() {
        cancel_reminder(scheduler, &task).await;
    }
    Notice::DataCleared
}

/// Settings toggle. Turning notifications on asks for permission; a denial
/// leaves them off and returns the notice to show.
pub async fn set_notifications<S, N>(
    store: &mut TaskStore<S>,
    scheduler: &mut ReminderScheduler<N>,
    enable: bool,
) -> Option<Notice>
where
    S: KeyValueStore,
    N: NotificationService,
{
    if !enable {
        store.set_notifications_enabled(false);
        return None;
    }
    match scheduler.request_permission().await {
        PermissionStatus::Granted => {
            store.set_notifications_enabled(true);
            None
        }
        PermissionStatus::Denied => {
            store.set_notifications_enabled(false);
            Some(Notice::PermissionRequired)
        }
    }
}

async fn cancel_reminder<N: NotificationService>(scheduler: &ReminderScheduler<N>, task: &Task) {
    if let Some(handle) = task.notification_id.as_deref() {
        scheduler
            .cancel(&NotificationHandle(handle.to_owned()))
            .await;
    }
}
