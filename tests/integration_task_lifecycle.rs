use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use onyx::flow::{self, TaskForm};
use onyx::reminder::outbox::{OUTBOX_KEY, OutboxNotifier};
use onyx::reminder::{Notice, PermissionStatus, ReminderOutcome, ReminderScheduler};
use onyx::task::model::{Filter, StatusFilter};
use onyx::task::storage::{FileStore, KeyValueStore as _};
use onyx::task::store::{DEFAULT_STORAGE_KEY, TaskStore};

const NOW: OffsetDateTime = datetime!(2024-11-27 18:30 UTC);

fn open(
    dir: &std::path::Path,
    permission: PermissionStatus,
) -> (
    TaskStore<FileStore>,
    ReminderScheduler<OutboxNotifier<FileStore>>,
) {
    let files = FileStore::new(dir.to_path_buf());
    (
        TaskStore::load(files.clone()),
        ReminderScheduler::new(OutboxNotifier::new(files, permission)),
    )
}

fn form(title: &str, date: OffsetDateTime, reminder: bool) -> TaskForm {
    TaskForm {
        title: title.to_owned(),
        reminder,
        ..TaskForm::new(date)
    }
}

#[tokio::test]
async fn tasks_and_reminders_survive_restart() {
    let td = tempfile::tempdir().expect("tempdir");
    let tomorrow_nine = datetime!(2024-11-28 09:00 UTC);

    let id = {
        let (mut store, mut scheduler) = open(td.path(), PermissionStatus::Granted);
        let report = flow::save_task(
            &mut store,
            &mut scheduler,
            None,
            form("Buy milk", tomorrow_nine, true),
            false,
            NOW,
        )
        .await
        .expect("save");
        assert!(matches!(report.reminder, ReminderOutcome::Scheduled(_)));
        store.toggle_completion(&report.task.id);
        report.task.id
    };

    let (store, scheduler) = open(td.path(), PermissionStatus::Granted);
    let task = store.get(&id).expect("task rehydrated");
    assert!(task.is_completed);
    assert_eq!(task.date, tomorrow_nine);

    let pending = scheduler.service().pending().expect("outbox");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.fire_at, tomorrow_nine);
    assert_eq!(task.notification_id.as_deref(), Some(pending[0].handle.as_str()));
}

#[tokio::test]
async fn snapshot_on_disk_uses_camel_case_layout() {
    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, mut scheduler) = open(td.path(), PermissionStatus::Granted);
    flow::save_task(
        &mut store,
        &mut scheduler,
        None,
        form("Stretch", NOW + Duration::hours(1), false),
        true,
        NOW,
    )
    .await
    .expect("save");
    store.set_filter(Filter {
        status: StatusFilter::Incomplete,
    });

    let raw = std::fs::read_to_string(td.path().join("task-storage.json")).expect("snapshot");
    let v: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(v["notificationsEnabled"], serde_json::json!(true));
    assert_eq!(v["filter"]["status"], serde_json::json!("Incomplete"));
    assert_eq!(v["tasks"][0]["title"], serde_json::json!("Stretch"));
    assert_eq!(v["tasks"][0]["isCompleted"], serde_json::json!(false));
    assert_eq!(v["tasks"][0]["time"], serde_json::json!("19:30"));
}

#[tokio::test]
async fn clearing_data_empties_tasks_and_outbox() {
    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, mut scheduler) = open(td.path(), PermissionStatus::Granted);
    for (i, title) in ["a", "b", "c"].into_iter().enumerate() {
        let hours = i64::try_from(i).expect("small") + 1;
        flow::save_task(
            &mut store,
            &mut scheduler,
            None,
            form(title, NOW + Duration::hours(hours), true),
            false,
            NOW,
        )
        .await
        .expect("save");
    }
    assert_eq!(scheduler.service().pending().expect("outbox").len(), 3);

    let notice = flow::clear_all(&mut store, &scheduler).await;
    assert_eq!(notice, Notice::DataCleared);

    let (store, scheduler) = open(td.path(), PermissionStatus::Granted);
    assert!(store.tasks().is_empty());
    assert!(scheduler.service().pending().expect("outbox").is_empty());
}

#[tokio::test]
async fn denied_permission_keeps_notifications_off() {
    let td = tempfile::tempdir().expect("tempdir");
    let (mut store, mut scheduler) = open(td.path(), PermissionStatus::Denied);

    let notice = flow::set_notifications(&mut store, &mut scheduler, true).await;
    assert_eq!(notice, Some(Notice::PermissionRequired));

    let report = flow::save_task(
        &mut store,
        &mut scheduler,
        None,
        form("Dentist", NOW + Duration::days(2), true),
        false,
        NOW,
    )
    .await
    .expect("save");
    assert_eq!(report.reminder, ReminderOutcome::NotificationsDisabled);

    let files = FileStore::new(td.path().to_path_buf());
    assert_eq!(files.get(OUTBOX_KEY).expect("read"), None);
    assert!(files.get(DEFAULT_STORAGE_KEY).expect("read").is_some());
    assert!(!TaskStore::load(files).notifications_enabled());
}
