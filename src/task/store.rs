#![forbid(unsafe_code)]

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::task::model::{Filter, NewTask, Task, TaskUpdate};
use crate::task::storage::KeyValueStore;

pub const DEFAULT_STORAGE_KEY: &str = "task-storage";

/// Everything the store persists under its storage key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub filter: Filter,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            notifications_enabled: default_notifications_enabled(),
            filter: Filter::default(),
        }
    }
}

fn default_notifications_enabled() -> bool {
    true
}

/// The persisted task collection plus the global notification gate and the
/// active filter.
///
/// Every mutation builds a replacement collection and then writes the whole
/// snapshot back to storage before returning. Operations that reference an
/// unknown id are no-ops and do not write.
#[derive(Debug)]
pub struct TaskStore<S> {
    storage: S,
    key: String,
    state: Snapshot,
}

impl<S: KeyValueStore> TaskStore<S> {
    /// Rehydrates from `storage`. A missing or unreadable snapshot yields an
    /// empty store with notifications enabled.
    pub fn load(storage: S) -> Self {
        Self::load_with_key(storage, DEFAULT_STORAGE_KEY)
    }

    /// Like [`TaskStore::load`], under a custom key. An unparsable snapshot is
    /// copied to `<key>.corrupt` before the empty state replaces it.
    pub fn load_with_key(storage: S, key: impl Into<String>) -> Self {
        let key = key.into();
        let state = match read_snapshot(&storage, &key) {
            Ok(Some(state)) => state,
            Ok(None) => Snapshot::default(),
            Err(e) => {
                tracing::warn!(key = %key, error = %format!("{e:#}"), "discarding unreadable task snapshot");
                Snapshot::default()
            }
        };
        tracing::debug!(key = %key, tasks = state.tasks.len(), "task store loaded");
        Self {
            storage,
            key,
            state,
        }
    }

    /// Re-reads the snapshot so that writes made by another process since
    /// loading are not clobbered by the next mutation. If the stored snapshot
    /// cannot be read the in-memory state is kept.
    pub fn reload(&mut self) {
        match read_snapshot(&self.storage, &self.key) {
            Ok(Some(state)) => self.state = state,
            Ok(None) => self.state = Snapshot::default(),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %format!("{e:#}"), "keeping in-memory task state, reload failed");
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let data = serde_json::to_string(&self.state)?;
        self.storage
            .set(&self.key, &data)
            .with_context(|| format!("failed to persist '{}'", self.key))?;
        tracing::debug!(key = %self.key, tasks = self.state.tasks.len(), "task snapshot persisted");
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.state
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.state.tasks
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.state.tasks.iter().find(|t| t.id == id)
    }

    /// Tasks passing the stored filter, in insertion order.
    pub fn visible_tasks(&self) -> impl Iterator<Item = &Task> {
        let filter = self.state.filter;
        self.state.tasks.iter().filter(move |t| filter.matches(t))
    }

    pub fn create(&mut self, fields: NewTask) -> Task {
        let task = Task::from_new(self.fresh_id(), fields);
        let mut tasks = self.state.tasks.clone();
        tasks.push(task.clone());
        self.replace_tasks(tasks);
        task
    }

    /// Returns false when no task has `id`.
    pub fn update(&mut self, id: &str, changes: &TaskUpdate) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        let tasks = self
            .state
            .tasks
            .iter()
            .map(|t| {
                let mut t = t.clone();
                if t.id == id {
                    changes.apply_to(&mut t);
                }
                t
            })
            .collect();
        self.replace_tasks(tasks);
        true
    }

    /// Returns the new completion state, or `None` when no task has `id`.
    pub fn toggle_completion(&mut self, id: &str) -> Option<bool> {
        let now_completed = !self.get(id)?.is_completed;
        let tasks = self
            .state
            .tasks
            .iter()
            .map(|t| {
                let mut t = t.clone();
                if t.id == id {
                    t.is_completed = now_completed;
                }
                t
            })
            .collect();
        self.replace_tasks(tasks);
        Some(now_completed)
    }

    pub fn delete(&mut self, id: &str) -> Option<Task> {
        let removed = self.get(id)?.clone();
        let tasks = self
            .state
            .tasks
            .iter()
            .filter(|t| t.id != id)
            .cloned()
            .collect();
        self.replace_tasks(tasks);
        Some(removed)
    }

    /// Empties the collection and hands back what was removed.
    pub fn clear_all(&mut self) -> Vec<Task> {
        let removed = std::mem::take(&mut self.state.tasks);
        self.persist();
        removed
    }

    #[must_use]
    pub fn notifications_enabled(&self) -> bool {
        self.state.notifications_enabled
    }

    pub fn set_notifications_enabled(&mut self, enabled: bool) {
        self.commit(Snapshot {
            notifications_enabled: enabled,
            ..self.state.clone()
        });
    }

    #[must_use]
    pub fn filter(&self) -> Filter {
        self.state.filter
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.commit(Snapshot {
            filter,
            ..self.state.clone()
        });
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Task::new_id();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.commit(Snapshot {
            tasks,
            ..self.state.clone()
        });
    }

    fn commit(&mut self, next: Snapshot) {
        self.state = next;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %format!("{e:#}"), "keeping in-memory task state after failed write");
        }
    }
}

fn read_snapshot<S: KeyValueStore>(storage: &S, key: &str) -> anyhow::Result<Option<Snapshot>> {
    let Some(raw) = storage.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            let backup = format!("{key}.corrupt");
            if let Err(err) = storage.set(&backup, &raw) {
                tracing::warn!(key = %backup, error = %format!("{err:#}"), "failed to back up unreadable snapshot");
            }
            Err(anyhow::Error::new(e)
                .context(format!("failed to parse snapshot '{key}' (copy kept as '{backup}')")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use time::macros::datetime;

    use super::*;
    use crate::task::model::{Repeat, StatusFilter};
    use crate::task::storage::MemoryStore;

    fn draft(title: &str) -> NewTask {
        NewTask::new(title, datetime!(2024-11-28 09:00 UTC))
    }

    #[test]
    fn created_ids_are_unique() {
        let mut store = TaskStore::load(MemoryStore::new());
        let ids: HashSet<String> = (0..200)
            .map(|i| store.create(draft(&format!("task {i}"))).id)
            .collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(store.tasks().len(), 200);
    }

    #[test]
    fn create_appends_incomplete_task_in_order() {
        let mut store = TaskStore::load(MemoryStore::new());
        let a = store.create(draft("first"));
        let b = store.create(draft("second"));
        assert!(!a.is_completed);
        let titles: Vec<&str> = store.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["first", "second"]);
        assert_eq!(store.tasks()[1].id, b.id);
    }

    #[test]
    fn store_accepts_blank_titles() {
        let mut store = TaskStore::load(MemoryStore::new());
        store.create(draft("   "));
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn toggle_twice_restores_state() {
        let mut store = TaskStore::load(MemoryStore::new());
        let id = store.create(draft("walk")).id;
        assert_eq!(store.toggle_completion(&id), Some(true));
        assert_eq!(store.toggle_completion(&id), Some(false));
        assert!(!store.get(&id).unwrap().is_completed);
        assert_eq!(store.toggle_completion("missing"), None);
    }

    #[test]
    fn update_is_partial() {
        let mut store = TaskStore::load(MemoryStore::new());
        let mut fields = draft("read");
        fields.repeat = Repeat::Weekly;
        fields.reminder = true;
        let before = store.create(fields);

        let changed = store.update(
            &before.id,
            &TaskUpdate {
                description: Some(Some("x".to_owned())),
                ..TaskUpdate::default()
            },
        );
        assert!(changed);

        let after = store.get(&before.id).unwrap();
        assert_eq!(after.description.as_deref(), Some("x"));
        assert_eq!(after.title, before.title);
        assert_eq!(after.date, before.date);
        assert_eq!(after.repeat, Repeat::Weekly);
        assert!(after.reminder);
        assert_eq!(after.is_completed, before.is_completed);
    }

    #[test]
    fn update_of_missing_id_is_a_no_op() {
        let storage = MemoryStore::new();
        let mut store = TaskStore::load(&storage);
        assert!(!store.update(
            "nope",
            &TaskUpdate {
                title: Some("x".to_owned()),
                ..TaskUpdate::default()
            }
        ));
        assert!(storage.get(DEFAULT_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn delete_removes_exactly_one() {
        let mut store = TaskStore::load(MemoryStore::new());
        let a = store.create(draft("a")).id;
        store.create(draft("b"));

        assert!(store.delete("absent").is_none());
        assert_eq!(store.tasks().len(), 2);

        let removed = store.delete(&a).unwrap();
        assert_eq!(removed.id, a);
        assert_eq!(store.tasks().len(), 1);
        assert!(store.get(&a).is_none());
    }

    #[test]
    fn clear_all_empties_unconditionally() {
        let mut store = TaskStore::load(MemoryStore::new());
        assert!(store.clear_all().is_empty());
        store.create(draft("a"));
        store.create(draft("b"));
        assert_eq!(store.clear_all().len(), 2);
        assert!(store.tasks().is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_storage() {
        let storage = MemoryStore::new();
        let expected = {
            let mut store = TaskStore::load(&storage);
            let id = store.create(draft("a")).id;
            store.create(draft("b"));
            store.toggle_completion(&id);
            store.set_notifications_enabled(false);
            store.set_filter(Filter {
                status: StatusFilter::Completed,
            });
            store.snapshot().clone()
        };

        let reloaded = TaskStore::load(&storage);
        assert_eq!(reloaded.tasks(), expected.tasks.as_slice());
        assert!(!reloaded.notifications_enabled());
        assert_eq!(reloaded.filter().status, StatusFilter::Completed);
    }

    #[test]
    fn missing_or_corrupt_snapshot_falls_back_to_defaults() {
        let storage = MemoryStore::new();
        let store = TaskStore::load(&storage);
        assert!(store.tasks().is_empty());
        assert!(store.notifications_enabled());

        storage.set(DEFAULT_STORAGE_KEY, "{not json").unwrap();
        let store = TaskStore::load(&storage);
        assert!(store.tasks().is_empty());
        assert!(store.notifications_enabled());
        assert_eq!(store.filter(), Filter::default());
    }

    #[test]
    fn unreadable_snapshot_is_backed_up_before_overwrite() {
        let storage = MemoryStore::new();
        let raw = r#"{"tasks":[{"id":"a1","title":"t","date":"2024-11-28T09:00:00Z","isCompleted":false,"repeat":"Hourly"}]}"#;
        storage.set(DEFAULT_STORAGE_KEY, raw).unwrap();

        let mut store = TaskStore::load(&storage);
        assert!(store.tasks().is_empty());
        store.create(draft("fresh"));

        assert_eq!(
            storage.get("task-storage.corrupt").unwrap().as_deref(),
            Some(raw)
        );
        let current = storage.get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        assert!(current.contains("fresh"));
    }

    #[test]
    fn reload_picks_up_writes_from_another_handle() {
        let storage = MemoryStore::new();
        let mut stale = TaskStore::load(&storage);
        let old = stale.create(draft("old")).id;

        let mut other = TaskStore::load(&storage);
        other.create(draft("added elsewhere"));

        stale.reload();
        stale.toggle_completion(&old);

        let on_disk = TaskStore::load(&storage);
        let titles: Vec<&str> = on_disk.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["old", "added elsewhere"]);
        assert!(on_disk.get(&old).unwrap().is_completed);
    }

    #[test]
    fn reload_keeps_state_when_snapshot_is_unreadable() {
        let storage = MemoryStore::new();
        let mut store = TaskStore::load(&storage);
        store.create(draft("keep me"));
        storage.set(DEFAULT_STORAGE_KEY, "{not json").unwrap();

        store.reload();
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn snapshot_without_filter_defaults_to_all() {
        let storage = MemoryStore::new();
        storage
            .set(
                DEFAULT_STORAGE_KEY,
                r#"{"tasks":[{"id":"a1","title":"t","date":"2024-11-28T09:00:00Z","isCompleted":false}],"notificationsEnabled":false}"#,
            )
            .unwrap();
        let store = TaskStore::load(&storage);
        assert_eq!(store.tasks().len(), 1);
        assert!(!store.notifications_enabled());
        assert_eq!(store.filter().status, StatusFilter::All);
    }

    #[test]
    fn visible_tasks_follow_filter_without_mutating() {
        let mut store = TaskStore::load(MemoryStore::new());
        let done = store.create(draft("done")).id;
        store.create(draft("open"));
        store.toggle_completion(&done);

        store.set_filter(Filter {
            status: StatusFilter::Incomplete,
        });
        let visible: Vec<&str> = store.visible_tasks().map(|t| t.title.as_str()).collect();
        assert_eq!(visible, ["open"]);
        assert_eq!(store.tasks().len(), 2);
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn remove(&self, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_writes_keep_in_memory_state() {
        let mut store = TaskStore::load(ReadOnlyStore);
        let id = store.create(draft("a")).id;
        assert!(store.get(&id).is_some());
        assert!(store.save().is_err());
    }
}
