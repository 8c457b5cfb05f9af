use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    models::{ErrorKind, ErrorState, Filter, Todo, TodoChanges, TodoCounts, TodoState},
    storage::{KeyValueStore, StorageAdapter, StorageStats},
    todos::{
        compute_counts, create_todo, filter_by_status, find_by_id, remove_all_completed,
        remove_by_id, replace_by_id, Clock, IdGenerator, RandomIds, SystemClock,
    },
    validation::{validate_and_sanitize, validate_id, ValidationError},
};

/// The surface the presentation layer talks to. Commands resolve once the
/// new state has been published; outcomes, including errors, are observed
/// through the state rather than returned.
#[async_trait]
pub trait TodoCommands: Send + Sync {
    async fn add(&self, text: &str);
    async fn toggle(&self, id: &str);
    async fn edit(&self, id: &str, text: &str);
    async fn remove(&self, id: &str);
    async fn clear_completed(&self);
    async fn clear_all(&self);

    fn list(&self, filter: Filter) -> Vec<Todo>;
    fn counts(&self) -> TodoCounts;
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Todo item not found.")]
    NotFound,

    #[error("{0}")]
    Unknown(String),
}

impl CommandError {
    fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Validation(_) => ErrorKind::Validation,
            CommandError::NotFound => ErrorKind::NotFound,
            CommandError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

pub struct TodoManagerBuilder {
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    default_filter: Filter,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    initial: Vec<Todo>,
}

impl TodoManagerBuilder {
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.storage_key = config.storage_key.clone();
        self.default_filter = config.default_filter;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Collection used when storage is empty, unavailable or unreadable.
    pub fn initial_todos(mut self, todos: Vec<Todo>) -> Self {
        self.initial = todos;
        self
    }

    #[instrument(skip_all, fields(loaded))]
    pub fn build(self) -> TodoManager {
        let storage = StorageAdapter::new(self.store);
        let todos = load(&storage, &self.storage_key).unwrap_or(self.initial);
        tracing::Span::current().record("loaded", todos.len());
        info!(storage.key = %self.storage_key, count = todos.len(), "Todo manager ready");

        let (state, _) = watch::channel(TodoState {
            loading: false,
            error: None,
            todos,
        });
        let (filter, _) = watch::channel(self.default_filter);

        TodoManager {
            storage,
            storage_key: self.storage_key,
            clock: self.clock,
            ids: self.ids,
            state,
            filter,
        }
    }
}

fn load(storage: &StorageAdapter, key: &str) -> Option<Vec<Todo>> {
    if !storage.is_available() {
        warn!("Storage unavailable, starting from the default collection");
        return None;
    }
    match storage.get::<Vec<Todo>>(key) {
        Ok(Some(todos)) => {
            let mut seen = HashSet::with_capacity(todos.len());
            if todos.iter().all(|todo| seen.insert(todo.id)) {
                Some(todos)
            } else {
                warn!("Stored collection has duplicate ids, ignoring it");
                None
            }
        }
        Ok(None) => {
            debug!("Nothing stored yet");
            None
        }
        Err(e) => {
            warn!(error = %e, "Stored collection unreadable, ignoring it");
            None
        }
    }
}

/// Owns the authoritative in-memory collection and writes it through to
/// storage after every change.
///
/// A failed write is reported as a storage error but the in-memory change is
/// kept: the visible state stays ahead of storage until the next successful
/// write, and a reload before then loses the change.
pub struct TodoManager {
    storage: StorageAdapter,
    storage_key: String,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: watch::Sender<TodoState>,
    filter: watch::Sender<Filter>,
}

impl TodoManager {
    pub fn builder(store: Arc<dyn KeyValueStore>) -> TodoManagerBuilder {
        let config = AppConfig::default();
        TodoManagerBuilder {
            store,
            storage_key: config.storage_key,
            default_filter: config.default_filter,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
            initial: Vec::new(),
        }
    }

    pub fn state(&self) -> TodoState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TodoState> {
        self.state.subscribe()
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.state.borrow().todos.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<ErrorState> {
        self.state.borrow().error.clone()
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    pub fn filter(&self) -> Filter {
        *self.filter.borrow()
    }

    pub fn set_filter(&self, filter: Filter) {
        debug!(%filter, "Filter changed");
        self.filter.send_replace(filter);
    }

    pub fn storage_stats(&self) -> StorageStats {
        self.storage.stats()
    }

    pub fn get_filtered_todos(&self, filter: Filter) -> Vec<Todo> {
        filter_by_status(&self.state.borrow().todos, filter)
    }

    pub fn get_counts(&self) -> TodoCounts {
        compute_counts(&self.state.borrow().todos)
    }

    #[instrument(skip(self, text), fields(text.len = text.len()))]
    pub async fn add_todo(&self, text: &str) {
        self.run("Failed to save new todo", |todos, now| {
            let todo = create_todo(text, self.ids.next_id(), now)?;
            if todo.id.get_version_num() != 4 || find_by_id(todos, todo.id).is_some() {
                return Err(CommandError::Unknown(format!(
                    "Generated identifier {} is not a fresh UUID v4",
                    todo.id
                )));
            }
            info!(todo.id = %todo.id, "Todo created");

            let mut next = Vec::with_capacity(todos.len() + 1);
            next.push(todo);
            next.extend_from_slice(todos);
            Ok(next)
        })
        .await
    }

    #[instrument(skip(self), fields(todo.id = %id))]
    pub async fn toggle_todo(&self, id: &str) {
        self.run("Failed to update todo", |todos, now| {
            let todo = locate(todos, id)?;
            let completed = !todo.completed;
            info!(completed, "Todo toggled");
            Ok(replace_by_id(todos, todo.id, TodoChanges::completed(completed), now)?)
        })
        .await
    }

    #[instrument(skip(self, text), fields(todo.id = %id, text.len = text.len()))]
    pub async fn update_todo_text(&self, id: &str, text: &str) {
        self.run("Failed to update todo", |todos, now| {
            let text = validate_and_sanitize(text)?;
            let todo = locate(todos, id)?;
            info!("Todo text updated");
            Ok(replace_by_id(todos, todo.id, TodoChanges::text(text), now)?)
        })
        .await
    }

    #[instrument(skip(self), fields(todo.id = %id))]
    pub async fn delete_todo(&self, id: &str) {
        self.run("Failed to delete todo", |todos, _| {
            let todo = locate(todos, id)?;
            info!("Todo deleted");
            Ok(remove_by_id(todos, todo.id))
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_completed(&self) {
        self.run("Failed to clear completed todos", |todos, _| {
            let next = remove_all_completed(todos);
            info!(deleted_count = todos.len() - next.len(), "Deleted completed todos");
            Ok(next)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn clear_all(&self) {
        self.run("Failed to clear all todos", |todos, _| {
            info!(deleted_count = todos.len(), "Cleared all todos");
            Ok(Vec::new())
        })
        .await
    }

    /// Busy, compute, write through, publish. The read of the current
    /// collection and the publish of the new one happen without an await in
    /// between, so concurrent commands cannot lose each other's updates.
    async fn run<F>(&self, context: &'static str, mutate: F)
    where
        F: FnOnce(&[Todo], DateTime<Utc>) -> Result<Vec<Todo>, CommandError> + Send,
    {
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        tokio::task::yield_now().await;

        let now = self.clock.now();
        let current = self.todos();
        let next = match mutate(current.as_slice(), now) {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Command rejected");
                let error = ErrorState::new(e.kind(), e.to_string(), now);
                self.state.send_modify(|state| {
                    state.error = Some(error);
                    state.loading = false;
                });
                return;
            }
        };

        let error = match self.storage.set(&self.storage_key, &next) {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "{context}, keeping the in-memory change");
                Some(ErrorState::new(
                    ErrorKind::Storage,
                    format!("{context}: {e}"),
                    now,
                ))
            }
        };

        self.state.send_modify(|state| {
            state.todos = next;
            state.error = error;
            state.loading = false;
        });
    }
}

/// Ids that do not even parse cannot be in the collection, so they are
/// reported the same way as well-formed ids that are missing.
fn locate<'a>(todos: &'a [Todo], id: &str) -> Result<&'a Todo, CommandError> {
    let id: Uuid = validate_id(id).map_err(|e| {
        debug!(error = %e, "Malformed todo id");
        CommandError::NotFound
    })?;
    find_by_id(todos, id).ok_or_else(|| {
        warn!("Todo not found");
        CommandError::NotFound
    })
}

#[async_trait]
impl TodoCommands for TodoManager {
    async fn add(&self, text: &str) {
        self.add_todo(text).await
    }

    async fn toggle(&self, id: &str) {
        self.toggle_todo(id).await
    }

    async fn edit(&self, id: &str, text: &str) {
        self.update_todo_text(id, text).await
    }

    async fn remove(&self, id: &str) {
        self.delete_todo(id).await
    }

    async fn clear_completed(&self) {
        self.delete_completed().await
    }

    async fn clear_all(&self) {
        TodoManager::clear_all(self).await
    }

    fn list(&self, filter: Filter) -> Vec<Todo> {
        self.get_filtered_todos(filter)
    }

    fn counts(&self) -> TodoCounts {
        self.get_counts()
    }
}
