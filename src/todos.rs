//! Pure operations over todos and collections. Nothing here performs I/O;
//! time and identifiers come in as values so every function is deterministic.

use std::{
    cmp::Reverse,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use uuid::Uuid;

use crate::{
    models::{Filter, Todo, TodoChanges, TodoCounts},
    validation::{validate_and_sanitize, ValidationError},
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Reproducible UUID-v4 sequence for a given seed.
#[derive(Debug)]
pub struct SeededIds {
    rng: Mutex<StdRng>,
}

impl SeededIds {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl IdGenerator for SeededIds {
    fn next_id(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

pub fn create_todo(text: &str, id: Uuid, now: DateTime<Utc>) -> Result<Todo, ValidationError> {
    let text = validate_and_sanitize(text)?;
    Ok(Todo {
        id,
        text,
        completed: false,
        created_at: now,
        updated_at: now,
    })
}

/// Returns a new todo with `changes` applied and `updated_at` refreshed.
/// Replacement text goes through the same sanitize-then-validate path as
/// creation.
pub fn update_todo(
    todo: &Todo,
    changes: TodoChanges,
    now: DateTime<Utc>,
) -> Result<Todo, ValidationError> {
    let text = changes
        .text
        .as_deref()
        .map(validate_and_sanitize)
        .transpose()?;
    Ok(apply(todo, text, changes.completed, now))
}

pub fn toggle_completion(todo: &Todo, now: DateTime<Utc>) -> Todo {
    apply(todo, None, Some(!todo.completed), now)
}

fn apply(todo: &Todo, text: Option<String>, completed: Option<bool>, now: DateTime<Utc>) -> Todo {
    Todo {
        id: todo.id,
        text: text.unwrap_or_else(|| todo.text.clone()),
        completed: completed.unwrap_or(todo.completed),
        created_at: todo.created_at,
        // a clock that steps backwards must not break updated_at >= created_at
        updated_at: now.max(todo.created_at),
    }
}

pub fn filter_by_status(todos: &[Todo], filter: Filter) -> Vec<Todo> {
    todos
        .iter()
        .filter(|todo| filter.matches(todo))
        .cloned()
        .collect()
}

/// Newest first. Equal timestamps keep their relative order.
pub fn sort_newest_first(todos: &[Todo]) -> Vec<Todo> {
    let mut sorted = todos.to_vec();
    sorted.sort_by_key(|todo| Reverse(todo.created_at));
    sorted
}

/// Incomplete todos before completed ones, newest first within each group.
/// Equal keys keep their relative order.
pub fn sort_with_completed_last(todos: &[Todo]) -> Vec<Todo> {
    let mut sorted = todos.to_vec();
    sorted.sort_by_key(|todo| (todo.completed, Reverse(todo.created_at)));
    sorted
}

pub fn compute_counts(todos: &[Todo]) -> TodoCounts {
    let all = todos.len();
    let completed = todos.iter().filter(|todo| todo.completed).count();
    TodoCounts {
        all,
        active: all - completed,
        completed,
    }
}

pub fn find_by_id(todos: &[Todo], id: Uuid) -> Option<&Todo> {
    todos.iter().find(|todo| todo.id == id)
}

/// A missing id leaves the collection unchanged; callers check with
/// [`find_by_id`] first.
pub fn remove_by_id(todos: &[Todo], id: Uuid) -> Vec<Todo> {
    todos.iter().filter(|todo| todo.id != id).cloned().collect()
}

pub fn remove_all_completed(todos: &[Todo]) -> Vec<Todo> {
    filter_by_status(todos, Filter::Active)
}

/// Applies [`update_todo`] to the entry matching `id`. A missing id leaves the
/// collection unchanged; callers check with [`find_by_id`] first.
pub fn replace_by_id(
    todos: &[Todo],
    id: Uuid,
    changes: TodoChanges,
    now: DateTime<Utc>,
) -> Result<Vec<Todo>, ValidationError> {
    todos
        .iter()
        .map(|todo| {
            if todo.id == id {
                update_todo(todo, changes.clone(), now)
            } else {
                Ok(todo.clone())
            }
        })
        .collect()
}
