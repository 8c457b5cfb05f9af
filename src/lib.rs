//! Todo list state management: validation, pure collection operations, a
//! fail-safe JSON persistence layer over a synchronous key/value store, and a
//! state manager that ties them together behind an observable state.

pub mod config;
pub mod format;
pub mod manager;
pub mod models;
pub mod storage;
pub mod todos;
pub mod validation;

pub use config::{AppConfig, ConfigError};
pub use manager::{TodoCommands, TodoManager, TodoManagerBuilder};
pub use models::{ErrorKind, ErrorState, Filter, Todo, TodoChanges, TodoCounts, TodoState};
pub use storage::{
    FileStore, KeyValueStore, MemoryStore, StorageAdapter, StorageError, StorageStats,
};
pub use todos::{Clock, IdGenerator, RandomIds, SeededIds, SystemClock};
pub use validation::{ValidationError, MAX_TODO_LENGTH};
