//! Data models for taskboard entities.
//!
//! - `Board`, `BoardUpdate`: kanban boards owned by a user
//! - `Task`, `NewTask`, `TaskUpdate`, `TaskQuery`: tasks and the filters the
//!   task listing endpoint understands
//! - Auth payloads: `TokenPair`, `User`, `Me`

pub mod auth;
pub mod board;
pub mod task;

pub use auth::{AuthRequest, Me, SignupResponse, TokenPair, User};
pub use board::{Board, BoardUpdate, NewBoard};
pub use task::{
    DeadlineFilter, NewTask, SortBy, SortDir, Task, TaskPriority, TaskQuery, TaskStatus, TaskUpdate,
};
