//! Ambient infrastructure: the SQL pool, the persistent event queue, and
//! the single-worker job scheduler. These are the external-collaborator
//! layers the rest of the daemon is built on top of.

pub mod database;
pub mod event_queue;
pub mod scheduler;

pub use database::Database;
pub use event_queue::EventQueue;
pub use scheduler::Scheduler;
