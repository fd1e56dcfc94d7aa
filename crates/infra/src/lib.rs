//! Infrastructure layer: event store, command dispatch, read models and the
//! cross-aggregate workflows (billing, online booking, visit tracking,
//! dashboard) built on top of them.

pub mod admission;
pub mod billing;
pub mod booking;
pub mod command_dispatcher;
pub mod dashboard;
pub mod event_store;
pub mod projections;
pub mod reactors;
pub mod read_model;
pub mod workers;
