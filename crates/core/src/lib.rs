//! `dentaflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns)
//! shared by every clinic module: identifiers, the aggregate contract, the
//! domain error model and money arithmetic.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod text;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, ClinicId, UserId};
pub use value_object::{Money, ValueObject};
