//! Event mechanics shared by the clinic modules: the `Event` contract, stream
//! envelopes, and a pub/sub bus used to fan committed events out to read
//! models and realtime subscribers.

pub mod bus;
pub mod clinic;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use clinic::ClinicScoped;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
