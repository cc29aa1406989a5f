//! The resilience substrate — connection pooling, circuit breakers,
//! and the in-process event bus — that every other component depends on
//! for shared-resource access and failure containment.

mod bus;
mod circuit;
mod pool;

pub use bus::{Envelope, Event, EventBus};
pub use circuit::{CircuitBreaker, CircuitState};
pub use pool::{ConnectionPool, PoolError, ReadPool};
