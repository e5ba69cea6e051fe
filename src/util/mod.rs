//! Clock and telemetry helpers.

pub mod clock;
pub mod telemetry;

pub use clock::Clock;
pub use telemetry::init_tracing;
