//! Cooperative cancellation shared by the scheduler, its workers and
//! pending retry timers.

mod token;

pub use token::CancellationToken;
