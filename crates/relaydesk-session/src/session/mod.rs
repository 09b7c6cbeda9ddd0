pub mod controller;
pub mod data;
mod timer;

pub use controller::{SessionController, TimerStatus};
pub use data::{Session, SessionState};

#[cfg(test)]
mod tests;
