pub mod scheduler;

pub use scheduler::{drift, PlannedUpdate, UpdateScheduler};
