pub mod attendance;
pub mod batches;
pub mod checkin;
pub mod core;
pub mod dashboard;
pub mod setup;
pub mod students;
pub mod topics;
