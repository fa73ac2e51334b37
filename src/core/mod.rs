pub mod classify;
pub mod events;
pub mod model;
pub mod monitor;
