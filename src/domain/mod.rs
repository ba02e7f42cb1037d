pub mod clock;
pub mod error;
pub mod event;
pub mod model;
pub mod worker_api;
