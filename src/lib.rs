pub mod command_bus;
pub mod configuration;
pub mod dispatcher;
pub mod domain;
pub mod handler;
pub mod repository;
pub mod startup;
pub mod task_worker;
pub mod telemetry;
pub mod uniqueness;
pub mod utils;
