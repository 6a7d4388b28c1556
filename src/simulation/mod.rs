pub mod sim_config;
pub mod sim_driver;
pub mod sim_errors;
pub mod sim_events;
pub mod simulation;
pub mod transit_engine;
pub mod watchdog;
