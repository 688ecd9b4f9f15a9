pub mod api;
pub mod auth;
pub mod bus;
pub mod cli;
pub mod config;
pub mod directory;
pub mod errors;
pub mod orders;
pub mod rider_sim;
pub mod service;
pub mod state;
pub mod store;
pub mod tracker;
pub mod transition;
pub mod utils;
pub mod watch;
pub mod ws;
