pub mod board;
pub mod cli;
pub mod config;
pub mod grading;
pub mod ranking;
pub mod server;
pub mod simulation;
