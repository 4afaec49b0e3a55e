#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod crawler;
pub mod fetcher;
pub mod output;
pub mod publisher;
pub mod scheduler;
pub mod text;
pub mod types;
pub mod utils;
