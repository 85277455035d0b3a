#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod config;
pub mod error;
pub mod flow;
pub mod output;
pub mod reminder;
pub mod task;
