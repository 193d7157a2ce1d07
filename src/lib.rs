pub mod aggregate;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod locate;
pub mod model;
pub mod parsers;
pub mod pipeline;
pub mod process;
pub mod publish;
pub mod report;
pub mod watch;
