pub mod attachments;
pub mod config;
pub mod content;
pub mod directory;
pub mod error;
pub mod export;
pub mod graph;
pub mod macros;
pub mod paths;
pub mod pipeline;
pub mod resolve;
pub mod runtime;
pub mod serialize;
