pub mod app;
pub mod config;
pub mod diagram;
pub mod error;
pub mod llm;
pub mod panel;
pub mod repo;
pub mod segmenter;
pub mod session;
pub mod streaming;
pub mod tools;
pub mod tui;
