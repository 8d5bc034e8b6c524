#![forbid(unsafe_code)]

pub mod app;
pub mod capabilities;
pub mod chunking;
pub mod commands;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod events;
pub mod glossary;
pub mod llm;
pub mod logging;
pub mod openai;
pub mod pipeline;
pub mod progress;
pub mod raw_store;
pub mod settings;
pub mod style;
pub mod term_index;
