pub mod acquire;
pub mod browser;
pub mod cmd;
pub mod config;
mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod ledger;
pub mod paths;
pub mod pipeline;
pub mod resolver;
pub mod tagger;
pub mod tools;
pub mod track;
pub mod webdriver;
pub mod ytdlp;

pub use error::{EngineError, Result};
