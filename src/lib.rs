pub mod config;
pub mod crawler;
pub mod epub;
pub mod logger;
pub mod sequence;
pub mod utils;

pub use config::Config;
pub use crawler::TgabCrawler;
pub use epub::{Chapter, Epub};
pub use sequence::{OrphanPolicy, Sequence, SequenceError, reconstruct};
