pub mod analysis;
pub mod analyzer;
pub mod audit;
pub mod batch;
pub mod cache;
pub mod config;
pub mod context;
pub mod event;
pub mod paths;
pub mod projects;
pub mod sessions;
pub mod similarity;
pub mod state;
pub mod store;
pub mod summarizer;
pub mod tokens;
pub mod util;
pub mod warn;
pub mod watcher;
