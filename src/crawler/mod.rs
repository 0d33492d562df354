// Root of the crawler module: listing walk, product extraction and the run loop
pub mod chrome_renderer;
pub mod config;
pub mod crawler;
pub mod embedding;
pub mod errors;
pub mod extractor;
pub mod listing;
pub mod logging;
pub mod product;
pub mod renderer;
pub mod selectors;
pub mod sink;
pub mod state;
