pub mod daemon;
pub mod feed;
pub mod progress;
pub mod render;
pub mod snapshot;
