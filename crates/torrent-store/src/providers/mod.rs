//! Bundled storage tiers

mod fs;
mod http;
mod memory;

pub use fs::FsProvider;
pub use http::HttpProvider;
pub use memory::MemoryProvider;
