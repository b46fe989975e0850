// crates/telefeed-media/src/lib.rs
//
// The threaded ingestion and conditioning pipeline: demux → decode → scale /
// resample, stitched together with a byte-bounded packet queue and two-slot
// frame buffers. `feed::FeedSource` is the public entry point; everything
// else is plumbing for its five stage threads.

pub mod dbuffer;
pub mod feed;
pub mod queue;

mod audio;
mod decode;
mod demux;
mod filters;
mod logo;
mod video;

pub use feed::{FeedError, FeedSource};
pub use telefeed_core::{FeedConfig, WidescreenFit};
