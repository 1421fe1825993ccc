pub mod command;
pub mod probe;
pub mod transcoder;
pub mod watcher;

pub use transcoder::{FfmpegTranscoder, TranscoderConfig};
