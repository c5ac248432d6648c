//! Adapters around the external media tools (`ffprobe`, `ffmpeg`).

pub mod command;
pub mod probe;
pub mod remux;
