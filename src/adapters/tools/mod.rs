//! External-process adapters: ffmpeg/ffprobe wrappers and the voice-chat
//! streaming engine bridge.

pub mod ffmpeg_tools;
pub mod voice_engine;
pub mod ytdlp_tools;

pub use ffmpeg_tools::FfmpegTools;
pub use voice_engine::VcBridgeEngine;
pub use ytdlp_tools::YtDlpTools;
