//! ffmpeg RTSP -> HLS command line

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manifest written by the transcoder in each camera directory
pub const MANIFEST_FILE: &str = "stream.m3u8";

/// Segment file pattern (ffmpeg strftime-free numbering)
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Low-latency encode profile. Fixed frame rate and keyframe interval keep
/// segment sizes predictable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HlsProfile {
    pub video_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub buffer_size_kbps: u32,
    pub frame_rate: u32,
    pub keyframe_interval: u32,
    /// Target segment duration in seconds
    pub segment_seconds: u32,
    /// Segments kept in the rolling playlist
    pub playlist_size: u32,
}

impl Default for HlsProfile {
    fn default() -> Self {
        Self {
            video_bitrate_kbps: 800,
            max_bitrate_kbps: 1000,
            buffer_size_kbps: 2000,
            frame_rate: 10,
            keyframe_interval: 20,
            segment_seconds: 1,
            playlist_size: 10,
        }
    }
}

/// Build ffmpeg arguments pulling `source_url` over RTSP/TCP and writing a
/// rolling HLS window into `output_dir`.
pub fn hls_args(source_url: &str, output_dir: &Path, profile: &HlsProfile) -> Vec<String> {
    let manifest = output_dir.join(MANIFEST_FILE);
    let segments = output_dir.join(SEGMENT_PATTERN);

    let mut args: Vec<String> = Vec::with_capacity(48);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-hide_banner", "-loglevel", "warning", "-nostdin"]);
    push(&["-rtsp_transport", "tcp", "-i", source_url]);
    push(&[
        "-c:v",
        "libx264",
        "-preset",
        "ultrafast",
        "-tune",
        "zerolatency",
        "-profile:v",
        "baseline",
        "-level",
        "3.0",
        "-sc_threshold",
        "0",
    ]);
    push(&["-c:a", "aac"]);

    let video_bitrate = format!("{}k", profile.video_bitrate_kbps);
    let max_bitrate = format!("{}k", profile.max_bitrate_kbps);
    let buffer_size = format!("{}k", profile.buffer_size_kbps);
    let frame_rate = profile.frame_rate.to_string();
    let keyframes = profile.keyframe_interval.to_string();
    let segment_seconds = profile.segment_seconds.to_string();
    let playlist_size = profile.playlist_size.to_string();
    push(&[
        "-b:v",
        &video_bitrate,
        "-maxrate",
        &max_bitrate,
        "-bufsize",
        &buffer_size,
        "-r",
        &frame_rate,
        "-g",
        &keyframes,
    ]);

    let segments = segments.to_string_lossy();
    let manifest = manifest.to_string_lossy();
    push(&[
        "-f",
        "hls",
        "-hls_time",
        &segment_seconds,
        "-hls_list_size",
        &playlist_size,
        "-hls_flags",
        "delete_segments+append_list",
        "-hls_segment_type",
        "mpegts",
        "-hls_segment_filename",
        &segments,
        &manifest,
    ]);

    args
}
