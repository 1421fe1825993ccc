//! HLS manifest rendering and the object layout of a processed episode.
//!
//! ```text
//! videos/{episode}/master.m3u8
//! videos/{episode}/{height}p/index.m3u8
//! videos/{episode}/{height}p/seg000.ts ...
//! ```

use super::ladder::Rendition;

pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const VARIANT_PLAYLIST_NAME: &str = "index.m3u8";
pub const SEGMENT_EXTENSION: &str = ".ts";

/// One finished segment as observed by the segment watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub name: String,
    pub duration_secs: f64,
}

/// `videos/{episode}/`, the prefix removed when a job fails.
pub fn episode_prefix(episode_id: &str) -> String {
    format!("videos/{}/", episode_id)
}

/// `videos/{episode}/{height}p`, without a trailing slash.
pub fn variant_prefix(episode_id: &str, rendition: Rendition) -> String {
    format!("videos/{}/{}", episode_id, rendition.dir_name())
}

pub fn master_playlist_key(episode_id: &str) -> String {
    format!("{}{}", episode_prefix(episode_id), MASTER_PLAYLIST_NAME)
}

/// Render a complete (VOD) variant playlist. Segments are listed in the order
/// given; the target duration is the longest segment rounded up.
pub fn variant_playlist(segments: &[SegmentInfo]) -> String {
    let max_duration = segments
        .iter()
        .map(|s| s.duration_secs)
        .fold(0.0_f64, f64::max);

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    playlist.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        max_duration.ceil() as u64
    ));
    playlist.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");

    for segment in segments {
        playlist.push_str(&format!(
            "#EXTINF:{:.3},\n{}\n",
            segment.duration_secs, segment.name
        ));
    }

    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Render the master playlist, one `EXT-X-STREAM-INF` entry per rendition,
/// each pointing at the variant playlist relative to the episode prefix.
///
/// Entries use the variant directory name (`720p/index.m3u8`), not the bare
/// height, so they resolve to the objects [`variant_prefix`] writes.
pub fn master_playlist(renditions: &[Rendition]) -> String {
    let mut master = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for rendition in renditions {
        master.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}/{}\n",
            rendition.bandwidth(),
            rendition.width(),
            rendition.height(),
            rendition.dir_name(),
            VARIANT_PLAYLIST_NAME
        ));
    }

    master
}
