//! Encoder argument building and child-process plumbing.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin};
use tokio::task::JoinHandle;

use crate::modules::video::playlist::VARIANT_PLAYLIST_NAME;
use crate::modules::video::traits::ObjectReader;

/// printf-style pattern handed to the HLS muxer.
pub const SEGMENT_PATTERN: &str = "seg%03d.ts";

const FEED_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderBackend {
    Cpu,
    /// NVENC; `npp_scaling` additionally moves scaling onto the GPU.
    Gpu { npp_scaling: bool },
}

impl EncoderBackend {
    pub fn from_flags(gpu: bool, npp_scaling: bool) -> Self {
        if gpu {
            EncoderBackend::Gpu { npp_scaling }
        } else {
            EncoderBackend::Cpu
        }
    }
}

/// One HLS encode of stdin into `output_dir` at a target height.
#[derive(Debug, Clone)]
pub struct HlsCommand {
    backend: EncoderBackend,
    height: u32,
    segment_seconds: u32,
    output_dir: PathBuf,
}

impl HlsCommand {
    pub fn new(
        backend: EncoderBackend,
        height: u32,
        segment_seconds: u32,
        output_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            backend,
            height,
            segment_seconds,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn segment_pattern(&self) -> PathBuf {
        self.output_dir.join(SEGMENT_PATTERN)
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(VARIANT_PLAYLIST_NAME)
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

        if self.backend == (EncoderBackend::Gpu { npp_scaling: true }) {
            // scale_npp needs frames to stay in device memory
            args.extend(["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"].map(String::from));
        }

        args.extend(["-i", "pipe:0"].map(String::from));

        let (codec, filter) = match self.backend {
            EncoderBackend::Cpu => ("libx264", format!("scale=-2:{}", self.height)),
            EncoderBackend::Gpu { npp_scaling: false } => {
                ("h264_nvenc", format!("scale=-2:{}", self.height))
            }
            EncoderBackend::Gpu { npp_scaling: true } => {
                ("h264_nvenc", format!("scale_npp=-2:{}", self.height))
            }
        };
        args.extend(["-c:v".to_string(), codec.to_string()]);
        args.extend(["-preset", "fast"].map(String::from));
        args.extend(["-vf".to_string(), filter]);

        args.extend(["-c:a", "aac", "-f", "hls"].map(String::from));
        args.extend(["-hls_time".to_string(), self.segment_seconds.to_string()]);
        // Unbounded playlist; segments appear under their final name only once complete.
        args.extend(["-hls_list_size", "0", "-hls_flags", "temp_file"].map(String::from));
        args.push("-hls_segment_filename".into());
        args.push(self.segment_pattern().to_string_lossy().into_owned());
        args.push(self.playlist_path().to_string_lossy().into_owned());

        args
    }
}

/// Pump `source` into a child's stdin and close it at EOF.
///
/// Resolves to `Err` only when reading the source fails. A write failure means
/// the child stopped reading, which its exit status reports better.
pub fn spawn_stdin_feeder(mut source: ObjectReader, mut stdin: ChildStdin) -> JoinHandle<io::Result<u64>> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; FEED_CHUNK];
        let mut total = 0u64;

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if stdin.write_all(&buf[..n]).await.is_err() {
                return Ok(total);
            }
            total += n as u64;
        }

        let _ = stdin.shutdown().await;
        Ok(total)
    })
}

/// Keep the last `max_lines` lines a child writes to stderr.
pub fn spawn_stderr_tail(stderr: ChildStderr, max_lines: usize) -> JoinHandle<VecDeque<String>> {
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(max_lines);
        let mut lines = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if tail.len() == max_lines {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        tail
    })
}

/// Join a stderr tail into one diagnostic line.
pub async fn collect_stderr_tail(handle: JoinHandle<VecDeque<String>>) -> String {
    match tokio::time::timeout(Duration::from_secs(2), handle).await {
        Ok(Ok(tail)) if !tail.is_empty() => tail.into_iter().collect::<Vec<_>>().join("; "),
        _ => "no diagnostic output".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_for(backend: EncoderBackend) -> Vec<String> {
        HlsCommand::new(backend, 720, 10, "/dev/shm/ep1-720p-x").build_args()
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn cpu_backend_uses_x264_and_software_scaling() {
        let args = args_for(EncoderBackend::Cpu);

        assert_eq!(value_after(&args, "-i"), Some("pipe:0"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-vf"), Some("scale=-2:720"));
        assert!(!args.contains(&"-hwaccel".to_string()));
    }

    #[test]
    fn gpu_backend_selects_nvenc_and_optional_npp() {
        let plain = args_for(EncoderBackend::Gpu { npp_scaling: false });
        assert_eq!(value_after(&plain, "-c:v"), Some("h264_nvenc"));
        assert_eq!(value_after(&plain, "-vf"), Some("scale=-2:720"));

        let npp = args_for(EncoderBackend::Gpu { npp_scaling: true });
        assert_eq!(value_after(&npp, "-c:v"), Some("h264_nvenc"));
        assert_eq!(value_after(&npp, "-vf"), Some("scale_npp=-2:720"));
        assert_eq!(value_after(&npp, "-hwaccel"), Some("cuda"));
        let hwaccel = npp.iter().position(|a| a == "-hwaccel").unwrap();
        let input = npp.iter().position(|a| a == "-i").unwrap();
        assert!(hwaccel < input);
    }

    #[test]
    fn hls_muxer_settings_are_fixed() {
        let args = args_for(EncoderBackend::Cpu);

        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-f"), Some("hls"));
        assert_eq!(value_after(&args, "-hls_time"), Some("10"));
        assert_eq!(value_after(&args, "-hls_list_size"), Some("0"));
        assert_eq!(value_after(&args, "-hls_flags"), Some("temp_file"));
        assert_eq!(
            value_after(&args, "-hls_segment_filename"),
            Some("/dev/shm/ep1-720p-x/seg%03d.ts")
        );
        assert_eq!(args.last().map(String::as_str), Some("/dev/shm/ep1-720p-x/index.m3u8"));
    }

    #[test]
    fn backend_follows_configuration_flags() {
        assert_eq!(EncoderBackend::from_flags(false, true), EncoderBackend::Cpu);
        assert_eq!(
            EncoderBackend::from_flags(true, true),
            EncoderBackend::Gpu { npp_scaling: true }
        );
    }
}
