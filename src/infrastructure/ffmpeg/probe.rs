use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::command::spawn_stdin_feeder;
use crate::modules::video::error::TranscodeError;
use crate::modules::video::traits::ObjectReader;

/// Read the height of the first video stream from `source` via stdin.
pub async fn probe_height(ffprobe: &Path, source: ObjectReader) -> Result<u32, TranscodeError> {
    let mut child = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=height",
            "-of",
            "csv=p=0",
            "pipe:0",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            TranscodeError::SourceProbe(format!("failed to start {}: {}", ffprobe.display(), e))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TranscodeError::SourceProbe("ffprobe stdin not captured".into()))?;
    let feeder = spawn_stdin_feeder(source, stdin);

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| TranscodeError::SourceProbe(e.to_string()))?;
    feeder.abort();

    if !output.status.success() {
        return Err(TranscodeError::SourceProbe(format!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_height(&String::from_utf8_lossy(&output.stdout))
}

/// Duration in seconds of a finished segment file.
pub async fn probe_duration(ffprobe: &Path, file: &Path) -> Result<f64, TranscodeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(file)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| TranscodeError::SourceProbe(e.to_string()))?;

    if !output.status.success() {
        return Err(TranscodeError::SourceProbe(format!(
            "ffprobe exited with {} for {}",
            output.status,
            file.display()
        )));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn first_line(output: &str) -> &str {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

pub fn parse_height(output: &str) -> Result<u32, TranscodeError> {
    // csv output may carry a trailing separator
    let value = first_line(output).trim_end_matches(',');

    match value.parse::<u32>() {
        Ok(height) if height > 0 => Ok(height),
        _ => Err(TranscodeError::SourceProbe(format!(
            "unusable height {:?}",
            value
        ))),
    }
}

pub fn parse_duration(output: &str) -> Result<f64, TranscodeError> {
    let value = first_line(output);

    match value.parse::<f64>() {
        Ok(duration) if duration.is_finite() && duration > 0.0 => Ok(duration),
        _ => Err(TranscodeError::SourceProbe(format!(
            "unusable duration {:?}",
            value
        ))),
    }
}
