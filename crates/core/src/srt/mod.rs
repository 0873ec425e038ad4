//! SubRip reading and writing.
//! Used to ingest an existing transcript and to emit the translated sidecar.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

/// One SRT cue: index, time range and text lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrtCue {
    pub index: u32,
    pub start: Duration,
    pub end: Duration,
    pub lines: Vec<String>,
}

impl SrtCue {
    /// The cue lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Parse SRT text into cues, keeping file order.
/// Byte order marks and CRLF line endings are tolerated.
pub fn parse(input: &str) -> Result<Vec<SrtCue>> {
    let input = input.trim_start_matches('\u{feff}');
    let mut cues = Vec::new();
    let mut lines = input.lines().map(|l| l.trim_end_matches('\r'));
    loop {
        let index_line = match lines.next() {
            Some(l) if !l.trim().is_empty() => l.trim(),
            Some(_) => continue,
            None => break,
        };
        let index: u32 = index_line
            .parse()
            .map_err(|_| anyhow!("bad cue index {index_line:?}"))?;
        let time_line = lines
            .next()
            .ok_or_else(|| anyhow!("cue {index}: missing time line"))?;
        let (start, end) = parse_range(time_line)?;
        let mut text = Vec::new();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            text.push(line.to_string());
        }
        cues.push(SrtCue {
            index,
            start,
            end,
            lines: text,
        });
    }
    Ok(cues)
}

/// Render cues back to SRT text.
pub fn format(cues: &[SrtCue]) -> String {
    let mut out = String::new();
    for cue in cues {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            cue.index,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text()
        );
    }
    out
}

/// Parse `00:00:01,000 --> 00:00:02,000`.
fn parse_range(line: &str) -> Result<(Duration, Duration)> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| anyhow!("bad time range {line:?}"))?;
    // Some writers append positioning hints after the end time.
    let end = end.split_whitespace().next().unwrap_or("");
    Ok((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too).
fn parse_timestamp(t: &str) -> Result<Duration> {
    let parts: Vec<&str> = t.split([':', ',', '.']).collect();
    if parts.len() != 4 {
        return Err(anyhow!("bad timestamp {t:?}"));
    }
    let h: u64 = parts[0].parse()?;
    let m: u64 = parts[1].parse()?;
    let s: u64 = parts[2].parse()?;
    let ms: u64 = parts[3].parse()?;
    Ok(Duration::from_millis(((h * 60 + m) * 60 + s) * 1000 + ms))
}

/// `HH:MM:SS,mmm`.
fn format_timestamp(d: Duration) -> String {
    let ms = d.as_millis() as u64;
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    let ms = ms % 1000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}
