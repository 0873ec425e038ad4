//! ffmpeg command lines and process plumbing.
//!
//! Burning works on raw frames: one ffmpeg decodes the source into RGBA on
//! stdout, each frame is composited in process, and a second ffmpeg encodes
//! the frames from stdin while muxing the original audio back in.

use image::RgbaImage;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::MediaInfo;
use crate::composite::Compositor;
use crate::error::MediaError;

/// Counters from one burn pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurnStats {
    pub frames: u64,
    pub frames_with_overlay: u64,
}

/// Arguments to pull the first audio stream out as mono 16 kHz PCM WAV.
pub fn extract_audio_args(source: &Path, dest: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        source.display().to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        "16000".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        dest.display().to_string(),
    ]
}

/// Arguments to decode the first video stream into constant-rate RGBA frames on stdout.
pub fn decode_args(source: &Path, info: &MediaInfo) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        source.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-r".to_string(),
        format_rate(info.fps),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "pipe:1".to_string(),
    ]
}

/// Arguments to encode RGBA frames from stdin and copy the source audio in.
/// The output is cut to the source duration.
pub fn encode_args(source: &Path, output: &Path, info: &MediaInfo, audio_codec: &str) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", info.width, info.height),
        "-r".to_string(),
        format_rate(info.fps),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-i".to_string(),
        source.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        audio_codec.to_string(),
    ];
    if audio_codec == "aac" {
        args.push("-b:a".to_string());
        args.push("192k".to_string());
    }
    args.extend([
        "-t".to_string(),
        format!("{:.3}", info.duration.as_secs_f64()),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]);
    args
}

/// `-r` value: integral rates without decimals.
fn format_rate(fps: f64) -> String {
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-6 {
        format!("{rounded:.0}")
    } else {
        format!("{fps:.6}")
    }
}

/// Run ffmpeg with `args`, killing it on cancellation or after `timeout`.
pub async fn run(args: &[String], mut cancel: watch::Receiver<bool>, timeout: Duration) -> Result<(), MediaError> {
    which::which("ffmpeg").map_err(|_| MediaError::ToolNotFound("ffmpeg"))?;
    debug!("Running FFmpeg: ffmpeg {}", args.join(" "));
    let mut child = tokio::process::Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let mut stderr = child.stderr.take();
    let collect = async move {
        let mut buf = String::new();
        if let Some(err) = stderr.as_mut() {
            let _ = err.read_to_string(&mut buf).await;
        }
        buf
    };

    let waited = tokio::select! {
        status = tokio::time::timeout(timeout, async {
            let (status, stderr) = tokio::join!(child.wait(), collect);
            (status, stderr)
        }) => status,
        _ = cancelled(&mut cancel) => {
            info!("FFmpeg cancelled, killing process");
            let _ = child.kill().await;
            return Err(MediaError::Cancelled);
        }
    };
    let (status, stderr) = match waited {
        Ok(done) => done,
        Err(_) => {
            warn!("FFmpeg timed out after {:?}, killing process", timeout);
            let _ = child.kill().await;
            return Err(MediaError::FfmpegFailed {
                message: format!("timed out after {timeout:?}"),
                exit_code: None,
            });
        }
    };
    let status = status?;
    if status.success() {
        Ok(())
    } else {
        Err(MediaError::FfmpegFailed {
            message: last_lines(&stderr),
            exit_code: status.code(),
        })
    }
}

/// Resolves once the flag is set; never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Last few non-empty stderr lines, for error messages.
fn last_lines(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(3)..];
    if tail.is_empty() {
        "exited with non-zero status".to_string()
    } else {
        tail.join(" | ")
    }
}

/// Decode, composite and re-encode `source` into `output`. Blocking: run it
/// on a blocking thread. ffmpeg diagnostics go to files under `log_dir`.
pub fn burn_blocking(
    source: &Path,
    output: &Path,
    info: &MediaInfo,
    compositor: &Compositor,
    audio_codec: &str,
    log_dir: &Path,
    cancel: &watch::Receiver<bool>,
) -> Result<BurnStats, MediaError> {
    trace!("burn_blocking(source={}, output={})", source.display(), output.display());
    which::which("ffmpeg").map_err(|_| MediaError::ToolNotFound("ffmpeg"))?;
    if info.width == 0 || info.height == 0 || info.fps <= 0.0 {
        return Err(MediaError::ProbeFailed(format!(
            "unusable video geometry {}x{} @ {}fps",
            info.width, info.height, info.fps
        )));
    }

    let decode_log = log_dir.join("decode.log");
    let encode_log = log_dir.join("encode.log");
    let decode = decode_args(source, info);
    let encode = encode_args(source, output, info, audio_codec);
    debug!("Running FFmpeg decoder: ffmpeg {}", decode.join(" "));
    debug!("Running FFmpeg encoder: ffmpeg {}", encode.join(" "));

    // both log files exist before any child is spawned
    let decode_stderr = File::create(&decode_log)?;
    let encode_stderr = File::create(&encode_log)?;
    let mut decoder = Command::new("ffmpeg")
        .args(&decode)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(decode_stderr))
        .spawn()?;
    let mut encoder = match Command::new("ffmpeg")
        .args(&encode)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::from(encode_stderr))
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            kill(&mut decoder);
            return Err(e.into());
        }
    };

    let pumped = pump_frames(&mut decoder, &mut encoder, info, compositor, cancel);
    let stats = match pumped {
        Ok(stats) => stats,
        Err(e) => {
            kill(&mut decoder);
            kill(&mut encoder);
            return match e {
                // the encoder went away; its log says why
                MediaError::Io(io) if io.kind() == io::ErrorKind::BrokenPipe => Err(MediaError::FfmpegFailed {
                    message: format!("encoder closed its input: {}", read_log(&encode_log)),
                    exit_code: None,
                }),
                other => Err(other),
            };
        }
    };

    let encoded = encoder.wait()?;
    let decoded = decoder.wait()?;
    if !decoded.success() {
        return Err(MediaError::FfmpegFailed {
            message: format!("decoder: {}", read_log(&decode_log)),
            exit_code: decoded.code(),
        });
    }
    if !encoded.success() {
        return Err(MediaError::FfmpegFailed {
            message: format!("encoder: {}", read_log(&encode_log)),
            exit_code: encoded.code(),
        });
    }
    if stats.frames == 0 {
        return Err(MediaError::FfmpegFailed {
            message: "decoder produced no frames".to_string(),
            exit_code: None,
        });
    }
    info!(
        "burned {} frame(s), {} with subtitles",
        stats.frames, stats.frames_with_overlay
    );
    Ok(stats)
}

/// Move frames from the decoder through the compositor into the encoder.
fn pump_frames(
    decoder: &mut Child,
    encoder: &mut Child,
    info: &MediaInfo,
    compositor: &Compositor,
    cancel: &watch::Receiver<bool>,
) -> Result<BurnStats, MediaError> {
    let frame_bytes = info.width as usize * info.height as usize * 4;
    let stdout = decoder
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "decoder stdout not captured"))?;
    let stdin = encoder
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "encoder stdin not captured"))?;
    let mut reader = BufReader::with_capacity(frame_bytes.max(1 << 16), stdout);
    let mut writer = BufWriter::with_capacity(frame_bytes.max(1 << 16), stdin);

    let mut stats = BurnStats::default();
    let mut buf = vec![0u8; frame_bytes];
    loop {
        if *cancel.borrow() {
            info!("burn cancelled after {} frame(s)", stats.frames);
            return Err(MediaError::Cancelled);
        }
        if !read_frame(&mut reader, &mut buf)? {
            break;
        }
        let t = Duration::from_secs_f64(stats.frames as f64 / info.fps);
        let mut frame = RgbaImage::from_raw(info.width, info.height, std::mem::take(&mut buf))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "short frame buffer"))?;
        if compositor.composite_frame(&mut frame, t) > 0 {
            stats.frames_with_overlay += 1;
        }
        buf = frame.into_raw();
        writer.write_all(&buf)?;
        stats.frames += 1;
    }
    // dropping the writer closes the encoder's stdin
    writer.flush()?;
    Ok(stats)
}

/// Fill `buf` with the next frame. `false` at end of stream; a trailing
/// partial frame is dropped.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Kill and reap a child, ignoring errors.
fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Tail of a log file written by ffmpeg.
fn read_log(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| last_lines(&s))
        .unwrap_or_else(|_| "no diagnostics".to_string())
}
