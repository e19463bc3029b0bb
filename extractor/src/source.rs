use std::ffi::OsStr;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use slidedeck_common::frame::Frame;
use tracing::{debug, error, warn};

/// Bytes of decoder diagnostics kept for error reports.
const STDERR_TAIL: usize = 8 * 1024;

/// Sequential decoder feeding the pipeline.
pub trait FrameSource {
    /// Nominal frames per second, truncated. May be zero.
    fn frame_rate(&self) -> u32;

    /// Next frame in increasing index order, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to probe video stream: {0}")]
    Probe(String),
    #[error("failed to read decoded frame: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoder stopped mid-frame after {got} of {expected} bytes")]
    Truncated { got: usize, expected: usize },
    #[error("decoder exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },
}

/// Stream parameters reported by `ffprobe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Runs `ffprobe` on the first video stream of `path`.
pub fn probe(path: &Path) -> Result<VideoParams, DecodeError> {
    probe_with(OsStr::new("ffprobe"), path)
}

fn probe_with(ffprobe: &OsStr, path: &Path) -> Result<VideoParams, DecodeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate",
            "-of", "default=noprint_wrappers=1:nokey=0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DecodeError::Spawn {
            program: ffprobe.to_string_lossy().into_owned(),
            source,
        })?;

    if !output.status.success() {
        return Err(DecodeError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses `key=value` lines from `ffprobe`. The frame rate is truncated to
/// an integer; a zero denominator yields zero.
pub fn parse_probe_output(stdout: &str) -> Result<VideoParams, DecodeError> {
    let mut width = None;
    let mut height = None;
    let mut fps = None;

    for line in stdout.lines().map(str::trim) {
        if let Some(val) = line.strip_prefix("width=") {
            width = val.parse::<u32>().ok();
        } else if let Some(val) = line.strip_prefix("height=") {
            height = val.parse::<u32>().ok();
        } else if let Some(val) = line.strip_prefix("r_frame_rate=") {
            let mut parts = val.splitn(2, '/');
            let num: f64 = parts.next().unwrap_or("0").parse().unwrap_or(0.0);
            let den: f64 = parts.next().unwrap_or("1").parse().unwrap_or(1.0);
            let rate = if den > 0.0 { num / den } else { 0.0 };
            fps = Some(if rate.is_finite() && rate > 0.0 { rate as u32 } else { 0 });
        }
    }

    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok(VideoParams {
            width: w,
            height: h,
            fps: fps.unwrap_or(0),
        }),
        _ => Err(DecodeError::Probe(
            "no video stream with usable dimensions".into(),
        )),
    }
}

/// Decodes a local file through an `ffmpeg` child process emitting raw RGB24.
///
/// The child is killed and reaped on drop if the stream was not read to the end.
/// Its stderr is drained on a helper thread so a chatty decoder never stalls
/// on a full pipe.
pub struct FfmpegSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    params: VideoParams,
    next_index: u64,
    finished: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        Self::open_with(OsStr::new("ffprobe"), OsStr::new("ffmpeg"), path)
    }

    fn open_with(ffprobe: &OsStr, ffmpeg: &OsStr, path: &Path) -> Result<Self, DecodeError> {
        let params = probe_with(ffprobe, path)?;
        let spawn_error = |source| DecodeError::Spawn {
            program: ffmpeg.to_string_lossy().into_owned(),
            source,
        };

        let mut child = Command::new(ffmpeg)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map", "0:v:0",
                "-fps_mode", "passthrough",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let handles = child
            .stdout
            .take()
            .zip(child.stderr.take())
            .ok_or_else(|| std::io::Error::new(ErrorKind::Other, "could not get stdio handles"))
            .and_then(|(stdout, stderr)| {
                thread::Builder::new()
                    .name("ffmpeg-stderr".into())
                    .spawn(move || drain_stderr(stderr))
                    .map(|reader| (stdout, reader))
            });
        let (stdout, stderr) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                reap(&mut child);
                return Err(spawn_error(e));
            }
        };

        debug!(
            path = %path.display(),
            width = params.width,
            height = params.height,
            fps = params.fps,
            "ffmpeg decoder started"
        );

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(Frame::buffer_len(params.width, params.height), stdout),
            stderr: Some(stderr),
            params,
            next_index: 0,
            finished: false,
        })
    }

    #[cfg(test)]
    fn params(&self) -> VideoParams {
        self.params
    }

    /// Reaps the child after stdout closed and reports a failed exit.
    fn finish(&mut self) -> Result<(), DecodeError> {
        self.finished = true;
        let status = self.child.wait()?;
        let stderr = self.join_stderr();
        if status.success() {
            debug!(frames = self.next_index, "ffmpeg decoder finished");
            return Ok(());
        }
        error!(status = %status, stderr = %stderr.trim(), "ffmpeg exited with error");
        Err(DecodeError::Exited {
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    fn join_stderr(&mut self) -> String {
        match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(tail)) => tail,
            Some(Err(_)) => {
                warn!("ffmpeg stderr reader panicked");
                String::new()
            }
            None => String::new(),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> u32 {
        self.params.fps
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }

        let expected = Frame::buffer_len(self.params.width, self.params.height);
        let mut rgb = vec![0u8; expected];
        let got = read_full(&mut self.stdout, &mut rgb)?;
        if got == 0 {
            self.finish()?;
            return Ok(None);
        }
        if got < expected {
            self.finish()?;
            return Err(DecodeError::Truncated { got, expected });
        }

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Frame {
            index,
            width: self.params.width,
            height: self.params.height,
            rgb,
        }))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        reap(&mut self.child);
        self.join_stderr();
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "ffmpeg already exited");
    }
    if let Err(e) = child.wait() {
        debug!(error = %e, "failed to reap ffmpeg");
    }
}

/// Reads `pipe` to end of file, keeping only the last [`STDERR_TAIL`] bytes.
fn drain_stderr(mut pipe: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > 2 * STDERR_TAIL {
                    tail.drain(..tail.len() - STDERR_TAIL);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "failed to read ffmpeg stderr");
                break;
            }
        }
    }
    let start = tail.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&tail[start..]).into_owned()
}

/// Fills `buf` until it is full or the reader hits end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
