use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

use crate::error::{RenderError, Result};

/// Argument builder for a single ffmpeg invocation.
///
/// Input options are attached to the input that follows them, so `-ss`/`-to`
/// placed before an input seek that input only.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCommand {
    inputs: Vec<(Vec<String>, String)>,
    pending_input_args: Vec<String>,
    output_args: Vec<String>,
    output: Option<PathBuf>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Option applied to the next input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.pending_input_args.push(arg.into());
        self
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        let args = std::mem::take(&mut self.pending_input_args);
        self.inputs
            .push((args, path.as_ref().to_string_lossy().into_owned()));
        self
    }

    /// A lavfi source such as `anullsrc=r=44100:cl=mono`.
    pub fn lavfi(self, graph: impl Into<String>) -> Self {
        let graph = graph.into();
        self.input_arg("-f").input_arg("lavfi").input(graph)
    }

    pub fn seek(self, start: f64) -> Self {
        self.input_arg("-ss").input_arg(secs(start))
    }

    pub fn until(self, end: f64) -> Self {
        self.input_arg("-to").input_arg(secs(end))
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(secs(seconds))
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];
        for (input_args, path) in &self.inputs {
            args.extend(input_args.iter().cloned());
            args.push("-i".to_string());
            args.push(path.clone());
        }
        args.extend(self.output_args.iter().cloned());
        match &self.output {
            Some(path) => args.push(path.to_string_lossy().into_owned()),
            None => args.push("-".to_string()),
        }
        args
    }

    pub fn run(&self) -> Result<Output> {
        run_tool("ffmpeg", &self.build_args())
    }
}

/// Seconds with millisecond precision, as ffmpeg expects them.
pub fn secs(seconds: f64) -> String {
    format!("{:.3}", seconds)
}

/// Run an external tool to completion, mapping a non-zero exit to
/// `ExternalToolFailure` with the command line and stderr.
pub fn run_tool(program: &str, args: &[String]) -> Result<Output> {
    let command_line = format!("{program} {}", args.join(" "));
    debug!(command = %command_line, "Running external tool");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && program == "ffmpeg" {
                RenderError::FfmpegNotFound
            } else {
                RenderError::tool_failure(command_line.clone(), &e.to_string())
            }
        })?;

    if !output.status.success() {
        return Err(RenderError::tool_failure(
            command_line,
            &String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(output)
}

/// Whether `ffmpeg` can be spawned at all.
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
