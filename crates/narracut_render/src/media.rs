use narracut_core::config::{AudioEncode, CanvasLayout, EngineConfig, VideoEncode};
use narracut_core::types::{TimeRange, TimeUs};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::canvas::FittedSize;
use crate::command::{run_tool, FfmpegCommand};
use crate::error::Result;
use crate::probe::{probe_duration, probe_media, MediaInfo};

/// Every media operation the engine performs. `Ffmpeg` is the real one;
/// tests swap in fakes.
///
/// Implementations must produce intermediate files with identical codec
/// parameters within one run so the concat demuxer can stream-copy them.
pub trait MediaBackend: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaInfo>;

    fn probe_duration(&self, path: &Path) -> Result<TimeUs> {
        Ok(self.probe(path)?.duration)
    }

    /// Re-encoded video-only clip of `range`.
    fn cut_video(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()>;

    /// Stream-copy concatenation, in order.
    fn concat_videos(&self, clips: &[PathBuf], output: &Path) -> Result<()>;

    /// Hold the last frame until the clip lasts `target`; copy when already long enough.
    fn freeze_to_duration(&self, input: &Path, target: TimeUs, output: &Path) -> Result<()>;

    /// Mux narration onto a clip, padding the audio with silence to the clip length.
    fn attach_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;

    /// Re-encoded clip with audio, for trim mode.
    fn export_clip(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()>;

    /// Convert to the intermediate PCM format.
    fn normalize_audio(&self, input: &Path, output: &Path) -> Result<()>;

    /// Intermediate-format silence.
    fn make_silence(&self, duration: TimeUs, output: &Path) -> Result<()>;

    /// Exact sub-range copy, timestamps reset to zero, no re-encode.
    fn slice_audio(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()>;

    /// Stream-copy concatenation of intermediate audio parts, in order.
    fn concat_audio(&self, parts: &[PathBuf], output: &Path) -> Result<()>;

    /// Encode intermediate audio into the master narration format.
    fn encode_master(&self, input: &Path, output: &Path) -> Result<()>;

    /// One JPEG still of the frame shown at `at`.
    fn extract_frame(&self, input: &Path, at: TimeUs, output: &Path) -> Result<()>;

    /// Scale `video` to `fitted` and center it on `background`, stretched to
    /// the canvas. Audio, when present, is carried over.
    fn composite_on_background(
        &self,
        video: &Path,
        background: &Path,
        canvas: &CanvasLayout,
        fitted: FittedSize,
        output: &Path,
    ) -> Result<()>;

    /// Raw `freezedetect` log output.
    fn detect_freezes(&self, input: &Path, noise: f64, min_duration: f64) -> Result<String>;

    /// Raw `silencedetect` log output.
    fn detect_silences(&self, input: &Path, noise_db: f64, min_duration: f64) -> Result<String>;

    /// File extension of the master narration file.
    fn master_extension(&self) -> &str;
}

// ---------------------------------------------------------------------------
// ffmpeg
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Ffmpeg {
    video: VideoEncode,
    audio: AudioEncode,
}

impl Ffmpeg {
    pub fn new(video: VideoEncode, audio: AudioEncode) -> Self {
        Self { video, audio }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.video_encode.clone(), config.audio_encode.clone())
    }

    fn x264(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.video_codec(&self.video.codec)
            .output_arg("-preset")
            .output_arg(&self.video.preset)
            .output_arg("-crf")
            .output_arg(self.video.crf.to_string())
            .output_arg("-pix_fmt")
            .output_arg("yuv420p")
    }

    fn pcm(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.output_arg("-vn")
            .output_arg("-ac")
            .output_arg(self.audio.channels.to_string())
            .output_arg("-ar")
            .output_arg(self.audio.sample_rate.to_string())
            .audio_codec("pcm_s16le")
    }

    pub fn cut_video_command(&self, input: &Path, range: TimeRange, output: &Path) -> FfmpegCommand {
        let cmd = FfmpegCommand::new()
            .seek(range.start.as_seconds())
            .until(range.end.as_seconds())
            .input(input);
        self.x264(cmd).output_arg("-an").output(output)
    }

    pub fn freeze_command(&self, input: &Path, pad: TimeUs, target: TimeUs, output: &Path) -> FfmpegCommand {
        let cmd = FfmpegCommand::new().input(input).video_filter(format!(
            "tpad=stop_mode=clone:stop_duration={:.3}",
            pad.as_seconds()
        ));
        self.x264(cmd)
            .output_arg("-an")
            .duration(target.as_seconds())
            .output(output)
    }

    pub fn attach_audio_command(&self, video: &Path, audio: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new()
            .input(video)
            .input(audio)
            .output_args(["-map", "0:v:0", "-map", "1:a:0"])
            .video_codec("copy")
            .audio_filter("apad")
            .audio_codec(&self.audio.attach_codec)
            .output_arg("-b:a")
            .output_arg(&self.audio.attach_bitrate)
            .output_arg("-ar")
            .output_arg(self.audio.attach_sample_rate.to_string())
            .output_arg("-shortest")
            .output(output)
    }

    pub fn export_clip_command(&self, input: &Path, range: TimeRange, output: &Path) -> FfmpegCommand {
        let cmd = FfmpegCommand::new()
            .seek(range.start.as_seconds())
            .until(range.end.as_seconds())
            .input(input);
        self.x264(cmd)
            .audio_codec(&self.audio.attach_codec)
            .output_arg("-b:a")
            .output_arg(&self.audio.attach_bitrate)
            .output_args(["-movflags", "+faststart"])
            .output(output)
    }

    pub fn slice_audio_command(&self, input: &Path, range: TimeRange, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new()
            .seek(range.start.as_seconds())
            .until(range.end.as_seconds())
            .input(input)
            .output_args(["-map", "0:a:0"])
            .audio_codec("copy")
            .output_args(["-avoid_negative_ts", "make_zero"])
            .output(output)
    }

    pub fn encode_master_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new()
            .input(input)
            .output_arg("-vn")
            .audio_codec(&self.audio.master_codec)
            .output_arg("-b:a")
            .output_arg(&self.audio.master_bitrate)
            .output(output)
    }

    pub fn extract_frame_command(&self, input: &Path, at: TimeUs, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new()
            .seek(at.as_seconds())
            .input(input)
            .output_args(["-frames:v", "1", "-q:v", "2", "-pix_fmt", "yuvj420p"])
            .output(output)
    }

    pub fn composite_command(
        &self,
        video: &Path,
        background: &Path,
        canvas: &CanvasLayout,
        fitted: FittedSize,
        output: &Path,
    ) -> FfmpegCommand {
        let graph = format!(
            "[0:v]scale={}:{},setsar=1[bg];[1:v]scale={}:{},setsar=1[fg];[bg][fg]overlay=(W-w)/2:(H-h)/2[v]",
            canvas.canvas_width, canvas.canvas_height, fitted.width, fitted.height
        );
        let cmd = FfmpegCommand::new()
            .input_arg("-loop")
            .input_arg("1")
            .input(background)
            .input(video)
            .output_args(["-filter_complex".to_string(), graph])
            .output_args(["-map", "[v]", "-map", "1:a?"]);
        self.x264(cmd)
            .audio_codec(&self.audio.attach_codec)
            .output_arg("-b:a")
            .output_arg(&self.audio.attach_bitrate)
            .output_args(["-shortest", "-movflags", "+faststart"])
            .output(output)
    }

    pub fn silence_command(&self, duration: TimeUs, output: &Path) -> FfmpegCommand {
        let layout = if self.audio.channels == 1 { "mono" } else { "stereo" };
        let cmd = FfmpegCommand::new()
            .lavfi(format!("anullsrc=r={}:cl={layout}", self.audio.sample_rate))
            .duration(duration.as_seconds());
        self.pcm(cmd).output(output)
    }
}

impl MediaBackend for Ffmpeg {
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        probe_media(path)
    }

    fn probe_duration(&self, path: &Path) -> Result<TimeUs> {
        probe_duration(path)
    }

    fn cut_video(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()> {
        self.cut_video_command(input, range, output).run()?;
        Ok(())
    }

    fn concat_videos(&self, clips: &[PathBuf], output: &Path) -> Result<()> {
        let list = concat_list_path(output);
        write_concat_list(clips, &list)?;
        FfmpegCommand::new()
            .input_arg("-f")
            .input_arg("concat")
            .input_arg("-safe")
            .input_arg("0")
            .input(&list)
            .output_args(["-c", "copy"])
            .output(output)
            .run()?;
        Ok(())
    }

    fn freeze_to_duration(&self, input: &Path, target: TimeUs, output: &Path) -> Result<()> {
        let current = self.probe_duration(input)?;
        if current >= target {
            std::fs::copy(input, output)?;
            return Ok(());
        }
        let pad = target - current;
        debug!(current = %current, target = %target, "Freezing last frame");
        self.freeze_command(input, pad, target, output).run()?;
        Ok(())
    }

    fn attach_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.attach_audio_command(video, audio, output).run()?;
        Ok(())
    }

    fn export_clip(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()> {
        self.export_clip_command(input, range, output).run()?;
        Ok(())
    }

    fn normalize_audio(&self, input: &Path, output: &Path) -> Result<()> {
        self.pcm(FfmpegCommand::new().input(input)).output(output).run()?;
        Ok(())
    }

    fn make_silence(&self, duration: TimeUs, output: &Path) -> Result<()> {
        self.silence_command(duration, output).run()?;
        Ok(())
    }

    fn slice_audio(&self, input: &Path, range: TimeRange, output: &Path) -> Result<()> {
        self.slice_audio_command(input, range, output).run()?;
        Ok(())
    }

    fn concat_audio(&self, parts: &[PathBuf], output: &Path) -> Result<()> {
        let list = concat_list_path(output);
        write_concat_list(parts, &list)?;
        FfmpegCommand::new()
            .input_arg("-f")
            .input_arg("concat")
            .input_arg("-safe")
            .input_arg("0")
            .input(&list)
            .output_args(["-c", "copy"])
            .output(output)
            .run()?;
        Ok(())
    }

    fn encode_master(&self, input: &Path, output: &Path) -> Result<()> {
        self.encode_master_command(input, output).run()?;
        Ok(())
    }

    fn extract_frame(&self, input: &Path, at: TimeUs, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.extract_frame_command(input, at, output).run()?;
        Ok(())
    }

    fn composite_on_background(
        &self,
        video: &Path,
        background: &Path,
        canvas: &CanvasLayout,
        fitted: FittedSize,
        output: &Path,
    ) -> Result<()> {
        self.composite_command(video, background, canvas, fitted, output)
            .run()?;
        Ok(())
    }

    fn detect_freezes(&self, input: &Path, noise: f64, min_duration: f64) -> Result<String> {
        let args = FfmpegCommand::new()
            .input(input)
            .video_filter(format!("freezedetect=n={noise}:d={min_duration}"))
            .output_args(["-map", "0:v:0", "-f", "null"])
            .build_args();
        let output = run_tool("ffmpeg", &args)?;
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }

    fn detect_silences(&self, input: &Path, noise_db: f64, min_duration: f64) -> Result<String> {
        let args = FfmpegCommand::new()
            .input(input)
            .audio_filter(format!("silencedetect=noise={noise_db}dB:d={min_duration}"))
            .output_args(["-vn", "-f", "null"])
            .build_args();
        let output = run_tool("ffmpeg", &args)?;
        Ok(String::from_utf8_lossy(&output.stderr).into_owned())
    }

    fn master_extension(&self) -> &str {
        &self.audio.master_extension
    }
}

fn concat_list_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "concat".into());
    output.with_file_name(format!("{stem}_list.txt"))
}

/// Concat demuxer input file, one `file '...'` line per entry.
pub fn write_concat_list(files: &[PathBuf], list_path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(list_path)?;
    for path in files {
        let absolute = std::path::absolute(path)?;
        let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
        writeln!(file, "file '{escaped}'")?;
    }
    Ok(())
}
