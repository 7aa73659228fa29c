use narracut_core::script::{GeneratedScript, ScriptDocument};
use narracut_render::{RenderError, Result, ScriptGenerator, Synthesizer};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Text-to-speech through an external program. The text arrives on stdin and
/// the output path is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line. `None` when empty.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self::new(program, words.collect()))
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str, output: &Path) -> Result<()> {
        debug!(program = %self.program, output = %output.display(), "Synthesizing");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RenderError::Synthesis(format!("{}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| RenderError::Synthesis(format!("{}: {e}", self.program)))?;
        }
        let result = child.wait_with_output()?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(RenderError::Synthesis(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }
        if !output.exists() {
            return Err(RenderError::Synthesis(format!(
                "{} wrote nothing to {}",
                self.program,
                output.display()
            )));
        }
        Ok(())
    }
}

/// Reads a prepared script instead of asking a model for one. Accepts either a
/// bare generated script or a saved script document.
#[derive(Debug, Clone)]
pub struct FileScriptGenerator {
    path: PathBuf,
}

impl FileScriptGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScriptGenerator for FileScriptGenerator {
    fn generate(&self, _video: &Path) -> Result<GeneratedScript> {
        let data = std::fs::read_to_string(&self.path)?;
        if let Ok(script) = serde_json::from_str::<GeneratedScript>(&data) {
            return Ok(script);
        }
        let document: ScriptDocument = serde_json::from_str(&data).map_err(|e| {
            RenderError::ScriptGeneration(format!("{}: {e}", self.path.display()))
        })?;
        Ok(GeneratedScript {
            script_timeline: document.script,
            cleanup_segments: document.cleanup_segments,
        })
    }
}
