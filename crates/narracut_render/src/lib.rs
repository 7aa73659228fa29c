//! Media side of the narration engine: ffmpeg plumbing, dead-zone trimming,
//! segment assembly, the narration pipeline, the surgical rebuilder and
//! screenshot guides.

pub mod assemble;
pub mod audio;
pub mod cancel;
pub mod canvas;
pub mod collab;
pub mod command;
pub mod deadzone;
pub mod error;
pub mod guide;
pub mod media;
pub mod pipeline;
pub mod probe;
pub mod rebuild;
pub mod workspace;

#[cfg(test)]
mod fake;

pub use assemble::{Assembler, AssemblyProgress, AssemblyReport, Pacing};
pub use cancel::CancelToken;
pub use canvas::{add_background, compute_layout, FittedSize};
pub use collab::{
    AudioLocation, LocalStorage, RemoteStorage, ScriptGenerator, Synthesizer, VideoRecord,
    VideoRepository, VideoUpdate,
};
pub use error::{RenderError, Result};
pub use guide::{Guide, GuideBuilder, GuideStep, GuideTarget};
pub use media::{Ffmpeg, MediaBackend};
pub use pipeline::{NarrationPipeline, PipelineMetadata, PipelineOutput};
pub use rebuild::{AudioOrigin, RebuildOutcome, SegmentChange, SurgicalRebuilder, SyncResult};
