//! Framing a recording on a background image.

use narracut_core::config::CanvasLayout;
use narracut_core::CoreError;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::media::MediaBackend;

/// Size the recording is scaled to before it is centered on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FittedSize {
    pub width: u32,
    pub height: u32,
}

/// Largest size with the recording's aspect ratio that fits inside the
/// canvas minus its margins. Both sides are rounded down to even numbers
/// so the result can be encoded as 4:2:0.
pub fn compute_layout(video_width: u32, video_height: u32, layout: &CanvasLayout) -> Result<FittedSize> {
    if video_width == 0 || video_height == 0 {
        return Err(CoreError::InvalidOperation(format!(
            "recording has no picture ({video_width}x{video_height})"
        ))
        .into());
    }
    let box_w = u64::from(layout.canvas_width.saturating_sub(layout.margin.saturating_mul(2)));
    let box_h = u64::from(layout.canvas_height.saturating_sub(layout.margin.saturating_mul(2)));
    if box_w == 0 || box_h == 0 {
        return Err(CoreError::InvalidOperation("layout.margin leaves no room on the canvas".into()).into());
    }
    let (vw, vh) = (u64::from(video_width), u64::from(video_height));

    // Wider than the box: the width is the limit.
    let (w, h) = if vw * box_h >= vh * box_w {
        (box_w, box_w * vh / vw)
    } else {
        (box_h * vw / vh, box_h)
    };
    Ok(FittedSize {
        width: even(w),
        height: even(h),
    })
}

fn even(side: u64) -> u32 {
    let side = u32::try_from(side).unwrap_or(u32::MAX);
    (side & !1).max(2)
}

/// Center `video` on `background` at the configured canvas size.
pub fn add_background(
    backend: &dyn MediaBackend,
    video: &Path,
    background: &Path,
    layout: &CanvasLayout,
    output: &Path,
) -> Result<FittedSize> {
    let info = backend.probe(video)?;
    let fitted = compute_layout(info.width, info.height, layout)?;
    info!(
        source = %format!("{}x{}", info.width, info.height),
        fitted = %format!("{}x{}", fitted.width, fitted.height),
        "Framing recording on background"
    );
    backend.composite_on_background(video, background, layout, fitted, output)?;
    Ok(fitted)
}
