use serde::{Deserialize, Serialize};

use crate::db::types::SectionKind;
use crate::services::playback::BoundaryKind;
use crate::services::proctoring::CaptureRequest;

/// One playback time update. `visible` mirrors the page-visibility state of
/// the playback surface; hidden tabs never trigger captures.
#[derive(Debug, Deserialize)]
pub(crate) struct TickRequest {
    pub(crate) section: SectionKind,
    #[serde(alias = "videoIndex")]
    pub(crate) video_index: i32,
    #[serde(alias = "currentTime")]
    pub(crate) current_time_seconds: f64,
    #[serde(default = "default_visible")]
    pub(crate) visible: bool,
    #[serde(default)]
    pub(crate) boundary: Option<BoundaryKind>,
}

fn default_visible() -> bool {
    true
}

/// Instruction to the playback surface: grab the current frame, burn the
/// overlay in, and post it to the captures endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct CaptureDirective {
    pub(crate) section: SectionKind,
    pub(crate) video_index: i32,
    pub(crate) target_seconds: f64,
    pub(crate) fallback: bool,
    pub(crate) overlay: String,
}

impl CaptureDirective {
    pub(crate) fn from_request(request: &CaptureRequest, overlay: String) -> Self {
        Self {
            section: request.section,
            video_index: request.video_index,
            target_seconds: request.target_seconds,
            fallback: request.fallback,
            overlay,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TickResponse {
    pub(crate) capture: Option<CaptureDirective>,
    pub(crate) checkpointed: bool,
    pub(crate) flushed: bool,
}

/// `uploaded = false` means the proof photo was lost to an upload failure;
/// playback continues and a later qualifying crossing may retry.
#[derive(Debug, Serialize)]
pub(crate) struct CaptureUploadResponse {
    pub(crate) uploaded: bool,
    pub(crate) image_url: Option<String>,
    pub(crate) audit_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_request_defaults_visible_and_accepts_aliases() {
        let tick: TickRequest = serde_json::from_value(serde_json::json!({
            "section": "theory",
            "videoIndex": 2,
            "currentTime": 41.5
        }))
        .expect("deserialize");

        assert_eq!(tick.section, SectionKind::Theory);
        assert_eq!(tick.video_index, 2);
        assert_eq!(tick.current_time_seconds, 41.5);
        assert!(tick.visible);
        assert!(tick.boundary.is_none());
    }

    #[test]
    fn tick_request_parses_boundary_events() {
        let tick: TickRequest = serde_json::from_value(serde_json::json!({
            "section": "practice",
            "video_index": 0,
            "current_time_seconds": 12.0,
            "boundary": "video_end"
        }))
        .expect("deserialize");

        assert_eq!(tick.boundary, Some(BoundaryKind::VideoEnd));
    }
}
