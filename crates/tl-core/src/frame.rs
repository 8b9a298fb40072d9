//! Timelines of image frames.

use crate::error::TimelineError;
use crate::layout::{BufferLayout, FrameLayout, PixelType};
use crate::limits::validate_frame_size;
use crate::timeline::Timeline;
use std::ops::Deref;
use std::sync::Arc;
use tl_memory::BufferManager;

/// Timeline whose buffers each hold one image frame.
///
/// All [`Timeline`] operations are available through `Deref`.
#[derive(Debug, Default)]
pub struct FrameTimeline {
    timeline: Timeline,
}

impl FrameTimeline {
    /// Unallocated frame timeline on the process-wide buffer manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeline: Timeline::new(),
        }
    }

    /// Unallocated frame timeline on `manager`.
    #[must_use]
    pub fn with_manager(manager: Arc<BufferManager>) -> Self {
        Self {
            timeline: Timeline::with_manager(manager),
        }
    }

    /// Size the pool for `width` x `height` frames of `components` samples
    /// of `pixel_type` per pixel.
    ///
    /// # Errors
    ///
    /// Rejects empty dimensions and frames beyond the hard limits in
    /// [`limits`](crate::limits).
    pub fn init_pool_size(
        &self,
        width: u32,
        height: u32,
        pixel_type: PixelType,
        components: u32,
    ) -> Result<FrameLayout, TimelineError> {
        for (name, value) in [("width", width), ("height", height), ("components", components)] {
            if value == 0 {
                return Err(TimelineError::EmptyLayout(name));
            }
        }

        let frame = FrameLayout {
            width,
            height,
            components,
            pixel_type,
        };
        let size = validate_frame_size(width, height, frame.bytes_per_pixel())?;
        self.timeline.init_layout(BufferLayout::Frame {
            frame,
            chunk_size: size.bytes,
        })?;
        Ok(frame)
    }

    /// Frame geometry, once configured.
    #[must_use]
    pub fn frame_layout(&self) -> Option<FrameLayout> {
        match self.timeline.layout() {
            Some(BufferLayout::Frame { frame, .. }) => Some(frame),
            _ => None,
        }
    }

    /// Frame width in pixels (0 if not configured).
    #[must_use]
    pub fn width(&self) -> u32 {
        self.frame_layout().map_or(0, |frame| frame.width)
    }

    /// Frame height in pixels (0 if not configured).
    #[must_use]
    pub fn height(&self) -> u32 {
        self.frame_layout().map_or(0, |frame| frame.height)
    }

    /// Components per pixel (0 if not configured).
    #[must_use]
    pub fn num_components(&self) -> u32 {
        self.frame_layout().map_or(0, |frame| frame.components)
    }

    /// Sample type, once configured.
    #[must_use]
    pub fn pixel_type(&self) -> Option<PixelType> {
        self.frame_layout().map(|frame| frame.pixel_type)
    }

    /// Underlying timeline.
    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}

impl Deref for FrameTimeline {
    type Target = Timeline;

    fn deref(&self) -> &Timeline {
        &self.timeline
    }
}

impl PartialEq for FrameTimeline {
    fn eq(&self, other: &Self) -> bool {
        self.timeline == other.timeline
    }
}
