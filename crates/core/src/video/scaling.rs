//! Display layout for the 960×544 panel.
//!
//! Two modes, selected by the `stretch_video` setting:
//!
//! - **Stretch**: scale the active source region to the full panel,
//!   ignoring aspect ratio.
//! - **Preserve**: uniform scale `min(960/w, 544/h)` centered on the
//!   panel, clamped to 1.0 so small sources are never blown up.

/// Panel width in pixels.
pub const DISPLAY_WIDTH: u32 = 960;
/// Panel height in pixels.
pub const DISPLAY_HEIGHT: u32 = 544;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    Stretch,
    Preserve,
}

/// Where the frame lands on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the panel rectangle for a source frame.
pub fn layout(source_width: u32, source_height: u32, mode: ScaleMode) -> DisplayRect {
    if source_width == 0 || source_height == 0 {
        return DisplayRect {
            x: 0,
            y: 0,
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
        };
    }
    match mode {
        ScaleMode::Stretch => DisplayRect {
            x: 0,
            y: 0,
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
        },
        ScaleMode::Preserve => {
            let sx = DISPLAY_WIDTH as f64 / source_width as f64;
            let sy = DISPLAY_HEIGHT as f64 / source_height as f64;
            let scale = sx.min(sy).min(1.0);
            let width = (source_width as f64 * scale).round() as u32;
            let height = (source_height as f64 * scale).round() as u32;
            DisplayRect {
                x: (DISPLAY_WIDTH - width) / 2,
                y: (DISPLAY_HEIGHT - height) / 2,
                width,
                height,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stretch_fills_panel() {
        let r = layout(1280, 720, ScaleMode::Stretch);
        assert_eq!(
            r,
            DisplayRect {
                x: 0,
                y: 0,
                width: 960,
                height: 544
            }
        );
    }

    #[test]
    fn preserve_letterboxes_16_9() {
        let r = layout(1280, 720, ScaleMode::Preserve);
        assert_eq!(r.width, 960);
        assert_eq!(r.height, 540);
        assert_eq!(r.x, 0);
        assert_eq!(r.y, 2);
    }

    #[test]
    fn preserve_never_upscales() {
        let r = layout(640, 368, ScaleMode::Preserve);
        assert_eq!(r.width, 640);
        assert_eq!(r.height, 368);
        assert_eq!(r.x, (960 - 640) / 2);
        assert_eq!(r.y, (544 - 368) / 2);
    }

    #[test]
    fn preserve_pillarboxes_tall_source() {
        let r = layout(544, 960, ScaleMode::Preserve);
        assert!(r.width < 960);
        assert_eq!(r.height, 544);
        assert!(r.x > 0);
        assert_eq!(r.y, 0);
    }

    #[test]
    fn degenerate_source_falls_back_to_full_panel() {
        let r = layout(0, 0, ScaleMode::Preserve);
        assert_eq!(r.width, 960);
        assert_eq!(r.height, 544);
    }
}
