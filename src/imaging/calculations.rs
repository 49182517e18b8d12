//! Pure calculation functions for frame geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate the size a source image is scaled to so it fits the panel.
///
/// The scale factor is `min(target_w / src_w, target_h / src_h)`, so large
/// images shrink and small images grow until one edge touches the panel
/// border. The bound edge matches the panel exactly; the other is computed in
/// integers and floored. Each edge is at least 1px.
///
/// # Examples
/// ```
/// # use photoframe::imaging::calculate_fit_dimensions;
/// // 4000x3000 photo on an 800x480 panel: height-bound
/// assert_eq!(calculate_fit_dimensions((4000, 3000), (800, 480)), (640, 480));
///
/// // 200x100 icon is upscaled: width-bound
/// assert_eq!(calculate_fit_dimensions((200, 100), (800, 480)), (800, 400));
/// ```
pub fn calculate_fit_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let (src_w, src_h) = (src_w.max(1) as u64, src_h.max(1) as u64);
    let (tgt_w64, tgt_h64) = (tgt_w as u64, tgt_h as u64);

    if src_w * tgt_h64 >= src_h * tgt_w64 {
        // Source is relatively wider: width touches the panel edge
        let h = (src_h * tgt_w64 / src_w) as u32;
        (tgt_w, h.clamp(1, tgt_h))
    } else {
        let w = (src_w * tgt_h64 / src_h) as u32;
        (w.clamp(1, tgt_w), tgt_h)
    }
}

/// Top-left offset that centers `inner` within `outer`.
pub fn calculate_center_offset(inner: (u32, u32), outer: (u32, u32)) -> (u32, u32) {
    (
        outer.0.saturating_sub(inner.0) / 2,
        outer.1.saturating_sub(inner.1) / 2,
    )
}

/// Thumbnail size for a given width, keeping the panel aspect ratio.
///
/// ```
/// # use photoframe::imaging::calculate_thumbnail_dimensions;
/// assert_eq!(calculate_thumbnail_dimensions((800, 480), 320), (320, 192));
/// ```
pub fn calculate_thumbnail_dimensions(panel: (u32, u32), width: u32) -> (u32, u32) {
    let (panel_w, panel_h) = panel;
    let h = (width as u64 * panel_h as u64 / panel_w as u64) as u32;
    (width, h.max(1))
}

/// Whether the image must be turned 90° to match the panel orientation.
///
/// Square images and square panels never rotate.
pub fn needs_quarter_turn(source: (u32, u32), panel: (u32, u32)) -> bool {
    let source_landscape = source.0 > source.1;
    let source_portrait = source.0 < source.1;
    let panel_landscape = panel.0 > panel.1;
    let panel_portrait = panel.0 < panel.1;
    (source_landscape && panel_portrait) || (source_portrait && panel_landscape)
}
