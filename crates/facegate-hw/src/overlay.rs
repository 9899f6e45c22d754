//! Operator feedback: draw detection overlays onto frames and export previews.

use crate::frame::Frame;
use std::path::Path;
use thiserror::Error;

const BOX_SHADE: u8 = 255;
const LANDMARK_SHADE: u8 = 0;
const LANDMARK_RADIUS: i64 = 2;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("frame buffer does not match {width}x{height}")]
    BadFrame { width: u32, height: u32 },
    #[error("failed to write preview: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A face outline in frame coordinates, decoupled from any detector type.
#[derive(Debug, Clone, Copy)]
pub struct FaceOutline {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

fn put(frame: &mut Frame, x: i64, y: i64, shade: u8) {
    if x < 0 || y < 0 || x >= frame.width as i64 || y >= frame.height as i64 {
        return;
    }
    let idx = y as usize * frame.width as usize + x as usize;
    if let Some(px) = frame.data.get_mut(idx) {
        *px = shade;
    }
}

/// Render the outline (rectangle plus landmark dots) in place.
pub fn draw_outline(frame: &mut Frame, outline: &FaceOutline) {
    let x0 = outline.x.round() as i64;
    let y0 = outline.y.round() as i64;
    let x1 = (outline.x + outline.width).round() as i64;
    let y1 = (outline.y + outline.height).round() as i64;

    for x in x0..=x1 {
        put(frame, x, y0, BOX_SHADE);
        put(frame, x, y1, BOX_SHADE);
    }
    for y in y0..=y1 {
        put(frame, x0, y, BOX_SHADE);
        put(frame, x1, y, BOX_SHADE);
    }

    for (lx, ly) in outline.landmarks.iter().flatten() {
        let (cx, cy) = (lx.round() as i64, ly.round() as i64);
        for dy in -LANDMARK_RADIUS..=LANDMARK_RADIUS {
            for dx in -LANDMARK_RADIUS..=LANDMARK_RADIUS {
                put(frame, cx + dx, cy + dy, LANDMARK_SHADE);
            }
        }
    }
}

/// Write a frame as an 8-bit grayscale image; the format follows the extension.
pub fn save_preview(frame: &Frame, path: &Path) -> Result<(), PreviewError> {
    let expected = frame.width as usize * frame.height as usize;
    if frame.data.len() < expected {
        return Err(PreviewError::BadFrame {
            width: frame.width,
            height: frame.height,
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data[..expected].to_vec()).ok_or(
        PreviewError::BadFrame {
            width: frame.width,
            height: frame.height,
        },
    )?;
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> Frame {
        Frame::new(vec![100; (w * h) as usize], w, h, 0)
    }

    #[test]
    fn test_outline_draws_box_edges() {
        let mut frame = blank(20, 20);
        draw_outline(
            &mut frame,
            &FaceOutline { x: 2.0, y: 3.0, width: 10.0, height: 8.0, landmarks: None },
        );
        let at = |x: usize, y: usize| frame.data[y * 20 + x];
        assert_eq!(at(2, 3), BOX_SHADE);
        assert_eq!(at(12, 11), BOX_SHADE);
        assert_eq!(at(7, 3), BOX_SHADE);
        assert_eq!(at(7, 7), 100, "interior is untouched");
    }

    #[test]
    fn test_outline_clips_at_frame_edges() {
        let mut frame = blank(10, 10);
        let landmarks = Some([(0.0, 0.0), (9.0, 9.0), (5.0, 5.0), (-4.0, 2.0), (20.0, 20.0)]);
        draw_outline(
            &mut frame,
            &FaceOutline { x: -5.0, y: -5.0, width: 30.0, height: 30.0, landmarks },
        );
        assert_eq!(frame.data.len(), 100);
        assert_eq!(frame.data[5 * 10 + 5], LANDMARK_SHADE);
    }

    #[test]
    fn test_save_preview_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/preview.png");
        save_preview(&blank(8, 6), &path).unwrap();
        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.get_pixel(3, 3).0[0], 100);
    }

    #[test]
    fn test_save_preview_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(vec![0; 5], 8, 6, 0);
        assert!(matches!(
            save_preview(&frame, &dir.path().join("p.png")),
            Err(PreviewError::BadFrame { .. })
        ));
    }
}
