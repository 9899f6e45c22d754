//! SCRFD face localisation: letterboxed input, anchor-free decode over three
//! strides, then non-maximum suppression.

use crate::detector::DetectorError;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Placement of the resized frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> (Self, usize, usize) {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).min(INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).min(INPUT_SIZE);
        let letterbox = Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) as f32 / 2.0,
            pad_y: (INPUT_SIZE - new_h) as f32 / 2.0,
        };
        (letterbox, new_w, new_h)
    }

    /// Model-input coordinates back to frame coordinates.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output indices for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD model session.
pub(crate) struct FaceLocator {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceLocator {
    pub(crate) fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                names.len()
            )));
        }
        let outputs = map_outputs(&names);
        tracing::info!(path = model_path, ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Faces in a grayscale frame, most confident first.
    pub(crate) fn locate(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return Err(DetectorError::InferenceFailed(format!(
                "frame buffer of {} bytes does not cover {w}x{h}",
                frame.len()
            )));
        }

        let (letterbox, new_w, new_h) = Letterbox::fit(w, h);
        let resized = resize_bilinear(frame, w, h, new_w, new_h);
        let input = to_tensor(&resized, new_w, new_h, &letterbox);

        let results = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[slot];
            let extract = |idx: usize, what: &str| {
                results[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let boxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;
            candidates.extend(decode_stride(&scores, &boxes, &kps, stride, &letterbox));
        }

        Ok(suppress(candidates, NMS_IOU))
    }
}

/// Output ordering by tensor name (`score_8`, `bbox_16`, ...), else the
/// conventional positional layout `[scores×3, bboxes×3, kps×3]`.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));

    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD outputs unnamed, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

fn resize_bilinear(src: &[u8], w: usize, h: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let sx = w as f32 / new_w as f32;
    let sy = h as f32 / new_h as f32;
    let mut out = vec![0u8; new_w * new_h];

    for y in 0..new_h {
        let fy_src = ((y as f32 + 0.5) * sy - 0.5).max(0.0);
        let y0 = (fy_src as usize).min(h - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fy = fy_src - y0 as f32;

        for x in 0..new_w {
            let fx_src = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
            let x0 = (fx_src as usize).min(w - 1);
            let x1 = (x0 + 1).min(w - 1);
            let fx = fx_src - x0 as f32;

            let top = src[y0 * w + x0] as f32 * (1.0 - fx) + src[y0 * w + x1] as f32 * fx;
            let bottom = src[y1 * w + x0] as f32 * (1.0 - fx) + src[y1 * w + x1] as f32 * fx;
            out[y * new_w + x] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// NCHW tensor with grey replicated over three channels. Padding uses the
/// mean so it normalises to zero.
fn to_tensor(resized: &[u8], new_w: usize, new_h: usize, letterbox: &Letterbox) -> Array4<f32> {
    let x_off = letterbox.pad_x.floor() as usize;
    let y_off = letterbox.pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside = (y_off..y_off + new_h).contains(&y) && (x_off..x_off + new_w).contains(&x);
            let pixel = if inside {
                resized[(y - y_off) * new_w + (x - x_off)] as f32
            } else {
                PIXEL_MEAN
            };
            let v = (pixel - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }
    tensor
}

fn decode_stride(scores: &[f32], boxes: &[f32], kps: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE / stride;
    let anchors = grid_w * (INPUT_SIZE / stride) * ANCHORS_PER_CELL;
    let s = stride as f32;
    let mut faces = Vec::new();

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= SCORE_THRESHOLD {
            continue;
        }
        let Some(b) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * s;
        let ay = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.to_frame(ax - b[0] * s, ay - b[1] * s);
        let (x2, y2) = letterbox.to_frame(ax + b[2] * s, ay + b[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.to_frame(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        faces.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    faces
}

fn suppress(mut faces: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| iou(k, &face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
