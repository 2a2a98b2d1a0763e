//! Eye-aspect-ratio and box overlap.

use crate::types::{BoundingBox, FaceLandmarks, Point};

fn distance(a: Point, b: Point) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Eye aspect ratio for six contour points ordered: outer corner, two upper
/// lid points, inner corner, two lower lid points.
///
/// `EAR = (|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)`
///
/// Returns 0.0 when the corners coincide, which reads as a closed eye.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let horizontal = distance(eye[0], eye[3]);
    if horizontal < f32::EPSILON {
        return 0.0;
    }
    let vertical_a = distance(eye[1], eye[5]);
    let vertical_b = distance(eye[2], eye[4]);
    (vertical_a + vertical_b) / (2.0 * horizontal)
}

/// Mean EAR of both eyes.
pub fn face_eye_aspect_ratio(landmarks: &FaceLandmarks) -> f32 {
    let left = eye_aspect_ratio(&landmarks.left_eye());
    let right = eye_aspect_ratio(&landmarks.right_eye());
    (left + right) / 2.0
}

/// Intersection-over-Union between two bounding boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
