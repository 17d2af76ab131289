//! How a leg spreads its 0-100 progress range over the model file and the preview images

/// Share of a leg's progress reserved for the model file
pub const MODEL_SHARE: f64 = 70.0;

/// Share of a leg's progress split across the preview images
pub const IMAGES_SHARE: f64 = 100.0 - MODEL_SHARE;

/// Leg progress while the model file is being transferred
pub fn model_progress(bytes_sent: u64, total_bytes: u64) -> f64 {
    if total_bytes == 0 {
        return MODEL_SHARE;
    }
    let fraction = (bytes_sent as f64 / total_bytes as f64).clamp(0.0, 1.0);
    fraction * MODEL_SHARE
}

/// Leg progress reported when image `index` (0-based) of `count` starts uploading
pub fn image_started(index: usize, count: usize) -> f64 {
    image_point(index, count)
}

/// Leg progress reported once image `index` (0-based) of `count` is stored
pub fn image_finished(index: usize, count: usize) -> f64 {
    image_point(index + 1, count)
}

fn image_point(done: usize, count: usize) -> f64 {
    if count == 0 {
        return 100.0;
    }
    let done = done.min(count);
    (MODEL_SHARE + IMAGES_SHARE * done as f64 / count as f64).clamp(0.0, 100.0)
}

/// Status line for an image step, 1-based for humans
pub fn image_message(verb: &str, index: usize, count: usize) -> String {
    format!("{} image {}/{}", verb, index + 1, count)
}
