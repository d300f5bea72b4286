use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::debug;

use crate::{GenerationRequest, ModelLike};

/// Runs the model once per requested image, in order.
///
/// A seeded request gives image `i` the seed `seed + i`, so the batch stays
/// reproducible without repeating itself. The first failure aborts the batch
/// and the images produced so far are dropped.
pub fn generate_images(
    model: &dyn ModelLike,
    request: &GenerationRequest,
) -> Result<Vec<DynamicImage>> {
    let mut images = Vec::with_capacity(request.batch_size);
    let mut image_request = request.clone();
    for index in 0..request.batch_size {
        image_request.seed = request.seed.map(|seed| seed.wrapping_add(index as u64));
        debug!(
            index,
            batch_size = request.batch_size,
            seed = ?image_request.seed,
            "generating image"
        );
        let image = model
            .run(&image_request)
            .with_context(|| format!("image {} of {} failed", index + 1, request.batch_size))?;
        images.push(image);
    }
    Ok(images)
}
