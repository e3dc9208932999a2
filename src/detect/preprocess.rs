use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;

use crate::config::ChannelOrder;

/// Resize `image` to `size x size` and flatten it into model input floats.
///
/// Output is row-major and interleaved per pixel (`[S][S][3]`), each
/// component scaled to `[0, 1]`, with components written in `order`.
pub fn prepare_input(image: &RgbImage, size: u32, order: ChannelOrder) -> Vec<f32> {
    let resized: Cow<'_, RgbImage> = if image.dimensions() == (size, size) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(imageops::resize(image, size, size, FilterType::Triangle))
    };

    let channels = match order {
        ChannelOrder::Rgb => [0usize, 1, 2],
        ChannelOrder::Bgr => [2usize, 1, 0],
    };

    let mut input = Vec::with_capacity(resized.as_raw().len());
    for pixel in resized.pixels() {
        for &channel in &channels {
            input.push(f32::from(pixel.0[channel]) / 255.0);
        }
    }
    input
}
