use image::{Rgb, RgbImage};
use rand::Rng;

pub const DEFAULT_SIZE: u32 = 512;

/// A canvas filled with a single random color.
pub fn canvas(width: u32, height: u32) -> RgbImage {
    let mut rng = rand::thread_rng();
    let color = Rgb([rng.gen(), rng.gen(), rng.gen()]);
    RgbImage::from_pixel(width, height, color)
}
