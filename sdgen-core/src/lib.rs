pub mod image;

pub use image::{GenerationRequest, GenerationResult, RequestError};
