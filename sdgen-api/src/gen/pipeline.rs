use image::{DynamicImage, RgbImage};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Initial seed of a freshly created torch CUDA generator.
pub const DEFAULT_SEED: i64 = 67280421310721;

#[derive(Debug, thiserror::Error)]
pub enum GenImageError {
    #[error("CUDA device is not available")]
    CudaUnavailable,
    #[error("failed to load {0} - {1}")]
    ModelLoad(&'static str, anyhow::Error),
    #[error("failed to encode prompt - {0}")]
    PromptEncode(anyhow::Error),
    #[error("failed to convert image - {0}")]
    ImageConversion(anyhow::Error),
    #[error("{0} pipeline requires an input image")]
    MissingInputImage(PipelineKind),
    #[error("{0} pipeline requires a mask image")]
    MissingMask(PipelineKind),
    #[error("pipeline returned no images")]
    EmptyOutput,
    #[error("model lock poisoned")]
    Poisoned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    TextToImage,
    ImageToImage,
    Inpaint,
}

impl AsRef<str> for PipelineKind {
    fn as_ref(&self) -> &str {
        match self {
            PipelineKind::TextToImage => "txt2img",
            PipelineKind::ImageToImage => "img2img",
            PipelineKind::Inpaint => "inpaint",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Clone, Debug)]
pub struct PipelineParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub init_image: Option<DynamicImage>,
    pub mask_image: Option<DynamicImage>,
    pub height: u32,
    pub width: u32,
    pub strength: f64,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub eta: f64,
    pub seed: i64,
    pub output_type: String,
    pub return_dict: bool,
    pub allow_nsfw: bool,
}

/// Batch shaped result of a pipeline run.
#[derive(Clone, Debug, Default)]
pub struct PipelineOutput {
    pub images: Vec<RgbImage>,
    pub nsfw_content_detected: Vec<bool>,
}

impl PipelineOutput {
    pub fn into_first(self) -> Result<(RgbImage, bool), GenImageError> {
        let has_nsfw = self.nsfw_content_detected.first().copied().unwrap_or(false);
        self.images
            .into_iter()
            .next()
            .map(|image| (image, has_nsfw))
            .ok_or(GenImageError::EmptyOutput)
    }
}

/// A diffusion pipeline variant. Implementations block for the whole
/// sampling loop.
pub trait Pipeline: Send + Sync {
    fn kind(&self) -> PipelineKind;
    fn generate(&self, params: &PipelineParams) -> Result<PipelineOutput, GenImageError>;
}

#[derive(Clone)]
pub struct PipelineSet {
    txt2img: Arc<dyn Pipeline>,
    img2img: Arc<dyn Pipeline>,
    inpaint: Arc<dyn Pipeline>,
}

impl PipelineSet {
    pub fn new(
        txt2img: Arc<dyn Pipeline>,
        img2img: Arc<dyn Pipeline>,
        inpaint: Arc<dyn Pipeline>,
    ) -> Self {
        Self {
            txt2img,
            img2img,
            inpaint,
        }
    }

    pub fn get(&self, kind: PipelineKind) -> Arc<dyn Pipeline> {
        match kind {
            PipelineKind::TextToImage => self.txt2img.clone(),
            PipelineKind::ImageToImage => self.img2img.clone(),
            PipelineKind::Inpaint => self.inpaint.clone(),
        }
    }
}

/// Process wide seed state. A request without a seed reuses the last one.
pub struct Seeder {
    current: Mutex<i64>,
}

impl Default for Seeder {
    fn default() -> Self {
        Self {
            current: Mutex::new(DEFAULT_SEED),
        }
    }
}

impl Seeder {
    pub fn resolve(&self, seed: Option<i64>) -> i64 {
        let mut current = match self.current.lock() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(seed) = seed {
            *current = seed;
        }
        *current
    }
}
