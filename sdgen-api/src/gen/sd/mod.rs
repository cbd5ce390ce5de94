//! Stable Diffusion v1.x pipelines built on `diffusers` and `tch`.
//!
//! The tokenizer, text encoder, autoencoder and UNet are loaded once and
//! shared by all three pipelines, which lock them for the duration of a run.
mod img2img;
mod inpaint;
mod txt2img;

pub use img2img::ImageToImagePipeline;
pub use inpaint::InpaintPipeline;
pub use txt2img::TextToImagePipeline;

use crate::gen::{GenImageError, PipelineOutput, PipelineParams, PipelineSet};

use diffusers::models::unet_2d::UNet2DConditionModel;
use diffusers::models::vae::AutoEncoderKL;
use diffusers::pipelines::stable_diffusion;
use diffusers::schedulers::ddim::{DDIMScheduler, DDIMSchedulerConfig};
use diffusers::schedulers::BetaSchedule;
use diffusers::transformers::clip;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tch::{nn::Module, Device, Kind, Tensor};

pub const LATENTS_SCALE: f64 = 0.18215;

const CLIP_WEIGHTS: &str = "clip.safetensors";
const VAE_WEIGHTS: &str = "vae.safetensors";
const UNET_WEIGHTS: &str = "unet.safetensors";
const VOCAB_FILE: &str = "bpe_simple_vocab_16e6.txt";

pub struct SubModels {
    tokenizer: clip::Tokenizer,
    text_model: clip::ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
    device: Device,
}

pub type SharedModels = Arc<Mutex<SubModels>>;

/// Loads the weights found in `model_dir` onto the first CUDA device and
/// derives the three pipelines from them.
pub fn load(model_dir: &Path) -> Result<PipelineSet, GenImageError> {
    tch::maybe_init_cuda();
    log::info!("Cuda available: {}", tch::Cuda::is_available());
    log::info!("Cudnn available: {}", tch::Cuda::cudnn_is_available());
    if !tch::Cuda::is_available() {
        return Err(GenImageError::CudaUnavailable);
    }
    let device = Device::Cuda(0);

    let sd_config = stable_diffusion::StableDiffusionConfig::v1_5(None, None, None);
    let weights = |file: &str| model_dir.join(file).to_string_lossy().into_owned();

    log::info!("loading models from {}", model_dir.display());
    let tokenizer = clip::Tokenizer::create(model_dir.join(VOCAB_FILE), &sd_config.clip)
        .map_err(|e| GenImageError::ModelLoad("clip tokenizer", e))?;

    log::debug!("building the clip transformer");
    let text_model = sd_config
        .build_clip_transformer(&weights(CLIP_WEIGHTS), device)
        .map_err(|e| GenImageError::ModelLoad("clip transformer", e))?;

    log::debug!("building the autoencoder");
    let vae = sd_config
        .build_vae(&weights(VAE_WEIGHTS), device)
        .map_err(|e| GenImageError::ModelLoad("autoencoder", e))?;

    log::debug!("building unet");
    let unet = sd_config
        .build_unet(&weights(UNET_WEIGHTS), device, 4)
        .map_err(|e| GenImageError::ModelLoad("unet", e))?;

    let models: SharedModels = Arc::new(Mutex::new(SubModels {
        tokenizer,
        text_model,
        vae,
        unet,
        device,
    }));

    Ok(PipelineSet::new(
        Arc::new(TextToImagePipeline::new(models.clone())),
        Arc::new(ImageToImagePipeline::new(models.clone())),
        Arc::new(InpaintPipeline::new(models)),
    ))
}

pub(crate) fn lock(models: &SharedModels) -> Result<MutexGuard<'_, SubModels>, GenImageError> {
    models.lock().map_err(|_| GenImageError::Poisoned)
}

impl SubModels {
    fn tokenize(&self, text: &str) -> Result<Tensor, GenImageError> {
        let tokens = self
            .tokenizer
            .encode(text)
            .map_err(GenImageError::PromptEncode)?;
        let tokens: Vec<i64> = tokens.into_iter().map(|x| x as i64).collect();
        Ok(Tensor::of_slice(&tokens).view((1, -1)).to(self.device))
    }

    /// Unconditional (negative prompt) and conditional embeddings stacked for
    /// classifier free guidance.
    pub fn text_embeddings(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> Result<Tensor, GenImageError> {
        let tokens = self.tokenize(prompt)?;
        let uncond_tokens = self.tokenize(negative_prompt.unwrap_or(""))?;

        let text_embeddings = self.text_model.forward(&tokens);
        let uncond_embeddings = self.text_model.forward(&uncond_tokens);
        Ok(Tensor::cat(&[uncond_embeddings, text_embeddings], 0))
    }

    pub fn predict_noise(
        &self,
        scheduler: &DDIMScheduler,
        latents: &Tensor,
        timestep: usize,
        text_embeddings: &Tensor,
        guidance_scale: f64,
    ) -> Tensor {
        let latent_model_input = Tensor::cat(&[latents, latents], 0);
        let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep);
        let noise_pred = self
            .unet
            .forward(&latent_model_input, timestep as f64, text_embeddings);
        let noise_pred = noise_pred.chunk(2, 0);
        let (noise_pred_uncond, noise_pred_text) = (&noise_pred[0], &noise_pred[1]);
        noise_pred_uncond + (noise_pred_text - noise_pred_uncond) * guidance_scale
    }

    pub fn encode_image(&self, image: &DynamicImage) -> Result<Tensor, GenImageError> {
        let image = image_preprocess(image)?.to(self.device);
        Ok(self.vae.encode(&image).sample() * LATENTS_SCALE)
    }

    pub fn decode_latents(&self, latents: &Tensor) -> Result<RgbImage, GenImageError> {
        let decoded = self.vae.decode(&(latents / LATENTS_SCALE));
        let decoded = (decoded / 2 + 0.5).clamp(0., 1.).to_device(Device::Cpu);
        let decoded = (decoded * 255.)
            .to_kind(Kind::Uint8)
            .squeeze_dim(0)
            .permute(&[1, 2, 0])
            .contiguous();
        let (height, width, _) = decoded.size3().map_err(conversion)?;
        let data = Vec::<u8>::try_from(&decoded.flatten(0, -1)).map_err(conversion)?;
        RgbImage::from_raw(width as u32, height as u32, data).ok_or_else(|| {
            GenImageError::ImageConversion(anyhow::anyhow!("decoded buffer has the wrong size"))
        })
    }
}

pub fn scheduler(params: &PipelineParams) -> DDIMScheduler {
    DDIMScheduler::new(
        params.num_inference_steps,
        DDIMSchedulerConfig {
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaSchedule::ScaledLinear,
            eta: params.eta,
            ..Default::default()
        },
    )
}

pub fn single_output(image: RgbImage, params: &PipelineParams) -> PipelineOutput {
    log::debug!(
        "output_type={} return_dict={} allow_nsfw={} (no safety checker)",
        params.output_type,
        params.return_dict,
        params.allow_nsfw
    );
    PipelineOutput {
        images: vec![image],
        nsfw_content_detected: vec![false],
    }
}

/// Size of the image after rounding both sides down to a multiple of 32.
pub fn latent_friendly_size(image: &DynamicImage) -> Result<(u32, u32), GenImageError> {
    let width = image.width() - image.width() % 32;
    let height = image.height() - image.height() % 32;
    if width == 0 || height == 0 {
        return Err(GenImageError::ImageConversion(anyhow::anyhow!(
            "image must be at least 32x32, got {}x{}",
            image.width(),
            image.height()
        )));
    }
    Ok((width, height))
}

fn image_preprocess(image: &DynamicImage) -> Result<Tensor, GenImageError> {
    let (width, height) = latent_friendly_size(image)?;
    let image = image
        .resize_exact(width, height, FilterType::Lanczos3)
        .to_rgb8();
    let image = Tensor::of_slice(image.as_raw())
        .view((height as i64, width as i64, 3))
        .permute(&[2, 0, 1])
        .to_kind(Kind::Float);
    Ok((image / 255. * 2. - 1.).unsqueeze(0))
}

fn conversion(e: tch::TchError) -> GenImageError {
    GenImageError::ImageConversion(e.into())
}
