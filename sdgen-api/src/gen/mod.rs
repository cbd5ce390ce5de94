mod mock;
mod pipeline;
#[cfg(feature = "sd")]
pub mod sd;

pub use pipeline::{
    GenImageError, Pipeline, PipelineKind, PipelineOutput, PipelineParams, PipelineSet, Seeder,
    DEFAULT_SEED,
};

use crate::{config::Config, paths, Error, InnerAppState, Result};
use sdgen_core::{GenerationRequest, GenerationResult};

use image::{DynamicImage, RgbImage};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Loads the Stable Diffusion pipelines unless mock mode is enabled.
pub fn load_pipelines(config: &Config) -> Result<Option<PipelineSet>> {
    if config.mock_sd {
        log::info!("mock mode enabled, skipping model initialization");
        return Ok(None);
    }
    load_models(config).map(Some)
}

#[cfg(feature = "sd")]
fn load_models(config: &Config) -> Result<PipelineSet> {
    Ok(sd::load(&config.model_dir)?)
}

#[cfg(not(feature = "sd"))]
fn load_models(_config: &Config) -> Result<PipelineSet> {
    log::error!("built without the `sd` feature, only mock mode is available");
    Err(Error::PipelinesUnavailable)
}

/// Validates `body`, generates one image and saves it under the user's
/// images directory.
///
/// Invalid input and missing input images come back as errors for which
/// [`Error::is_rejection`] holds; nothing is written to disk in that case.
pub async fn generate_and_save_image(
    state: &InnerAppState,
    body: &Value,
) -> Result<GenerationResult> {
    let request = GenerationRequest::from_json(body)?;

    log::info!("{}", json!({ "generatorInputs": &request }));

    if state.config.mock_sd {
        return generate_mock(state, request).await;
    }

    let pipelines = state
        .pipelines
        .as_ref()
        .ok_or(Error::PipelinesUnavailable)?;

    let seed = request
        .seed
        .as_deref()
        .map(|seed| {
            seed.trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidSeed(seed.to_string()))
        })
        .transpose()?;
    let seed = state.seeder.resolve(seed);

    let (kind, params) = match request.init_image_path.as_deref() {
        Some(init_image_path) => {
            let init_image = open_image(init_image_path, Error::InputImageNotFound)?;
            let mask_image = request
                .mask_image_path
                .as_deref()
                .map(|path| open_image(path, Error::MaskImageNotFound))
                .transpose()?;
            let kind = if mask_image.is_some() {
                PipelineKind::Inpaint
            } else {
                PipelineKind::ImageToImage
            };

            let params = PipelineParams {
                height: init_image.height(),
                width: init_image.width(),
                init_image: Some(init_image),
                mask_image,
                ..params_from(&request, seed)
            };
            (kind, params)
        }
        None => (PipelineKind::TextToImage, params_from(&request, seed)),
    };

    let pipeline = pipelines.get(kind);
    let user_dir = state.config.user_dir.clone();
    let user_uuid = request.user_uuid;

    let (path, has_nsfw) =
        tokio::task::spawn_blocking(move || run_pipeline(pipeline, &params, &user_dir, &user_uuid))
            .await??;

    Ok(GenerationResult {
        file_path: path.to_string_lossy().into_owned(),
        has_nsfw,
    })
}

async fn generate_mock(
    state: &InnerAppState,
    request: GenerationRequest,
) -> Result<GenerationResult> {
    let (mut width, mut height) = (mock::DEFAULT_SIZE, mock::DEFAULT_SIZE);

    if let Some(init_image_path) = request.init_image_path.as_deref() {
        let init_image = open_image(init_image_path, Error::InputImageNotFound)?;
        width = init_image.width();
        height = init_image.height();
    }
    if let Some(mask_image_path) = request.mask_image_path.as_deref() {
        ensure_exists(mask_image_path, Error::MaskImageNotFound)?;
    }

    tokio::time::sleep(state.config.mock_delay()).await;

    let image = mock::canvas(width, height);
    let user_dir = state.config.user_dir.clone();
    let user_uuid = request.user_uuid;
    let path =
        tokio::task::spawn_blocking(move || save_image(&image, &user_dir, &user_uuid)).await??;

    Ok(GenerationResult {
        file_path: path.to_string_lossy().into_owned(),
        has_nsfw: false,
    })
}

fn params_from(request: &GenerationRequest, seed: i64) -> PipelineParams {
    PipelineParams {
        prompt: request.prompt.clone(),
        negative_prompt: request.negative_prompt.clone(),
        init_image: None,
        mask_image: None,
        height: request.height.unwrap_or(mock::DEFAULT_SIZE),
        width: request.width.unwrap_or(mock::DEFAULT_SIZE),
        strength: request.strength.unwrap_or(0.0),
        num_inference_steps: request.num_inference_steps,
        guidance_scale: request.guidance_scale,
        eta: request.eta,
        seed,
        output_type: request.output_type.clone(),
        return_dict: request.return_dict,
        allow_nsfw: request.allow_nsfw,
    }
}

fn run_pipeline(
    pipeline: Arc<dyn Pipeline>,
    params: &PipelineParams,
    user_dir: &Path,
    user_uuid: &str,
) -> Result<(PathBuf, bool)> {
    log::debug!("[{}] running pipeline for user {user_uuid}", pipeline.kind());
    let (image, has_nsfw) = pipeline.generate(params)?.into_first()?;
    let path = save_image(&image, user_dir, user_uuid)?;
    Ok((path, has_nsfw))
}

fn save_image(image: &RgbImage, user_dir: &Path, user_uuid: &str) -> Result<PathBuf> {
    let path = paths::user_image_path(user_dir, user_uuid)?;
    log::debug!("saving image to {}", path.display());
    image.save(&path)?;
    Ok(path)
}

fn ensure_exists(path: &str, err: fn(PathBuf) -> Error) -> Result<()> {
    let path = Path::new(path);
    if !path.exists() {
        log::error!("No image found at {}", path.display());
        return Err(err(path.to_path_buf()));
    }
    Ok(())
}

fn open_image(path: &str, err: fn(PathBuf) -> Error) -> Result<DynamicImage> {
    ensure_exists(path, err)?;
    Ok(image::open(path)?)
}
