use crate::gen::sd::{lock, scheduler, single_output, SharedModels};
use crate::gen::{GenImageError, Pipeline, PipelineKind, PipelineOutput, PipelineParams};

pub struct ImageToImagePipeline {
    models: SharedModels,
}

impl ImageToImagePipeline {
    pub fn new(models: SharedModels) -> Self {
        Self { models }
    }
}

/// Index of the first timestep to denoise. With strength 0 nothing is
/// denoised, with strength 1 the whole schedule runs.
pub fn start_timestep(n_steps: usize, strength: f64) -> usize {
    n_steps.saturating_sub((n_steps as f64 * strength) as usize)
}

impl Pipeline for ImageToImagePipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::ImageToImage
    }

    fn generate(&self, params: &PipelineParams) -> Result<PipelineOutput, GenImageError> {
        let init_image = params
            .init_image
            .as_ref()
            .ok_or(GenImageError::MissingInputImage(self.kind()))?;

        let models = lock(&self.models)?;
        let _no_grad_guard = tch::no_grad_guard();

        log::debug!(
            "[img2img] generating image with strength {} for prompt \"{}\"",
            params.strength,
            params.prompt
        );
        let scheduler = scheduler(params);
        let text_embeddings =
            models.text_embeddings(&params.prompt, params.negative_prompt.as_deref())?;

        tch::manual_seed(params.seed);
        let init_latents = models.encode_image(init_image)?;

        let timesteps = scheduler.timesteps();
        let t_start = start_timestep(params.num_inference_steps, params.strength);
        let mut latents = match timesteps.get(t_start) {
            Some(&timestep) => {
                scheduler.add_noise(&init_latents, init_latents.randn_like(), timestep)
            }
            None => init_latents.shallow_clone(),
        };

        for (idx, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            log::trace!("[img2img] timestep {}/{}", idx + 1, params.num_inference_steps);
            let noise_pred = models.predict_noise(
                &scheduler,
                &latents,
                timestep,
                &text_embeddings,
                params.guidance_scale,
            );
            latents = scheduler.step(&noise_pred, timestep, &latents);
        }

        let image = models.decode_latents(&latents)?;
        Ok(single_output(image, params))
    }
}
