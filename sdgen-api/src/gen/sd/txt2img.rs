use crate::gen::sd::{lock, scheduler, single_output, SharedModels};
use crate::gen::{GenImageError, Pipeline, PipelineKind, PipelineOutput, PipelineParams};

use tch::{Kind, Tensor};

pub struct TextToImagePipeline {
    models: SharedModels,
}

impl TextToImagePipeline {
    pub fn new(models: SharedModels) -> Self {
        Self { models }
    }
}

impl Pipeline for TextToImagePipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::TextToImage
    }

    fn generate(&self, params: &PipelineParams) -> Result<PipelineOutput, GenImageError> {
        let models = lock(&self.models)?;
        let _no_grad_guard = tch::no_grad_guard();

        log::debug!(
            "[txt2img] generating {}x{} image for prompt \"{}\"",
            params.width,
            params.height,
            params.prompt
        );
        let scheduler = scheduler(params);
        let text_embeddings =
            models.text_embeddings(&params.prompt, params.negative_prompt.as_deref())?;

        tch::manual_seed(params.seed);
        let mut latents = Tensor::randn(
            &[1, 4, params.height as i64 / 8, params.width as i64 / 8],
            (Kind::Float, models.device),
        );
        latents *= scheduler.init_noise_sigma();

        for (idx, &timestep) in scheduler.timesteps().iter().enumerate() {
            log::trace!("[txt2img] timestep {}/{}", idx + 1, params.num_inference_steps);
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
