use crate::gen::sd::{img2img::start_timestep, lock, scheduler, single_output, SharedModels};
use crate::gen::{GenImageError, Pipeline, PipelineKind, PipelineOutput, PipelineParams};

use image::{imageops::FilterType, DynamicImage};
use tch::{Kind, Tensor};

/// Inpainting on top of the regular 4 channel UNet: after every denoising
/// step the unmasked area is restored from the noised input latents.
pub struct InpaintPipeline {
    models: SharedModels,
}

impl InpaintPipeline {
    pub fn new(models: SharedModels) -> Self {
        Self { models }
    }
}

impl Pipeline for InpaintPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Inpaint
    }

    fn generate(&self, params: &PipelineParams) -> Result<PipelineOutput, GenImageError> {
        let init_image = params
            .init_image
            .as_ref()
            .ok_or(GenImageError::MissingInputImage(self.kind()))?;
        let mask_image = params
            .mask_image
            .as_ref()
            .ok_or(GenImageError::MissingMask(self.kind()))?;

        let models = lock(&self.models)?;
        let _no_grad_guard = tch::no_grad_guard();

        log::debug!(
            "[inpaint] generating image with strength {} for prompt \"{}\"",
            params.strength,
            params.prompt
        );
        let scheduler = scheduler(params);
        let text_embeddings =
            models.text_embeddings(&params.prompt, params.negative_prompt.as_deref())?;

        tch::manual_seed(params.seed);
        let init_latents = models.encode_image(init_image)?;
        let (_, _, latent_height, latent_width) = init_latents
            .size4()
            .map_err(|e| GenImageError::ImageConversion(e.into()))?;
        let keep = keep_mask(mask_image, latent_width, latent_height).to(models.device);
        let noise = init_latents.randn_like();

        let timesteps = scheduler.timesteps();
        let t_start = start_timestep(params.num_inference_steps, params.strength);
        let mut latents = match timesteps.get(t_start) {
            Some(&timestep) => scheduler.add_noise(&init_latents, noise.shallow_clone(), timestep),
            None => init_latents.shallow_clone(),
        };

        for (idx, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            log::trace!("[inpaint] timestep {}/{}", idx + 1, params.num_inference_steps);
            let noise_pred = models.predict_noise(
                &scheduler,
                &latents,
                timestep,
                &text_embeddings,
                params.guidance_scale,
            );
            latents = scheduler.step(&noise_pred, timestep, &latents);

            let init_latents_proper =
                scheduler.add_noise(&init_latents, noise.shallow_clone(), timestep);
            latents = &init_latents_proper * &keep + &latents * (1 - &keep);
        }

        let image = models.decode_latents(&latents)?;
        Ok(single_output(image, params))
    }
}

/// 1 where the original image is kept (dark mask pixels), 0 where it is
/// repainted, at latent resolution.
fn keep_mask(mask: &DynamicImage, width: i64, height: i64) -> Tensor {
    let mask = mask
        .resize_exact(width as u32, height as u32, FilterType::Nearest)
        .to_luma8();
    let mask = Tensor::of_slice(mask.as_raw())
        .view((1, 1, height, width))
        .to_kind(Kind::Float);
    let repaint = mask.ge(127.5).totype(Kind::Float);
    1 - repaint
}
