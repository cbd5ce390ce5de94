use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_NUM_INFERENCE_STEPS: usize = 30;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 9.0;
pub const DEFAULT_ETA: f64 = 0.0;
pub const DEFAULT_OUTPUT_TYPE: &str = "pil";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("missing prompt")]
    MissingPrompt,
    #[error("user_uuid must be a string naming a single directory")]
    InvalidUserUuid,
}

/// Normalized input of a single `/generate` call.
///
/// Every optional field is read leniently: a value of the wrong JSON type is
/// replaced by the field's default instead of failing the request.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub user_uuid: String,
    pub seed: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub eta: f64,
    pub allow_nsfw: bool,
    pub init_image_path: Option<String>,
    pub mask_image_path: Option<String>,
    pub strength: Option<f64>,
    pub output_type: String,
    pub return_dict: bool,
    pub negative_prompt: Option<String>,
}

impl GenerationRequest {
    /// Builds a request out of an arbitrary JSON body. Only a missing prompt
    /// or a bad `user_uuid` are reported, in that order. `user_uuid` becomes a
    /// directory under `users/`, so separators and `.`/`..` are refused.
    pub fn from_json(body: &Value) -> Result<Self, RequestError> {
        let empty = Map::new();
        let body = body.as_object().unwrap_or(&empty);

        let prompt = match body.get("prompt") {
            Some(Value::String(prompt)) if !prompt.is_empty() => prompt.clone(),
            _ => return Err(RequestError::MissingPrompt),
        };

        let user_uuid = match body.get("user_uuid") {
            Some(Value::String(user_uuid)) if is_path_component(user_uuid) => user_uuid.clone(),
            _ => return Err(RequestError::InvalidUserUuid),
        };

        Ok(Self {
            prompt,
            user_uuid,
            seed: string(body, "seed"),
            height: dimension(body, "height"),
            width: dimension(body, "width"),
            // negative counts are a wrong type, like for `dimension`
            num_inference_steps: body
                .get("num_inference_steps")
                .and_then(Value::as_u64)
                .and_then(|steps| usize::try_from(steps).ok())
                .unwrap_or(DEFAULT_NUM_INFERENCE_STEPS),
            guidance_scale: number(body, "guidance_scale").unwrap_or(DEFAULT_GUIDANCE_SCALE),
            eta: number(body, "eta").unwrap_or(DEFAULT_ETA),
            allow_nsfw: boolean(body, "allow_nsfw").unwrap_or(false),
            init_image_path: path(body, "init_image_path"),
            mask_image_path: path(body, "mask_image_path"),
            strength: number(body, "strength"),
            output_type: string(body, "output_type")
                .unwrap_or_else(|| DEFAULT_OUTPUT_TYPE.to_string()),
            return_dict: boolean(body, "return_dict").unwrap_or(true),
            negative_prompt: string(body, "negative_prompt"),
        })
    }
}

fn string(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

// empty paths are treated as absent
fn path(body: &Map<String, Value>, key: &str) -> Option<String> {
    string(body, key).filter(|p| !p.is_empty())
}

fn number(body: &Map<String, Value>, key: &str) -> Option<f64> {
    body.get(key).and_then(Value::as_f64)
}

fn boolean(body: &Map<String, Value>, key: &str) -> Option<bool> {
    body.get(key).and_then(Value::as_bool)
}

// Negative values count as a wrong type since the field is unsigned.
fn dimension(body: &Map<String, Value>, key: &str) -> Option<u32> {
    body.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

fn is_path_component(name: &str) -> bool {
    !matches!(name, "." | "..") && !name.contains(['/', '\\', '\0'])
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GenerationResult {
    pub file_path: String,
    pub has_nsfw: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requires_prompt_before_user() {
        assert_eq!(
            GenerationRequest::from_json(&json!({})),
            Err(RequestError::MissingPrompt)
        );
        assert_eq!(
            GenerationRequest::from_json(&json!({"prompt": "", "user_uuid": "u1"})),
            Err(RequestError::MissingPrompt)
        );
        assert_eq!(
            GenerationRequest::from_json(&json!({"prompt": 12, "user_uuid": "u1"})),
            Err(RequestError::MissingPrompt)
        );
        assert_eq!(
            GenerationRequest::from_json(&json!(["a cat"])),
            Err(RequestError::MissingPrompt)
        );
    }

    #[test]
    fn requires_string_user_uuid() {
        assert_eq!(
            GenerationRequest::from_json(&json!({"prompt": "a cat"})),
            Err(RequestError::InvalidUserUuid)
        );
        assert_eq!(
            GenerationRequest::from_json(&json!({"prompt": "a cat", "user_uuid": 42})),
            Err(RequestError::InvalidUserUuid)
        );
    }

    #[test]
    fn user_uuid_cannot_leave_users_dir() {
        for user_uuid in ["..", ".", "../x", "a/b", "/etc", "a\\b", "x\0y"] {
            assert_eq!(
                GenerationRequest::from_json(&json!({"prompt": "a cat", "user_uuid": user_uuid})),
                Err(RequestError::InvalidUserUuid),
                "{user_uuid:?}"
            );
        }
        let req = GenerationRequest::from_json(&json!({"prompt": "a cat", "user_uuid": "..u1.."}))
            .unwrap();
        assert_eq!(req.user_uuid, "..u1..");
    }

    #[test]
    fn negative_integers_fall_back_to_defaults() {
        let req = GenerationRequest::from_json(&json!({
            "prompt": "a cat",
            "user_uuid": "u1",
            "height": -512,
            "width": -1,
            "num_inference_steps": -30,
        }))
        .unwrap();
        assert_eq!(req.height, None);
        assert_eq!(req.width, None);
        assert_eq!(req.num_inference_steps, DEFAULT_NUM_INFERENCE_STEPS);
    }

    #[test]
    fn fills_defaults() {
        let req =
            GenerationRequest::from_json(&json!({"prompt": "a cat", "user_uuid": "u1"})).unwrap();
        assert_eq!(req.prompt, "a cat");
        assert_eq!(req.user_uuid, "u1");
        assert_eq!(req.seed, None);
        assert_eq!(req.height, None);
        assert_eq!(req.width, None);
        assert_eq!(req.num_inference_steps, 30);
        assert_eq!(req.guidance_scale, 9.0);
        assert_eq!(req.eta, 0.0);
        assert!(!req.allow_nsfw);
        assert_eq!(req.init_image_path, None);
        assert_eq!(req.strength, None);
        assert_eq!(req.output_type, "pil");
        assert!(req.return_dict);
        assert_eq!(req.negative_prompt, None);
    }

    #[test]
    fn coerces_wrong_types_to_defaults() {
        let req = GenerationRequest::from_json(&json!({
            "prompt": "a cat",
            "user_uuid": "u1",
            "seed": 1234,
            "height": "512",
            "width": 511.5,
            "num_inference_steps": -4,
            "guidance_scale": "high",
            "eta": [],
            "allow_nsfw": "yes",
            "init_image_path": 7,
            "mask_image_path": "",
            "strength": null,
            "output_type": false,
            "return_dict": 0,
            "negative_prompt": {"text": "dog"},
        }))
        .unwrap();

        assert_eq!(
            req,
            GenerationRequest::from_json(&json!({"prompt": "a cat", "user_uuid": "u1"})).unwrap()
        );
    }

    #[test]
    fn keeps_well_typed_values() {
        let req = GenerationRequest::from_json(&json!({
            "prompt": "a cat",
            "user_uuid": "u1",
            "seed": "1234",
            "height": 640,
            "width": 384,
            "num_inference_steps": 50,
            "guidance_scale": 7,
            "eta": 0.5,
            "allow_nsfw": true,
            "init_image_path": "/tmp/in.png",
            "strength": 0.75,
            "output_type": "np",
            "return_dict": false,
            "negative_prompt": "blurry",
        }))
        .unwrap();

        assert_eq!(req.seed.as_deref(), Some("1234"));
        assert_eq!(req.height, Some(640));
        assert_eq!(req.width, Some(384));
        assert_eq!(req.num_inference_steps, 50);
        assert_eq!(req.guidance_scale, 7.0);
        assert_eq!(req.eta, 0.5);
        assert!(req.allow_nsfw);
        assert_eq!(req.init_image_path.as_deref(), Some("/tmp/in.png"));
        assert_eq!(req.strength, Some(0.75));
        assert_eq!(req.output_type, "np");
        assert!(!req.return_dict);
        assert_eq!(req.negative_prompt.as_deref(), Some("blurry"));
    }

    #[test]
    fn result_serializes_to_wire_shape() {
        let result = GenerationResult {
            file_path: "users/u1/images/x.png".into(),
            has_nsfw: false,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"file_path": "users/u1/images/x.png", "has_nsfw": false})
        );
    }
}
