//! Submission request validation.

use serde_json::Value;

use super::{OrchestratorConfig, OrchestratorError, SubmitRequest};

/// Check a request and return it normalized (prompt and model trimmed).
pub fn validate_request(
    request: SubmitRequest,
    config: &OrchestratorConfig,
) -> Result<SubmitRequest, OrchestratorError> {
    let prompt = request.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(OrchestratorError::validation("prompt", "Prompt cannot be empty"));
    }
    if prompt.chars().count() > config.max_prompt_chars {
        return Err(OrchestratorError::validation(
            "prompt",
            format!("Prompt must be at most {} characters", config.max_prompt_chars),
        ));
    }

    let model = match request.model {
        Some(model) => {
            let model = model.trim().to_string();
            if !model.contains('/') {
                return Err(OrchestratorError::validation(
                    "model",
                    "Model must be in format 'owner/model:version'",
                ));
            }
            Some(model)
        }
        None => None,
    };

    for (name, min, max) in [
        ("width", 64, 2048),
        ("height", 64, 2048),
        ("num_inference_steps", 1, 150),
    ] {
        if let Some(value) = request.parameters.get(name) {
            check_integer(name, value, min, max)?;
        }
    }

    if let Some(value) = request.parameters.get("guidance_scale") {
        match value.as_f64() {
            Some(scale) if (0.0..=20.0).contains(&scale) => {}
            _ => {
                return Err(OrchestratorError::validation(
                    "parameters.guidance_scale",
                    "guidance_scale must be a number between 0 and 20",
                ))
            }
        }
    }

    Ok(SubmitRequest {
        prompt,
        parameters: request.parameters,
        model,
    })
}

fn check_integer(name: &str, value: &Value, min: i64, max: i64) -> Result<(), OrchestratorError> {
    match value.as_i64() {
        Some(n) if (min..=max).contains(&n) => Ok(()),
        _ => Err(OrchestratorError::validation(
            &format!("parameters.{}", name),
            format!("{} must be an integer between {} and {}", name, min, max),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Parameters;
    use serde_json::json;

    fn request(prompt: &str, parameters: Value) -> SubmitRequest {
        let parameters: Parameters = match parameters {
            Value::Object(map) => map,
            _ => Parameters::new(),
        };
        SubmitRequest {
            prompt: prompt.to_string(),
            parameters,
            model: None,
        }
    }

    fn field_of(result: Result<SubmitRequest, OrchestratorError>) -> String {
        match result {
            Err(OrchestratorError::Validation { field, .. }) => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_request_is_trimmed() {
        let config = OrchestratorConfig::default();
        let mut req = request("  sunset  ", json!({"width": 512, "height": 512, "guidance_scale": 7.5}));
        req.model = Some(" acme/diffusion:v1 ".to_string());

        let validated = validate_request(req, &config).unwrap();
        assert_eq!(validated.prompt, "sunset");
        assert_eq!(validated.model.as_deref(), Some("acme/diffusion:v1"));
    }

    #[test]
    fn test_empty_prompt() {
        let config = OrchestratorConfig::default();
        assert_eq!(field_of(validate_request(request("   ", json!({})), &config)), "prompt");
    }

    #[test]
    fn test_prompt_length_counts_characters() {
        let config = OrchestratorConfig::default();
        let at_limit = "é".repeat(2000);
        assert!(validate_request(request(&at_limit, json!({})), &config).is_ok());

        let too_long = "a".repeat(2001);
        assert_eq!(field_of(validate_request(request(&too_long, json!({})), &config)), "prompt");
    }

    #[test]
    fn test_model_needs_owner() {
        let config = OrchestratorConfig::default();
        let mut req = request("sunset", json!({}));
        req.model = Some("diffusion".to_string());
        assert_eq!(field_of(validate_request(req, &config)), "model");
    }

    #[test]
    fn test_dimension_bounds() {
        let config = OrchestratorConfig::default();
        for bad in [json!(32), json!(4096), json!(512.5), json!("512")] {
            let req = request("sunset", json!({ "width": bad }));
            assert_eq!(field_of(validate_request(req, &config)), "parameters.width");
        }
        let req = request("sunset", json!({"width": 64, "height": 2048}));
        assert!(validate_request(req, &config).is_ok());
    }

    #[test]
    fn test_inference_steps_and_guidance() {
        let config = OrchestratorConfig::default();
        let req = request("sunset", json!({"num_inference_steps": 0}));
        assert_eq!(
            field_of(validate_request(req, &config)),
            "parameters.num_inference_steps"
        );

        let req = request("sunset", json!({"guidance_scale": 21}));
        assert_eq!(
            field_of(validate_request(req, &config)),
            "parameters.guidance_scale"
        );

        let req = request("sunset", json!({"guidance_scale": 0, "num_inference_steps": 150}));
        assert!(validate_request(req, &config).is_ok());
    }

    #[test]
    fn test_unknown_parameters_pass_through() {
        let config = OrchestratorConfig::default();
        let req = request("sunset", json!({"seed": 42, "scheduler": "K_EULER"}));
        let validated = validate_request(req, &config).unwrap();
        assert_eq!(validated.parameters.get("seed"), Some(&json!(42)));
    }
}
