use cantina_core::llm::ToolSpec;
use cantina_core::{CantinaError, Result};
use serde_json::{json, Value};

/// Tool schemas offered to the model on every turn.
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "play_music".to_string(),
            description: "Play a track from the cantina music library".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "track": {
                        "type": "string",
                        "description": "Track name or search query"
                    }
                },
                "required": ["track"]
            }),
        },
        ToolSpec {
            name: "stop_music".to_string(),
            description: "Stop the currently playing music".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolSpec {
            name: "set_eye_color".to_string(),
            description: "Change the eye LED color and pattern".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "color": { "type": "string" },
                    "pattern": { "type": "string" },
                    "intensity": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                },
                "required": ["color"]
            }),
        },
    ]
}

/// Validate parsed arguments against the named tool's schema.
///
/// Checks required fields, basic types and the numeric ranges the schemas
/// declare; unknown tools are rejected so they never reach the router.
pub fn validate_arguments(name: &str, arguments: &Value) -> Result<()> {
    let object = arguments
        .as_object()
        .ok_or_else(|| CantinaError::Validation(format!("{name}: arguments must be an object")))?;

    match name {
        "play_music" => {
            let track = object
                .get("track")
                .and_then(Value::as_str)
                .ok_or_else(|| CantinaError::Validation("play_music: 'track' is required".into()))?;
            if track.trim().is_empty() {
                return Err(CantinaError::Validation(
                    "play_music: 'track' must not be empty".into(),
                ));
            }
            Ok(())
        }
        "stop_music" => Ok(()),
        "set_eye_color" => {
            object
                .get("color")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CantinaError::Validation("set_eye_color: 'color' is required".into())
                })?;
            if let Some(intensity) = object.get("intensity") {
                let value = intensity.as_f64().ok_or_else(|| {
                    CantinaError::Validation("set_eye_color: 'intensity' must be a number".into())
                })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(CantinaError::Validation(
                        "set_eye_color: 'intensity' must be within [0.0, 1.0]".into(),
                    ));
                }
            }
            Ok(())
        }
        other => Err(CantinaError::Validation(format!("unknown tool: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_music_requires_nonempty_track() {
        assert!(validate_arguments("play_music", &json!({"track": "Cantina Band"})).is_ok());
        assert!(validate_arguments("play_music", &json!({"track": "  "})).is_err());
        assert!(validate_arguments("play_music", &json!({})).is_err());
    }

    #[test]
    fn eye_color_intensity_is_range_checked() {
        assert!(validate_arguments("set_eye_color", &json!({"color": "blue"})).is_ok());
        assert!(
            validate_arguments("set_eye_color", &json!({"color": "blue", "intensity": 1.0}))
                .is_ok()
        );
        assert!(
            validate_arguments("set_eye_color", &json!({"color": "blue", "intensity": 1.5}))
                .is_err()
        );
    }

    #[test]
    fn unknown_tools_are_rejected() {
        assert!(validate_arguments("order_blue_milk", &json!({})).is_err());
    }

    #[test]
    fn builtin_schemas_cover_the_router_intents() {
        let names: Vec<String> = builtin_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["play_music", "stop_music", "set_eye_color"]);
    }
}
