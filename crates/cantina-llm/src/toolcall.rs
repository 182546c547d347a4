use std::collections::BTreeMap;

use cantina_core::llm::ToolCall;
use tracing::debug;

/// Assembles streamed tool-call fragments into complete calls.
///
/// The model interleaves text with per-call JSON argument pieces keyed by
/// stream index. Arguments are parsed eagerly the moment the buffer ends
/// in `}`; a call that never parses mid-stream gets one more chance in the
/// end-of-stream sweep, where the model may have terminated it implicitly.
#[derive(Default)]
pub struct ToolCallAssembler {
    partials: BTreeMap<usize, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    emitted: bool,
}

impl PartialCall {
    fn try_complete(&mut self, index: usize) -> Option<ToolCall> {
        if self.emitted {
            return None;
        }
        let name = self.name.clone()?;
        let arguments = parse_arguments(&self.arguments)?;
        self.emitted = true;
        Some(ToolCall {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{index}")),
            name,
            arguments,
        })
    }
}

/// Parse raw argument text, falling back to one bounded normalization pass
/// (single quotes rewritten to double quotes) for near-JSON model output.
fn parse_arguments(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(serde_json::json!({}));
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    if trimmed.contains('\'') {
        let normalized = trimmed.replace('\'', "\"");
        if let Ok(value) = serde_json::from_str(&normalized) {
            debug!("tool-call arguments parsed after quote normalization");
            return Some(value);
        }
    }
    None
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one fragment. Returns the completed call when this fragment
    /// made the arguments parse.
    pub fn ingest(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        argument_fragment: &str,
    ) -> Option<ToolCall> {
        let partial = self.partials.entry(index).or_default();
        if id.is_some() {
            partial.id = id;
        }
        if name.is_some() {
            partial.name = name;
        }
        partial.arguments.push_str(argument_fragment);

        if partial.arguments.trim_end().ends_with('}') {
            partial.try_complete(index)
        } else {
            None
        }
    }

    /// End-of-stream sweep over calls the model terminated implicitly.
    pub fn finish(mut self) -> Vec<ToolCall> {
        let mut completed = Vec::new();
        for (index, partial) in self.partials.iter_mut() {
            if let Some(call) = partial.try_complete(*index) {
                completed.push(call);
            }
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fragments_complete_when_arguments_close() {
        let mut asm = ToolCallAssembler::new();
        assert!(asm
            .ingest(0, Some("call_a".into()), Some("play_music".into()), "{\"tra")
            .is_none());
        assert!(asm.ingest(0, None, None, "ck\": \"Canti").is_none());
        let call = asm.ingest(0, None, None, "na Band\"}").unwrap();
        assert_eq!(call.id, "call_a");
        assert_eq!(call.name, "play_music");
        assert_eq!(call.arguments, json!({"track": "Cantina Band"}));
    }

    #[test]
    fn single_quoted_arguments_normalize() {
        let mut asm = ToolCallAssembler::new();
        let call = asm
            .ingest(
                0,
                None,
                Some("set_eye_color".into()),
                "{'color': 'blue', 'intensity': 0.8}",
            )
            .unwrap();
        assert_eq!(call.arguments, json!({"color": "blue", "intensity": 0.8}));
        assert_eq!(call.id, "call_0");
    }

    #[test]
    fn emitted_calls_are_not_repeated_by_the_sweep() {
        let mut asm = ToolCallAssembler::new();
        let first = asm.ingest(0, None, Some("stop_music".into()), "{}");
        assert!(first.is_some());
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let mut asm = ToolCallAssembler::new();
        assert!(asm.ingest(0, None, Some("stop_music".into()), "").is_none());
        let swept = asm.finish();
        assert_eq!(swept[0].arguments, json!({}));
    }

    #[test]
    fn unparseable_arguments_never_emit() {
        let mut asm = ToolCallAssembler::new();
        assert!(asm
            .ingest(0, None, Some("play_music".into()), "{not json at all}")
            .is_none());
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn interleaved_calls_assemble_independently() {
        let mut asm = ToolCallAssembler::new();
        assert!(asm
            .ingest(0, None, Some("play_music".into()), "{\"track\":")
            .is_none());
        let second = asm.ingest(1, None, Some("stop_music".into()), "{}").unwrap();
        assert_eq!(second.name, "stop_music");
        let first = asm.ingest(0, None, None, " \"Oola Shuka\"}").unwrap();
        assert_eq!(first.arguments, json!({"track": "Oola Shuka"}));
    }
}
