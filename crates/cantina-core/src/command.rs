use serde::{Deserialize, Serialize};

/// Normalized command record.
///
/// Both ingress surfaces (terminal line editor, web dashboard) funnel into
/// this one shape before anything reaches the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub subcommand: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub raw_input: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl Command {
    pub fn new(command: impl Into<String>, raw_input: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            subcommand: None,
            args: Vec::new(),
            raw_input: raw_input.into(),
            conversation_id: None,
        }
    }

    pub fn with_subcommand(mut self, subcommand: impl Into<String>) -> Self {
        self.subcommand = Some(subcommand.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Remaining args joined with single spaces, e.g. a track query.
    pub fn arg_text(&self) -> String {
        self.args.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_text_joins_with_single_spaces() {
        let cmd = Command::new("play", "play music cantina band")
            .with_subcommand("music")
            .with_args(vec!["cantina".into(), "band".into()]);
        assert_eq!(cmd.arg_text(), "cantina band");
    }
}
