use crate::types::Turn;

/// Accumulates streamed transcript fragments per speaker and finalizes
/// them into turns on turn-boundary signals. Deltas carry no word
/// boundaries, so aggregation is pure concatenation.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    turns: Vec<Turn>,
    user_partial: String,
    agent_partial: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: &str) {
        self.user_partial.push_str(text);
    }

    pub fn append_agent(&mut self, text: &str) {
        self.agent_partial.push_str(text);
    }

    /// Closes the current turn if either side said anything; both partial
    /// buffers are cleared. Returns the turn just finalized.
    pub fn finalize_turn(&mut self) -> Option<&Turn> {
        if self.user_partial.is_empty() && self.agent_partial.is_empty() {
            return None;
        }
        self.turns.push(Turn {
            user_text: std::mem::take(&mut self.user_partial),
            agent_text: std::mem::take(&mut self.agent_partial),
        });
        self.turns.last()
    }

    /// Finalized turns only; append-only across the session.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The readable transcript, including any not-yet-finalized partials
    /// (for callers ending the session mid-turn).
    pub fn snapshot(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for turn in &self.turns {
            if !turn.user_text.is_empty() {
                lines.push(format!("User: {}", turn.user_text));
            }
            if !turn.agent_text.is_empty() {
                lines.push(format!("Guide: {}", turn.agent_text));
            }
        }
        if !self.user_partial.is_empty() {
            lines.push(format!("User: {}", self.user_partial));
        }
        if !self.agent_partial.is_empty() {
            lines.push(format!("Guide: {}", self.agent_partial));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_concatenate_and_finalize_into_one_turn() {
        let mut transcript = TranscriptAggregator::new();
        transcript.append_user("hel");
        transcript.append_user("lo");
        transcript.append_agent("hi");

        let turn = transcript.finalize_turn().cloned().unwrap();
        assert_eq!(turn.user_text, "hello");
        assert_eq!(turn.agent_text, "hi");
        assert_eq!(transcript.turns().len(), 1);

        // Both partial buffers are empty afterwards.
        assert!(transcript.finalize_turn().is_none());
        assert_eq!(transcript.snapshot(), "User: hello\nGuide: hi");
    }

    #[test]
    fn one_sided_turn_is_kept() {
        let mut transcript = TranscriptAggregator::new();
        transcript.append_agent("welcome to the old town");
        assert!(transcript.finalize_turn().is_some());
        assert_eq!(transcript.snapshot(), "Guide: welcome to the old town");
    }

    #[test]
    fn snapshot_includes_mid_turn_partials() {
        let mut transcript = TranscriptAggregator::new();
        transcript.append_user("where is");
        transcript.append_agent("the");
        transcript.finalize_turn();
        transcript.append_user("how far");

        assert_eq!(
            transcript.snapshot(),
            "User: where is\nGuide: the\nUser: how far"
        );
    }
}
