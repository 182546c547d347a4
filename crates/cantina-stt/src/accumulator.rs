/// Builds the utterance transcript from stabilized STT segments.
///
/// Interim segments are display-only and never land here; the accumulator
/// is cleared at the start of each capture session.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    segments: Vec<String>,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_final(&mut self, segment: &str) {
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            self.segments.push(trimmed.to_string());
        }
    }

    /// Final segments joined with single spaces.
    pub fn transcript(&self) -> String {
        self.segments.join(" ")
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_finals_with_single_spaces() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_final("play");
        acc.push_final(" cantina band ");
        assert_eq!(acc.transcript(), "play cantina band");
    }

    #[test]
    fn empty_segments_are_skipped() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_final("  ");
        acc.push_final("");
        assert!(acc.is_empty());
        assert_eq!(acc.transcript(), "");
    }

    #[test]
    fn clear_resets_for_next_session() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_final("hello there");
        acc.clear();
        assert_eq!(acc.segment_count(), 0);
        assert_eq!(acc.transcript(), "");
    }
}
