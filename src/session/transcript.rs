//! Turn/transcript aggregation
//!
//! Reconstructs discrete conversational turns from the stream of partial
//! transcript deltas. Buffers are flushed exactly once per turn boundary;
//! an interrupted turn is discarded without ever being treated as complete.

/// Accumulates the in-progress user and model turns
#[derive(Debug, Default)]
pub struct TurnAggregator {
    user_turn: String,
    model_turn: String,
}

impl TurnAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a partial transcript token of the user's speech
    pub fn push_user(&mut self, delta: &str) {
        self.user_turn.push_str(delta);
    }

    /// Append a partial transcript token of the model's speech
    pub fn push_model(&mut self, delta: &str) {
        self.model_turn.push_str(delta);
    }

    /// The user turn accumulated so far
    #[must_use]
    pub fn user_turn(&self) -> &str {
        &self.user_turn
    }

    /// The model turn accumulated so far
    #[must_use]
    pub fn model_turn(&self) -> &str {
        &self.model_turn
    }

    /// Complete the current turn
    ///
    /// Returns the accumulated model turn for command extraction and clears
    /// both buffers — the one flush this turn boundary gets.
    pub fn complete_turn(&mut self) -> String {
        self.user_turn.clear();
        std::mem::take(&mut self.model_turn)
    }

    /// Discard the current turn after a barge-in
    ///
    /// An interrupted turn is not a completed one: both buffers are cleared
    /// and nothing is returned for extraction.
    pub fn interrupt(&mut self) {
        if !self.model_turn.is_empty() || !self.user_turn.is_empty() {
            tracing::debug!(
                model_chars = self.model_turn.len(),
                user_chars = self.user_turn.len(),
                "discarding interrupted turn"
            );
        }
        self.user_turn.clear();
        self.model_turn.clear();
    }

    /// Clear both buffers (session teardown)
    pub fn reset(&mut self) {
        self.user_turn.clear();
        self.model_turn.clear();
    }
}
