//! Conversation log and turn assembly state machine
//!
//! Reconciles three independent event sources (user transcription deltas,
//! model transcription deltas, tool results) into one ordered log without
//! corrupting a turn in progress. The open-turn status of the tail is an
//! explicit tag rather than something inferred from the tail's shape, and
//! the per-role accumulators are the source of truth for in-progress text:
//! deltas are appended verbatim, never deduplicated.

use agribot_live::{ToolPayload, Turn};

/// Open-turn status of the log's tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenTurn {
    None,
    User,
    Model,
}

/// The ordered conversation log.
///
/// Append-only except for in-place replacement of the tail, which is used
/// to extend or finalize the open turn.
#[derive(Debug)]
pub struct ConversationLog {
    turns: Vec<Turn>,
    open: OpenTurn,
    input_acc: String,
    output_acc: String,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLog {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            open: OpenTurn::None,
            input_acc: String::new(),
            output_acc: String::new(),
        }
    }

    /// All turns, oldest first
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Clone the log for the presentation layer
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Reset everything for a fresh session
    pub fn clear(&mut self) {
        self.turns.clear();
        self.open = OpenTurn::None;
        self.input_acc.clear();
        self.output_acc.clear();
    }

    /// Apply an incremental user transcription delta.
    pub fn user_delta(&mut self, delta: &str) {
        self.input_acc.push_str(delta);
        match self.open {
            OpenTurn::User => {
                if let Some(tail) = self.turns.last_mut() {
                    tail.text = Some(self.input_acc.clone());
                }
            }
            _ => {
                self.turns.push(Turn::user_partial(self.input_acc.clone()));
                self.open = OpenTurn::User;
            }
        }
    }

    /// Apply an incremental model transcription delta.
    ///
    /// Model text arriving while a user turn is open implies the user's
    /// utterance ended, so the user turn is finalized first. A tail holding
    /// a tool payload (always final) gets a fresh model turn appended after
    /// it rather than being merged.
    pub fn model_delta(&mut self, delta: &str) {
        self.output_acc.push_str(delta);
        match self.open {
            OpenTurn::User => {
                self.finalize_tail();
                self.input_acc.clear();
                self.turns.push(Turn::model_partial(self.output_acc.clone()));
                self.open = OpenTurn::Model;
            }
            OpenTurn::Model => {
                if let Some(tail) = self.turns.last_mut() {
                    tail.text = Some(self.output_acc.clone());
                }
            }
            OpenTurn::None => {
                self.turns.push(Turn::model_partial(self.output_acc.clone()));
                self.open = OpenTurn::Model;
            }
        }
    }

    /// Apply a turn-complete signal. Finalizes an open model turn;
    /// idempotent no-op otherwise. Returns whether the log changed.
    pub fn turn_complete(&mut self) -> bool {
        if self.open != OpenTurn::Model {
            return false;
        }
        self.finalize_tail();
        self.output_acc.clear();
        self.open = OpenTurn::None;
        true
    }

    /// Insert a tool result as an already-final model turn.
    ///
    /// Closes at most one pending user turn (the tool call implies the
    /// user's request is complete). It never closes a pending model turn;
    /// that is turn-complete's job.
    pub fn tool_result(&mut self, payload: ToolPayload) {
        if self.open == OpenTurn::User {
            self.finalize_tail();
            self.input_acc.clear();
        }
        self.turns.push(Turn::from_payload(payload));
        self.open = OpenTurn::None;
    }

    /// Force-finalize a dangling open turn on teardown, without altering
    /// its text. Returns whether the log changed.
    pub fn finalize_dangling(&mut self) -> bool {
        let changed = self.open != OpenTurn::None;
        if changed {
            self.finalize_tail();
        }
        self.open = OpenTurn::None;
        self.input_acc.clear();
        self.output_acc.clear();
        changed
    }

    fn finalize_tail(&mut self) {
        if let Some(tail) = self.turns.last_mut() {
            tail.is_final = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agribot_live::{CropPricesData, Role, SkyCondition, WeatherData};

    fn weather_payload() -> ToolPayload {
        ToolPayload::Weather(WeatherData {
            location: "Nashik".into(),
            temperature: "22°C".into(),
            condition: SkyCondition::Sunny,
            forecast: vec![],
        })
    }

    fn prices_payload() -> ToolPayload {
        ToolPayload::CropPrices(CropPricesData {
            crop: "Tomatoes".into(),
            district: "Nashik".into(),
            prices: vec![],
        })
    }

    #[test]
    fn test_user_deltas_concatenate_into_one_open_turn() {
        let mut log = ConversationLog::new();
        log.user_delta("turn on");
        log.user_delta(" the pump");

        assert_eq!(log.turns().len(), 1);
        let tail = &log.turns()[0];
        assert_eq!(tail.role, Role::User);
        assert_eq!(tail.text.as_deref(), Some("turn on the pump"));
        assert!(!tail.is_final);
    }

    #[test]
    fn test_model_delta_finalizes_open_user_turn() {
        let mut log = ConversationLog::new();
        log.user_delta("turn on the pump");
        log.model_delta("Sure");

        assert_eq!(log.turns().len(), 2);
        assert_eq!(log.turns()[0].text.as_deref(), Some("turn on the pump"));
        assert!(log.turns()[0].is_final);
        assert_eq!(log.turns()[1].role, Role::Model);
        assert_eq!(log.turns()[1].text.as_deref(), Some("Sure"));
        assert!(!log.turns()[1].is_final);
    }

    #[test]
    fn test_model_deltas_concatenate() {
        let mut log = ConversationLog::new();
        log.model_delta("Hello");
        log.model_delta(", farmer");

        assert_eq!(log.turns().len(), 1);
        assert_eq!(log.turns()[0].text.as_deref(), Some("Hello, farmer"));
    }

    #[test]
    fn test_turn_complete_finalizes_model_turn() {
        let mut log = ConversationLog::new();
        log.model_delta("Sure");
        assert!(log.turn_complete());

        assert!(log.turns()[0].is_final);
        assert_eq!(log.turns()[0].text.as_deref(), Some("Sure"));
    }

    #[test]
    fn test_turn_complete_without_open_model_turn_is_noop() {
        let mut log = ConversationLog::new();
        assert!(!log.turn_complete());

        log.user_delta("hello");
        assert!(!log.turn_complete());
        assert!(!log.turns()[0].is_final);
    }

    #[test]
    fn test_accumulator_resets_after_turn_complete() {
        let mut log = ConversationLog::new();
        log.model_delta("first answer");
        log.turn_complete();
        log.model_delta("second");

        assert_eq!(log.turns().len(), 2);
        assert_eq!(log.turns()[1].text.as_deref(), Some("second"));
    }

    #[test]
    fn test_accumulator_resets_after_user_finalize() {
        let mut log = ConversationLog::new();
        log.user_delta("first question");
        log.model_delta("answer");
        log.turn_complete();
        log.user_delta("second");

        assert_eq!(log.turns().len(), 3);
        assert_eq!(log.turns()[2].text.as_deref(), Some("second"));
    }

    #[test]
    fn test_tool_result_finalizes_user_turn_and_appends_final_payload() {
        let mut log = ConversationLog::new();
        log.user_delta("what's the weather");
        log.tool_result(weather_payload());

        assert_eq!(log.turns().len(), 2);
        assert!(log.turns()[0].is_final);
        let card = &log.turns()[1];
        assert_eq!(card.role, Role::Model);
        assert!(card.is_final);
        assert!(card.weather.is_some());
        assert!(card.text.is_none());
    }

    #[test]
    fn test_tool_result_on_empty_log() {
        let mut log = ConversationLog::new();
        log.tool_result(prices_payload());

        assert_eq!(log.turns().len(), 1);
        assert!(log.turns()[0].is_final);
        assert!(log.turns()[0].crop_prices.is_some());
    }

    #[test]
    fn test_tool_result_never_closes_open_model_turn() {
        let mut log = ConversationLog::new();
        log.model_delta("Let me check");
        log.tool_result(weather_payload());

        assert_eq!(log.turns().len(), 2);
        assert!(!log.turns()[0].is_final);
        assert!(log.turns()[1].weather.is_some());
    }

    #[test]
    fn test_model_delta_after_payload_card_opens_fresh_turn() {
        let mut log = ConversationLog::new();
        log.user_delta("prices for tomatoes in Nashik");
        log.tool_result(prices_payload());
        log.model_delta("Here are the prices");

        assert_eq!(log.turns().len(), 3);
        assert!(log.turns()[1].has_payload());
        assert_eq!(log.turns()[2].text.as_deref(), Some("Here are the prices"));
        assert!(!log.turns()[2].is_final);
    }

    #[test]
    fn test_model_transcript_survives_interruption_and_continues() {
        // Interruption resets playback, not the log: the open model turn
        // keeps its accumulated text and later deltas keep appending.
        let mut log = ConversationLog::new();
        log.model_delta("The forecast for ");
        log.model_delta("tomorrow");

        assert_eq!(log.turns()[0].text.as_deref(), Some("The forecast for tomorrow"));
        assert!(!log.turns()[0].is_final);
    }

    #[test]
    fn test_user_delta_while_model_turn_open_starts_new_user_turn() {
        // New user speech after an interruption: the model turn keeps its
        // partial transcript and a fresh user turn opens at the tail.
        let mut log = ConversationLog::new();
        log.model_delta("As I was say");
        log.user_delta("stop");

        assert_eq!(log.turns().len(), 2);
        assert_eq!(log.turns()[0].role, Role::Model);
        assert_eq!(log.turns()[1].role, Role::User);
        assert_eq!(log.turns()[1].text.as_deref(), Some("stop"));
        assert!(!log.turns()[1].is_final);
    }

    #[test]
    fn test_finalize_dangling_closes_open_user_turn() {
        let mut log = ConversationLog::new();
        log.user_delta("half an utter");
        assert!(log.finalize_dangling());

        assert!(log.turns().last().unwrap().is_final);
        assert_eq!(log.turns().last().unwrap().text.as_deref(), Some("half an utter"));
    }

    #[test]
    fn test_finalize_dangling_is_idempotent() {
        let mut log = ConversationLog::new();
        log.model_delta("partial");
        assert!(log.finalize_dangling());
        assert!(!log.finalize_dangling());
        assert!(log.turns().iter().all(|t| t.is_final));
    }

    #[test]
    fn test_finalize_dangling_on_empty_log() {
        let mut log = ConversationLog::new();
        assert!(!log.finalize_dangling());
        assert!(log.turns().is_empty());
    }

    #[test]
    fn test_clear_resets_accumulators() {
        let mut log = ConversationLog::new();
        log.user_delta("stale");
        log.model_delta("also stale");
        log.clear();

        assert!(log.turns().is_empty());
        log.user_delta("fresh");
        assert_eq!(log.turns()[0].text.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_alternating_conversation() {
        let mut log = ConversationLog::new();
        log.user_delta("what's the weather");
        log.tool_result(weather_payload());
        log.model_delta("It will be sunny");
        log.turn_complete();
        log.user_delta("and tomato prices?");
        log.tool_result(prices_payload());
        log.model_delta("Around 2,500 per quintal");
        log.turn_complete();

        let roles: Vec<Role> = log.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::User,
                Role::Model,
                Role::Model,
                Role::User,
                Role::Model,
                Role::Model
            ]
        );
        assert!(log.turns().iter().all(|t| t.is_final));
    }
}
