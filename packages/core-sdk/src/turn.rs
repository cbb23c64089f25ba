use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::dispatch::{Dispatcher, RelayContext};
use crate::models::{ChatRequest, Message};
use crate::telemetry;

/**
 * \brief Lifecycle of one user submission.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Dispatching,
    AwaitingContinueDecision,
    Done,
}

/**
 * \brief Decides how many rounds a submission gets.
 * \details `max_turns` below 1 is raised to 1, so a submission always gets one round.
 */
#[derive(Debug, Clone)]
pub struct TurnController {
    auto_continue: bool,
    max_turns: u32,
    rounds: u32,
    state: TurnState,
}

impl TurnController {
    pub fn new(auto_continue: bool, max_turns: u32) -> Self {
        Self {
            auto_continue,
            max_turns: max_turns.max(1),
            rounds: 0,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /**
     * \brief Idle -> Dispatching. Returns false if a submission is already running.
     */
    pub fn submit(&mut self) -> bool {
        if self.state != TurnState::Idle {
            return false;
        }
        self.rounds = 0;
        self.state = TurnState::Dispatching;
        true
    }

    /** \brief Dispatching -> AwaitingContinueDecision; the round counts even if it failed. */
    pub fn round_completed(&mut self) {
        if self.state == TurnState::Dispatching {
            self.rounds += 1;
            self.state = TurnState::AwaitingContinueDecision;
        }
    }

    /**
     * \brief Continue only while auto-continue is on, rounds remain, and the
     *        last reply invites a follow-up.
     */
    pub fn decide(&mut self, replies: &[Message]) -> TurnState {
        if self.state != TurnState::AwaitingContinueDecision {
            return self.state;
        }
        let wants_more = replies
            .last()
            .map(|m| invites_follow_up(&m.content))
            .unwrap_or(false);
        self.state = if self.auto_continue && self.rounds < self.max_turns && wants_more {
            TurnState::Dispatching
        } else {
            TurnState::Done
        };
        self.state
    }

    /** \brief Stop regardless of the continue policy. */
    pub fn finish(&mut self) {
        self.state = TurnState::Done;
    }

    /** \brief Done -> Idle: hand control back to the user. */
    pub fn reset(&mut self) {
        if self.state == TurnState::Done {
            self.state = TurnState::Idle;
        }
    }
}

static FOLLOW_UP_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"what (?:do|are|is|would|should|could|will|can) (?:you|we|they|it|i)\b",
        r"how (?:do|would|should|could|will|can) (?:you|we|they|it|i)\b",
        r"(?:could|would|can|will) (?:you|we|they|it|i)\b.*\?",
        r"\b(?:explain|describe|elaborate|clarify|tell me)\b",
    ])
    .expect("valid follow-up patterns")
});

/**
 * \brief Whether a reply reads like it expects an answer.
 */
pub fn invites_follow_up(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    lower.trim_end().ends_with('?') || FOLLOW_UP_PATTERNS.is_match(&lower)
}

/**
 * \brief Drive a whole submission: rounds until the controller says stop.
 * \details Each round's replies are appended to the history the next round
 *          sees. A round without any active endpoint yields one system
 *          message and ends the submission.
 */
pub async fn orchestrate(dispatcher: &Dispatcher, request: &ChatRequest) -> Vec<Message> {
    let mut controller = TurnController::new(request.auto_continue, request.max_turns);
    let mut history = request.messages.clone();
    let mut context = RelayContext::default();
    let mut all = Vec::new();

    controller.submit();
    while controller.state() == TurnState::Dispatching {
        match dispatcher
            .run_round(&history, &request.endpoints, &mut context)
            .await
        {
            Ok(replies) => {
                controller.round_completed();
                history.extend(replies.iter().cloned());
                controller.decide(&replies);
                all.extend(replies);
            }
            Err(e) => {
                controller.round_completed();
                controller.finish();
                all.push(Message::system(e.to_string()));
            }
        }
    }
    telemetry::log_event(
        "dispatch",
        &format!("submission done rounds={} replies={}", controller.rounds(), all.len()),
    );
    all
}
