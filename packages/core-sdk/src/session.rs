use crate::errors::{DispatchError, SessionError};
use crate::models::{ChatRequest, Endpoint, Message};
use crate::transcript::{group_turns, Turn};

/**
 * \brief Client-side chat state. Every transform returns a new value with a bumped version;
 *        the receiver is left untouched.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    version: u64,
    endpoints: Vec<Endpoint>,
    messages: Vec<Message>,
    in_flight: bool,
}

impl Session {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            ..Self::default()
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn turns(&self) -> Vec<Turn<'_>> {
        group_turns(&self.messages)
    }

    /**
     * \brief True when at least one configured endpoint has a key.
     * \details An empty list counts as unknown and returns true: the backend
     *          substitutes its own defaults in that case.
     */
    pub fn can_dispatch(&self) -> bool {
        self.endpoints.is_empty() || self.endpoints.iter().any(Endpoint::is_active)
    }

    fn next(&self) -> Self {
        let mut s = self.clone();
        s.version += 1;
        s
    }

    /**
     * \brief Add an endpoint, or replace the one with the same name.
     */
    pub fn with_endpoint(&self, endpoint: Endpoint) -> Self {
        let mut s = self.next();
        match s.endpoints.iter_mut().find(|e| e.name == endpoint.name) {
            Some(existing) => *existing = endpoint,
            None => s.endpoints.push(endpoint),
        }
        s
    }

    pub fn without_endpoint(&self, name: &str) -> Self {
        let mut s = self.next();
        s.endpoints.retain(|e| e.name != name);
        s
    }

    /**
     * \brief Append the user's message and mark the session busy.
     */
    pub fn begin_submit(&self, text: &str) -> Result<Self, SessionError> {
        if self.in_flight {
            return Err(SessionError::Busy);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let mut s = self.next();
        s.messages.push(Message::user(text));
        s.in_flight = true;
        Ok(s)
    }

    /**
     * \brief Request body for the current history.
     */
    pub fn chat_request(&self, auto_continue: bool, max_turns: u32) -> ChatRequest {
        ChatRequest {
            messages: self.messages.clone(),
            endpoints: self.endpoints.clone(),
            auto_continue,
            max_turns,
        }
    }

    pub fn complete_submit(&self, replies: Vec<Message>) -> Result<Self, SessionError> {
        if !self.in_flight {
            return Err(SessionError::NotInFlight);
        }
        let mut s = self.next();
        s.messages.extend(replies);
        s.in_flight = false;
        Ok(s)
    }

    /**
     * \brief Record a failed submission as exactly one system message.
     */
    pub fn fail_submit(&self, error: &str) -> Result<Self, SessionError> {
        self.complete_submit(vec![Message::system(error)])
    }

    /**
     * \brief Settle a submission without any network call when no endpoint can answer.
     */
    pub fn reject_without_endpoints(&self) -> Result<Self, SessionError> {
        self.fail_submit(&DispatchError::NoActiveEndpoint.to_string())
    }
}
