use crate::models::Message;

/**
 * \brief A user message and the replies it drew, as a borrowed slice of the transcript.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn<'a> {
    pub messages: &'a [Message],
}

impl<'a> Turn<'a> {
    /** \brief The opening user message; None for a group that starts with replies. */
    pub fn prompt(&self) -> Option<&'a Message> {
        self.messages.first().filter(|m| m.is_user())
    }

    pub fn replies(&self) -> &'a [Message] {
        match self.prompt() {
            Some(_) => &self.messages[1..],
            None => self.messages,
        }
    }
}

/**
 * \brief Split a transcript at every user message. Nothing is copied.
 */
pub fn group_turns(messages: &[Message]) -> Vec<Turn<'_>> {
    let mut turns = Vec::new();
    let mut start = 0;
    for (i, msg) in messages.iter().enumerate() {
        if msg.is_user() && i > start {
            turns.push(Turn {
                messages: &messages[start..i],
            });
            start = i;
        }
    }
    if start < messages.len() {
        turns.push(Turn {
            messages: &messages[start..],
        });
    }
    turns
}
