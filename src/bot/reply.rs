//! What a handled update asks the transport to do

use teloxide::types::InlineKeyboardMarkup;

/// One HTML message
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
    /// Replace the message the button was pressed on instead of sending anew
    pub edit: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
            edit: false,
        }
    }

    pub fn keyboard(mut self, keyboard: InlineKeyboardMarkup) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn editing(mut self) -> Self {
        self.edit = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Reply(Reply),
    /// Delete the triggering message (a pressed menu or a typed secret)
    DeleteSource,
}

impl From<Reply> for Outgoing {
    fn from(reply: Reply) -> Self {
        Outgoing::Reply(reply)
    }
}
