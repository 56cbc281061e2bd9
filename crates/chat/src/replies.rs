use serde::Serialize;
use tally_core::flows::{QuickReply, Turn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplyButton {
    pub label: String,
    pub value: String,
}

impl From<&QuickReply> for ReplyButton {
    fn from(reply: &QuickReply) -> Self {
        Self { label: reply.label.clone(), value: reply.value.clone() }
    }
}

/// One message addressed to a chat identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<ReplyButton>,
}

pub struct MessageBuilder {
    recipient: String,
    text: String,
    buttons: Vec<ReplyButton>,
}

impl MessageBuilder {
    pub fn new(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self { recipient: recipient.into(), text: text.into(), buttons: Vec::new() }
    }

    pub fn button(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.buttons.push(ReplyButton { label: label.into(), value: value.into() });
        self
    }

    pub fn buttons<'a>(mut self, replies: impl IntoIterator<Item = &'a QuickReply>) -> Self {
        self.buttons.extend(replies.into_iter().map(ReplyButton::from));
        self
    }

    pub fn build(self) -> OutboundMessage {
        OutboundMessage { recipient: self.recipient, text: self.text, buttons: self.buttons }
    }
}

/// One outbound message per notification, in order.
pub fn render_turn(recipient: &str, turn: &Turn) -> Vec<OutboundMessage> {
    turn.notifications
        .iter()
        .map(|notification| {
            MessageBuilder::new(recipient, notification.text.clone())
                .buttons(&notification.quick_replies)
                .build()
        })
        .collect()
}

/// Text rendering for transports without buttons: labels go on a trailing line.
pub fn to_plain_text(message: &OutboundMessage) -> String {
    if message.buttons.is_empty() {
        return message.text.clone();
    }

    let buttons =
        message.buttons.iter().map(|button| format!("[{}]", button.label)).collect::<Vec<_>>();
    format!("{}\n{}", message.text, buttons.join(" "))
}
