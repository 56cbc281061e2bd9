//! Line-oriented transport.
//!
//! Each input line is `<sender> <text>`; a text starting with `!` is a button
//! press carrying the rest of the line as its value. Replies are written as
//! `[<recipient>] <line>` for every line of the rendered message.

use async_trait::async_trait;
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin,
    Stdout,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::events::{ChatEnvelope, ChatEvent, ChoiceEvent, MessageEvent};
use crate::replies::{to_plain_text, OutboundMessage};
use crate::runner::{ChatTransport, TransportError};

const CHOICE_PREFIX: char = '!';

pub type StdioTransport = LineTransport<BufReader<Stdin>, Stdout>;

pub struct LineTransport<R, W> {
    reader: Mutex<Lines<R>>,
    writer: Mutex<W>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader: Mutex::new(reader.lines()), writer: Mutex::new(writer) }
    }

    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }
}

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

/// `None` for blank lines.
pub fn parse_line(line: &str) -> Option<ChatEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (sender, rest) = match line.split_once(char::is_whitespace) {
        Some((sender, rest)) => (sender, rest.trim_start()),
        None => (line, ""),
    };
    let sender_id = sender.to_owned();

    Some(match rest.strip_prefix(CHOICE_PREFIX) {
        Some(value) => ChatEvent::Choice(ChoiceEvent { sender_id, value: value.trim().to_owned() }),
        None => ChatEvent::Message(MessageEvent { sender_id, text: rest.to_owned() }),
    })
}

#[async_trait]
impl<R, W> ChatTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let line = reader
                .next_line()
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            if let Some(event) = parse_line(&line) {
                return Ok(Some(ChatEnvelope { envelope_id: Uuid::new_v4().to_string(), event }));
            }
        }
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let mut rendered = String::new();
        for line in to_plain_text(message).lines() {
            rendered.push_str(&format!("[{}] {line}\n", message.recipient));
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(rendered.as_bytes())
            .await
            .map_err(|error| TransportError::Send(error.to_string()))?;
        writer.flush().await.map_err(|error| TransportError::Send(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_line, LineTransport};
    use crate::events::{ChatEvent, ChoiceEvent, MessageEvent};
    use crate::replies::MessageBuilder;
    use crate::runner::ChatTransport;

    #[test]
    fn parses_messages_and_button_presses() {
        assert_eq!(
            parse_line("alice /convert"),
            Some(ChatEvent::Message(MessageEvent {
                sender_id: "alice".to_owned(),
                text: "/convert".to_owned(),
            }))
        );
        assert_eq!(
            parse_line("  root   !Add currency "),
            Some(ChatEvent::Choice(ChoiceEvent {
                sender_id: "root".to_owned(),
                value: "Add currency".to_owned(),
            }))
        );
        assert_eq!(
            parse_line("bob"),
            Some(ChatEvent::Message(MessageEvent { sender_id: "bob".to_owned(), text: String::new() }))
        );
        assert_eq!(parse_line("   "), None);
    }

    #[tokio::test]
    async fn reads_envelopes_until_end_of_input() {
        let input: &[u8] = b"alice /start\n\nbob !usd\n";
        let transport = LineTransport::new(input, Vec::new());

        let first = transport.next_envelope().await.expect("read").expect("envelope");
        assert_eq!(first.event.sender_id(), Some("alice"));
        let second = transport.next_envelope().await.expect("read").expect("envelope");
        assert!(matches!(second.event, ChatEvent::Choice(ref choice) if choice.value == "usd"));
        assert_ne!(first.envelope_id, second.envelope_id);
        assert_eq!(transport.next_envelope().await.expect("read"), None);
    }

    #[tokio::test]
    async fn writes_each_reply_line_with_the_recipient() {
        let transport = LineTransport::new(&b""[..], Vec::new());
        let message = MessageBuilder::new("root", "Choose an action:")
            .button("Add currency", "Add currency")
            .build();

        transport.send(&message).await.expect("send");

        let written = String::from_utf8(transport.into_writer()).expect("utf8");
        assert_eq!(written, "[root] Choose an action:\n[root] [Add currency]\n");
    }
}
