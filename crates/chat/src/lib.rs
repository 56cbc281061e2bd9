//! Chat transport layer for tally
//!
//! - **Events** (`events`) - inbound envelopes and the dispatcher feeding the conversation engine
//! - **Replies** (`replies`) - outbound messages with optional quick-reply buttons
//! - **Runner** (`runner`) - transport loop with reconnect backoff and bounded parallel dispatch
//! - **Stdio** (`stdio`) - line-oriented transport for local runs and tests
//!
//! ```text
//! ChatTransport → TransportRunner → EventDispatcher → ConversationEngine
//!                       ↑                                   ↓
//!                 OutboundMessage  ←──────────────────── Turn
//! ```

pub mod events;
pub mod replies;
pub mod runner;
pub mod stdio;

pub use events::{
    conversation_dispatcher, ChatEnvelope, ChatEvent, ConversationService, EventDispatcher,
    HandlerResult,
};
pub use replies::{MessageBuilder, OutboundMessage, ReplyButton};
pub use runner::{
    ChatTransport, NoopTransport, ReconnectPolicy, RunnerError, TransportError, TransportRunner,
};
pub use stdio::{LineTransport, StdioTransport};
