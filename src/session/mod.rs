//! Live session: remote channel, state machine and the UI handle

pub mod channel;
pub mod controller;
pub mod host;
pub mod websocket;

pub use channel::{ChannelEvent, ChannelSetup, SpeechChannel};
pub use controller::{Command, SessionController, SessionEvent, SessionState};
pub use host::LiveHost;
pub use websocket::WebSocketChannel;
