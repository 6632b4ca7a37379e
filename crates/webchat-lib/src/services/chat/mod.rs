// Chat Service Module
// Feature: Browser Chat (001-chat-session)

pub mod error;
pub mod store;
pub mod stream;
pub mod transcript;

pub use error::{SessionError, SessionErrorCode, SessionResult};
pub use store::{ChatStore, ChatView, GenerationTicket, LoadTicket, StoreTimeouts};
pub use stream::GenerationOutcome;
pub use transcript::Transcript;
