//! Request handlers a wrapper can be configured with.
pub mod echo;
pub mod static_text;
pub mod status;

pub use echo::EchoHandler;
pub use static_text::StaticTextHandler;
pub use status::StatusHandler;
