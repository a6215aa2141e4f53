pub mod relay;
pub mod telegram;

pub use relay::{RelayConfig, RunController};
pub use telegram::{Bot, TelegramApi};
