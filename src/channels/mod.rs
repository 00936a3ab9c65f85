//! Telegram Bot API plumbing.

pub mod telegram;
pub mod telegram_types;

pub use telegram::{TelegramApi, classify};
pub use telegram_types::{CallbackQuery, InlineKeyboardMarkup, Message, Update, User};
