//! Channel transports.

mod email;
mod telegram;
mod whatsapp;

pub use email::EmailTransport;
pub use telegram::TelegramTransport;
pub use whatsapp::WhatsAppTransport;
