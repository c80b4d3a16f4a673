pub mod templates;

pub use templates::{apply_chat_template, create_single_message, ChatMessage, TemplateType};
