use domain::Message;
use time::format_description::well_known::Rfc3339;

pub const EMPTY_TRANSCRIPT: &str = "No messages in this chat.";

/// 每条消息一行：`发送者 (时间): 内容`
pub fn render(messages: &[Message]) -> String {
    if messages.is_empty() {
        return EMPTY_TRANSCRIPT.to_string();
    }

    messages
        .iter()
        .map(|message| {
            let timestamp = message
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| message.timestamp.to_string());
            format!("{} ({}): {}", message.sender, timestamp, message.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
