use crate::db::models::MessageType;
use crate::error::ApiError;

pub const PREVIEW_MAX_CHARS: usize = 50;
pub const NOTIFICATION_MAX_CHARS: usize = 100;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// The fields preview and notification text are derived from.
#[derive(Debug, Clone, Copy)]
pub struct Content<'a> {
    pub message_type: MessageType,
    pub text: Option<&'a str>,
    pub file_name: Option<&'a str>,
    pub has_geo: bool,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|t| !t.trim().is_empty())
}

/// Conversation list preview, stored on the conversation after each send.
pub fn conversation_preview(content: &Content<'_>) -> String {
    if content.message_type == MessageType::Location && content.has_geo {
        return "📍 Location".to_string();
    }
    match non_empty(content.text) {
        Some(text) => truncate_chars(text, PREVIEW_MAX_CHARS),
        None => format!("{} message", content.message_type),
    }
}

/// Body of the secondary notification pushed to recipients not viewing the chat.
pub fn notification_body(content: &Content<'_>) -> String {
    match content.message_type {
        MessageType::Image => "📷 Image".to_string(),
        MessageType::Video => "🎥 Video".to_string(),
        MessageType::Document => format!("📄 {}", non_empty(content.file_name).unwrap_or("File")),
        MessageType::Location => "📍 Location".to_string(),
        MessageType::Sticker => "Sticker".to_string(),
        _ => match non_empty(content.text) {
            Some(text) => truncate_chars(text, NOTIFICATION_MAX_CHARS),
            None => "New message".to_string(),
        },
    }
}

/// Parse a size given as bytes or as a human string such as "1.5 MB".
pub fn parse_file_size(raw: &str) -> Result<i64, ApiError> {
    let invalid = || ApiError::Validation(format!("invalid file_size '{}'", raw));

    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, scale) = if let Some(n) = upper.strip_suffix("GB") {
        (n, GB)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, MB)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, KB)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1.0)
    } else {
        (upper.as_str(), 1.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok((value * scale) as i64)
}

/// Render a byte count the way clients display it.
pub fn format_file_size(bytes: i64) -> String {
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.1} GB", b / GB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(message_type: MessageType, text: Option<&'static str>) -> Content<'static> {
        Content {
            message_type,
            text,
            file_name: None,
            has_geo: false,
        }
    }

    #[test]
    fn preview_truncates_to_fifty_chars() {
        let long = "é".repeat(80);
        let preview = conversation_preview(&Content {
            text: Some(&long),
            ..content(MessageType::Text, None)
        });
        assert_eq!(preview.chars().count(), 50);
    }

    #[test]
    fn preview_labels() {
        let location = Content {
            has_geo: true,
            ..content(MessageType::Location, None)
        };
        assert_eq!(conversation_preview(&location), "📍 Location");
        assert_eq!(
            conversation_preview(&content(MessageType::Image, None)),
            "image message"
        );
        assert_eq!(
            conversation_preview(&content(MessageType::Image, Some("look"))),
            "look"
        );
    }

    #[test]
    fn notification_labels() {
        assert_eq!(notification_body(&content(MessageType::Image, Some("x"))), "📷 Image");
        assert_eq!(notification_body(&content(MessageType::Video, None)), "🎥 Video");
        assert_eq!(notification_body(&content(MessageType::Location, None)), "📍 Location");
        assert_eq!(notification_body(&content(MessageType::Text, None)), "New message");
        assert_eq!(notification_body(&content(MessageType::Text, Some("yo"))), "yo");

        let doc = Content {
            file_name: Some("report.pdf"),
            ..content(MessageType::Document, None)
        };
        assert_eq!(notification_body(&doc), "📄 report.pdf");
        assert_eq!(notification_body(&content(MessageType::Document, None)), "📄 File");
    }

    #[test]
    fn parses_human_sizes() {
        assert_eq!(parse_file_size("512").unwrap(), 512);
        assert_eq!(parse_file_size("20 KB").unwrap(), 20 * 1024);
        assert_eq!(parse_file_size("1.5 MB").unwrap(), 1_572_864);
        assert_eq!(parse_file_size("3gb").unwrap(), 3 * 1024 * 1024 * 1024);
        assert_eq!(parse_file_size("100 B").unwrap(), 100);
    }

    #[test]
    fn rejects_garbage_sizes() {
        assert!(matches!(parse_file_size("big"), Err(ApiError::Validation(_))));
        assert!(matches!(parse_file_size("-4 KB"), Err(ApiError::Validation(_))));
        assert!(matches!(parse_file_size(""), Err(ApiError::Validation(_))));
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1_572_864), "1.5 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
