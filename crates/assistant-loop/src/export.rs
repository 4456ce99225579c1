use assistant_core::{Conversation, Role};

/// Render a conversation as markdown.
///
/// User messages already carry their attached code fenced in the raw
/// content, so nothing is appended for it here.
pub fn to_markdown(conversation: &Conversation) -> String {
    let mut markdown = String::new();

    for message in &conversation.messages {
        let header = match message.role {
            Role::User => "You",
            Role::System => "System Context",
            Role::Assistant => "Assistant",
        };
        let body = if message.raw_content.is_empty() {
            &message.content
        } else {
            &message.raw_content
        };

        markdown.push_str(&format!("**[{}]**\n{}\n\n", header, body));
    }

    markdown
}
