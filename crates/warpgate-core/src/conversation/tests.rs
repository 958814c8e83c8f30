//! Tests for conversation types

use super::*;

#[test]
fn test_plain_string_content() {
    let message: ChatMessage =
        serde_json::from_str(r#"{"role":"user","content":"Hello, world!"}"#).unwrap();
    assert_eq!(message.role, Role::User);
    assert_eq!(message.text(), "Hello, world!");
}

#[test]
fn test_block_array_content() {
    let message: ChatMessage = serde_json::from_str(
        r#"{"role":"user","content":[{"type":"text","text":"Hello, "},{"type":"text","text":"world"}]}"#,
    )
    .unwrap();
    assert!(matches!(message.content, Some(MessageContent::Blocks(_))));
    assert_eq!(message.text(), "Hello, world");
}

#[test]
fn test_non_text_blocks_are_ignored() {
    let message: ChatMessage = serde_json::from_str(
        r#"{"role":"user","content":[{"type":"image","source":{"type":"url","url":"https://example.com/a.png"}},{"type":"text","text":"describe"}]}"#,
    )
    .unwrap();
    assert_eq!(message.text(), "describe");
}

#[test]
fn test_null_and_missing_content() {
    let message: ChatMessage =
        serde_json::from_str(r#"{"role":"assistant","content":null}"#).unwrap();
    assert_eq!(message.text(), "");

    let message: ChatMessage = serde_json::from_str(r#"{"role":"assistant"}"#).unwrap();
    assert_eq!(message.text(), "");
}

#[test]
fn test_unknown_role_maps_to_other() {
    let message: ChatMessage =
        serde_json::from_str(r#"{"role":"tool","content":"72F"}"#).unwrap();
    assert_eq!(message.role, Role::Other);
    assert!(!message.role.is_turn());
}

#[test]
fn test_empty_conversation_rejected() {
    let result = Conversation::new(vec![]);
    assert!(result.is_err());
    assert_eq!(result.unwrap_err(), Error::EmptyConversation);
}

#[test]
fn test_turn_count_ignores_system() {
    let conversation = Conversation::new(vec![
        ChatMessage::new(Role::System, "be terse"),
        ChatMessage::new(Role::User, "hi"),
        ChatMessage::new(Role::Assistant, "hello"),
        ChatMessage::new(Role::Other, "tool output"),
    ])
    .unwrap();
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation.turn_count(), 2);
}

#[test]
fn test_first_user_and_system_text() {
    let conversation = Conversation::new(vec![
        ChatMessage::new(Role::System, "first system"),
        ChatMessage::new(Role::System, "second system"),
        ChatMessage::new(Role::User, "question"),
    ])
    .unwrap();
    assert_eq!(conversation.first_system_text().as_deref(), Some("first system"));
    assert_eq!(conversation.first_user_text(), "question");

    let no_user = Conversation::new(vec![ChatMessage::new(Role::System, "s")]).unwrap();
    assert_eq!(no_user.first_user_text(), "");
}
