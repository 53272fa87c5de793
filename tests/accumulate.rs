//! Folding fragment sequences into a conversation

use ai_chat_core::pipeline::{accumulate, AccumulationError};
use ai_chat_core::types::{
    Citation, Content, Conversation, Fragment, FinishReason, Message, MessageRole, ToolCall,
    UsageUpdate,
};

fn started() -> Conversation {
    let mut c = Conversation::new();
    c.push_user("Plan my trip to Paris").unwrap();
    c
}

fn replay(fragments: &[Fragment]) -> Result<Conversation, AccumulationError> {
    fragments.iter().try_fold(started(), accumulate)
}

fn weather_turn() -> Vec<Fragment> {
    vec![
        Fragment::thinking("Need the forecast."),
        Fragment::text("Let me check"),
        Fragment::text(" the weather."),
        Fragment::tool_call_start("call_1", "get_weather"),
        Fragment::tool_call_delta("{\"city\":"),
        Fragment::tool_call_delta("\"Paris\"}"),
        Fragment::tool_call_end(),
        Fragment::usage(UsageUpdate {
            input_tokens: Some(40),
            output_tokens: Some(12),
            finish_reason: Some(FinishReason::ToolCalls),
            ..Default::default()
        }),
    ]
}

#[test]
fn test_replay_is_deterministic() {
    let a = replay(&weather_turn()).unwrap();
    let b = replay(&weather_turn()).unwrap();
    assert_eq!(a.messages(), b.messages());
    assert_eq!(a.usage(), b.usage());
}

#[test]
fn test_turn_shape() {
    let mut conv = replay(&weather_turn()).unwrap();
    let usage = conv.finish_turn().unwrap();

    let reply = conv.last().unwrap();
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(
        reply.contents,
        vec![
            Content::thinking("Need the forecast."),
            Content::text("Let me check the weather."),
        ]
    );
    assert_eq!(
        reply.tool_calls,
        vec![ToolCall::new("call_1", "get_weather", "{\"city\":\"Paris\"}")]
    );
    assert_eq!(usage.input_tokens, 40);
    assert_eq!(usage.finish_reason, Some(FinishReason::ToolCalls));
    assert!(conv.validate().is_ok());
}

#[test]
fn test_citation_opens_text_block_when_needed() {
    let citation = Citation {
        start_index: 0,
        end_index: 5,
        cited_text: String::new(),
        sources: vec![],
    };
    let conv = replay(&[
        Fragment::thinking("hm"),
        Fragment {
            citation: Some(citation.clone()),
            ..Default::default()
        },
        Fragment::text("Paris"),
    ])
    .unwrap();
    let reply = conv.last().unwrap();
    assert_eq!(reply.contents.len(), 2);
    match &reply.contents[1] {
        Content::Text { text, citations } => {
            assert_eq!(text, "Paris");
            assert_eq!(citations, &vec![citation]);
        }
        other => panic!("expected text block, got {:?}", other),
    }
}

#[test]
fn test_broken_arguments_are_rejected() {
    let err = replay(&[
        Fragment::tool_call_start("call_1", "get_weather"),
        Fragment::tool_call_delta("{\"city\":"),
        Fragment::tool_call_end(),
    ])
    .unwrap_err();
    assert!(matches!(err, AccumulationError::InvalidToolArguments { .. }), "{}", err);
}

#[test]
fn test_complete_tool_call_in_one_fragment() {
    let mut conv = replay(&[Fragment::tool_call(ToolCall::new("c", "lookup", ""))]).unwrap();
    conv.finish_turn().unwrap();
    assert_eq!(conv.last().unwrap().tool_calls[0].arguments, "{}");
}

#[test]
fn test_next_turn_after_tool_results() {
    let mut conv = replay(&weather_turn()).unwrap();
    conv.finish_turn().unwrap();

    let call = conv.last().unwrap().tool_calls[0].clone();
    let results = Message::tool_results(vec![ai_chat_core::ToolCallResult::success(
        &call,
        "sunny, 24°C",
    )]);
    conv.push(results).unwrap();
    assert_eq!(conv.usage().input_tokens, 0);

    let conv = accumulate(conv, &Fragment::text("Sunny all week.")).unwrap();
    assert_eq!(conv.len(), 4);
    assert_eq!(conv.last().unwrap().as_text(), "Sunny all week.");
}

#[test]
fn test_sealed_turn_rejects_fragments() {
    let mut conv = replay(&[Fragment::text("done")]).unwrap();
    conv.finish_turn().unwrap();
    assert_eq!(
        conv.accumulate(&Fragment::text("more")).unwrap_err(),
        AccumulationError::TurnClosed
    );
}
