//! Conversation timeline integration tests
//!
//! Ordering, streaming and persistence through the `SQLite` store.

use std::sync::Arc;

use beacon_interact::{
    CompletionSignal, ConversationStore, ConversationTimeline, MessagePatch, NewMessage, Renderer,
    Role, Turn,
};
use chrono::{Duration, Utc};

mod common;
use common::{CountingStore, RecordingRenderer, RenderCall};

fn persisted_timeline() -> (ConversationTimeline, Arc<CountingStore>, String) {
    let store = CountingStore::new();
    let conversation = store.repo.current_conversation().unwrap();
    let timeline =
        ConversationTimeline::new().with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);
    timeline.set_conversation_id(conversation.clone());
    (timeline, store, conversation)
}

#[test]
fn identical_timestamps_keep_creation_order() {
    let timeline = ConversationTimeline::new();
    let t = Utc::now();

    timeline.add_message(NewMessage::new(Role::User, "first").with_id("a").at(t));
    timeline.add_message(NewMessage::new(Role::Assistant, "second").with_id("b").at(t));

    let ids: Vec<String> = timeline.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn late_arrivals_are_inserted_chronologically() {
    let timeline = ConversationTimeline::new();
    let renderer = Arc::new(RecordingRenderer::default());
    let timeline = timeline.with_renderer(Arc::clone(&renderer) as Arc<dyn Renderer>);
    let t = Utc::now();

    timeline.add_message(NewMessage::new(Role::User, "later").with_id("late").at(t));
    timeline.add_message(
        NewMessage::new(Role::User, "earlier")
            .with_id("early")
            .at(t - Duration::seconds(5)),
    );
    timeline.add_message(NewMessage::new(Role::Assistant, "tie").with_id("tie").at(t));

    let ids: Vec<String> = timeline.messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["early", "late", "tie"]);

    let positions: Vec<usize> = renderer
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            RenderCall::Add { position, .. } => Some(position),
            _ => None,
        })
        .collect();
    assert_eq!(positions, vec![0, 0, 2]);
}

#[test]
fn update_keeps_position_and_timestamp() {
    let timeline = ConversationTimeline::new();
    let t = Utc::now();
    timeline.add_message(NewMessage::new(Role::User, "one").with_id("a").at(t));
    timeline.add_message(
        NewMessage::new(Role::User, "two")
            .with_id("b")
            .at(t + Duration::seconds(1)),
    );

    let updated = timeline
        .update_message("a", MessagePatch::content("one, edited"))
        .unwrap();

    assert_eq!(updated.timestamp, t);
    assert_eq!(timeline.messages()[0].content, "one, edited");
    assert!(timeline.update_message("missing", MessagePatch::finished()).is_err());
}

#[tokio::test]
async fn streaming_renders_one_entry_with_concatenated_content() {
    let (timeline, _, _) = persisted_timeline();

    let first = timeline.append_streaming("The ");
    for delta in ["quick ", "brown ", "fox"] {
        assert_eq!(timeline.append_streaming(delta), first);
    }

    let messages = timeline.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_streaming);
    assert_eq!(messages[0].content, "The quick brown fox");

    let finalized = timeline.finalize_streaming().await.unwrap();
    assert_eq!(finalized.id, first);
    assert!(!finalized.is_streaming);
    assert!(!timeline.is_streaming());
    assert_eq!(timeline.len(), 1);
}

#[tokio::test]
async fn finalize_twice_persists_once() {
    let (timeline, store, conversation) = persisted_timeline();

    timeline.append_streaming("Done.");
    assert!(timeline.finalize_streaming().await.is_some());
    assert!(timeline.finalize_streaming().await.is_none());

    let history = store.repo.history(&conversation).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].assistant_text(), Some("Done."));
}

#[tokio::test]
async fn blank_streamed_response_is_not_persisted() {
    let (timeline, store, conversation) = persisted_timeline();

    timeline.start_streaming();
    timeline.append_streaming("   ");
    assert!(timeline.finalize_streaming().await.is_some());

    assert!(store.repo.history(&conversation).unwrap().is_empty());
}

#[tokio::test]
async fn completion_signals_finalize_once() {
    let (timeline, store, conversation) = persisted_timeline();

    timeline.append_streaming("reply");
    assert!(
        timeline
            .signal_completion(CompletionSignal::StreamingStopped)
            .await
    );
    assert!(
        !timeline
            .signal_completion(CompletionSignal::SessionChanged)
            .await
    );
    assert!(
        !timeline
            .signal_completion(CompletionSignal::ResponseDone("resp".to_string()))
            .await
    );

    assert_eq!(store.repo.history(&conversation).unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_response_done_is_deduplicated() {
    let (timeline, _, _) = persisted_timeline();

    timeline.append_streaming("one");
    assert!(timeline.complete_response("resp_1").await);

    // A new response streams, then a stale duplicate completion for the old id arrives
    timeline.append_streaming("two");
    assert!(!timeline.complete_response("resp_1").await);
    assert!(timeline.is_streaming());
    assert!(timeline.complete_response("resp_2").await);
}

#[tokio::test]
async fn pending_user_message_keeps_its_turn_start() {
    let (timeline, store, conversation) = persisted_timeline();

    let pending = timeline.begin_pending_user();
    let started = timeline.get(&pending).unwrap().timestamp;
    timeline.append_streaming("Assistant reply");

    let resolved = timeline.resolve_pending_user("What time is it?").await;

    assert_eq!(resolved.id, pending);
    assert_eq!(resolved.timestamp, started);
    assert_eq!(timeline.messages()[0].content, "What time is it?");

    let history = store.repo.history(&conversation).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timestamp, started);
}

#[tokio::test]
async fn user_message_without_conversation_resolves_current() {
    let store = CountingStore::new();
    let timeline =
        ConversationTimeline::new().with_store(Arc::clone(&store) as Arc<dyn ConversationStore>);

    timeline.record_user_message("hello").await;

    let conversation = timeline.conversation_id().unwrap();
    assert_eq!(store.repo.history(&conversation).unwrap().len(), 1);
}

#[tokio::test]
async fn persistence_failure_keeps_message_rendered() {
    let (timeline, _, _) = persisted_timeline();
    timeline.set_conversation_id("vanished");

    let message = timeline.record_user_message("still here").await;

    assert_eq!(timeline.get(&message.id).unwrap().content, "still here");
}

#[test]
fn history_load_replaces_and_skips_blank_halves() {
    let timeline = ConversationTimeline::new();
    timeline.add_message(NewMessage::new(Role::User, "stale"));
    let t = Utc::now();

    let turns = vec![
        Turn::assistant("conv", "second", t + Duration::seconds(1)),
        Turn::user("conv", "first", t),
        Turn::user("conv", "  ", t + Duration::seconds(2)),
    ];

    assert_eq!(timeline.load_from_history(&turns), 2);
    let contents: Vec<String> = timeline.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[test]
fn clear_empties_timeline_and_renderer() {
    let renderer = Arc::new(RecordingRenderer::default());
    let timeline =
        ConversationTimeline::new().with_renderer(Arc::clone(&renderer) as Arc<dyn Renderer>);
    timeline.start_streaming();

    timeline.clear();

    assert!(timeline.is_empty());
    assert!(!timeline.is_streaming());
    assert_eq!(renderer.calls().last(), Some(&RenderCall::Clear));
}

#[tokio::test]
async fn reload_matches_live_order_when_user_types_mid_stream() {
    let (timeline, store, conversation) = persisted_timeline();

    timeline.append_streaming("Let me check");
    std::thread::sleep(std::time::Duration::from_millis(5));
    timeline.record_user_message("actually, never mind").await;
    timeline.finalize_streaming().await.unwrap();

    let live: Vec<String> = timeline.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(live, vec!["Let me check", "actually, never mind"]);

    let reloaded = ConversationTimeline::new();
    reloaded.load_from_history(&store.repo.history(&conversation).unwrap());
    let restored: Vec<String> = reloaded.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(restored, live);
}

#[test]
fn concurrent_speech_starts_share_one_placeholder() {
    let timeline = Arc::new(ConversationTimeline::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let timeline = Arc::clone(&timeline);
            std::thread::spawn(move || timeline.begin_pending_user())
        })
        .collect();
    let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(ids.iter().all(|id| id == &ids[0]));
    assert_eq!(timeline.len(), 1);
}
