//! Property-based tests for the turn state machine.

use std::collections::HashMap;

use proptest::prelude::*;
use serde_json::{json, Value};

use crate::session::{Message, Role};

use super::event::{Event, StageEvent};
use super::state::{ClientState, SessionView, TimelineStep};
use super::transition::transition;
use super::Effect;

const KNOWN_TAGS: [&str; 7] = [
    "preprocess_input",
    "extract_filters",
    "retrieve_documents",
    "grade_documents",
    "reconstruct_full_text",
    "summarize_bills",
    "compile_final_research",
];

// ============================================================================
// Strategies
// ============================================================================

/// Arbitrary JSON, bounded in depth and width.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,10}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn arb_filters_payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!({})),
        Just(json!({ "filters": null })),
        Just(json!({ "filters": {} })),
        (
            "[0-9]{4}",
            prop::option::of("[A-Z]{2}"),
            prop::option::of("HB [0-9]{1,3}"),
        )
            .prop_map(|(year, state, bill)| {
                let mut filters = serde_json::Map::new();
                filters.insert("year".to_string(), json!(year));
                if let Some(state) = state {
                    filters.insert("state".to_string(), json!(state));
                }
                if let Some(bill) = bill {
                    filters.insert("bill_identifier".to_string(), json!(bill));
                }
                json!({ "filters": filters })
            }),
    ]
}

/// One raw update for a known stage tag, paired with the title its step
/// must carry.
fn arb_known_update() -> impl Strategy<Value = (Value, &'static str)> {
    prop_oneof![
        arb_json().prop_map(|p| (json!({ "preprocess_input": p }), "Preprocessing")),
        arb_filters_payload().prop_map(|p| (json!({ "extract_filters": p }), "Filtering")),
        (0usize..6).prop_map(|n| {
            (
                json!({ "retrieve_documents": { "retrieved_docs": vec![json!("doc"); n] } }),
                "Retrieving",
            )
        }),
        (0usize..6).prop_map(|n| {
            (
                json!({ "grade_documents": { "grade_details": vec![json!({}); n] } }),
                "Grading",
            )
        }),
        arb_json().prop_map(|p| (json!({ "reconstruct_full_text": p }), "Reconstructing")),
        arb_json().prop_map(|p| (json!({ "summarize_bills": p }), "Summarizing")),
        arb_json().prop_map(|p| (json!({ "compile_final_research": p }), "Finalizing")),
    ]
}

/// A single-key update whose tag is outside the known set.
fn arb_unknown_update() -> impl Strategy<Value = Value> {
    ("[a-z_]{1,16}", arb_json())
        .prop_filter("tag must not be a known stage", |(tag, _)| {
            !KNOWN_TAGS.contains(&tag.as_str())
        })
        .prop_map(|(tag, payload)| json!({ tag: payload }))
}

fn arb_any_update() -> impl Strategy<Value = Value> {
    prop_oneof![
        arb_known_update().prop_map(|(raw, _)| raw),
        arb_unknown_update(),
    ]
}

fn arb_step() -> impl Strategy<Value = TimelineStep> {
    ("[A-Za-z]{1,10}", "[A-Za-z0-9 ]{0,20}").prop_map(|(title, data)| TimelineStep::new(title, data))
}

fn arb_client_state() -> impl Strategy<Value = ClientState> {
    (
        prop::collection::vec(arb_step(), 0..6),
        any::<bool>(),
        prop::collection::hash_map("[a-z0-9]{1,8}", prop::collection::vec(arb_step(), 0..4), 0..4),
    )
        .prop_map(|(timeline, finalize_pending, archive)| ClientState {
            timeline,
            finalize_pending,
            archive,
        })
}

fn active_view() -> SessionView {
    SessionView::new(true, None)
}

fn idle_view() -> SessionView {
    SessionView::new(false, None)
}

/// Drive one full turn from `state`: submit, the given stage updates, the
/// terminal stage, then the completion sync carrying the answer.
fn run_turn(state: &ClientState, answer_id: &str, updates: &[Value]) -> ClientState {
    let mut state = transition(
        state,
        &idle_view(),
        Event::Submit {
            id: format!("h-{answer_id}"),
            text: "query".to_string(),
        },
    )
    .new_state;

    let active = active_view();
    for raw in updates {
        state = transition(
            &state,
            &active,
            Event::Stage(StageEvent::from_update(raw.clone())),
        )
        .new_state;
    }
    state = transition(
        &state,
        &active,
        Event::Stage(StageEvent::from_update(json!({ "compile_final_research": {} }))),
    )
    .new_state;

    let done = SessionView::new(false, Some(Message::ai(answer_id, "report")));
    transition(&state, &done, Event::Sync).new_state
}

// ============================================================================
// Classification invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Decoding and classification never panic, whatever the server sends.
    #[test]
    fn classification_is_total(raw in arb_json()) {
        let event = StageEvent::from_update(raw);
        let _ = event.to_step();
        let _ = event.is_terminal();
    }

    /// Known tags always classify, and to their fixed title.
    #[test]
    fn known_tags_classify_to_their_title((raw, title) in arb_known_update()) {
        let step = StageEvent::from_update(raw).to_step();
        prop_assert_eq!(step.map(|s| s.title), Some(title.to_string()));
    }

    /// Unknown tags never produce a step, never arm the latch, and leave
    /// the state untouched when applied.
    #[test]
    fn unknown_updates_contribute_nothing(
        raw in arb_unknown_update(),
        state in arb_client_state(),
    ) {
        let event = StageEvent::from_update(raw);
        prop_assert!(event.to_step().is_none());
        prop_assert!(!event.is_terminal());

        let result = transition(&state, &active_view(), Event::Stage(event));
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }
}

// ============================================================================
// Turn lifecycle invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// The timeline is exactly the recognized subsequence of the stream,
    /// in arrival order.
    #[test]
    fn timeline_preserves_arrival_order(updates in prop::collection::vec(arb_any_update(), 0..12)) {
        let view = active_view();
        let mut state = ClientState::default();
        let mut expected = Vec::new();

        for raw in updates {
            let event = StageEvent::from_update(raw);
            if let Some(step) = event.to_step() {
                expected.push(step);
            }
            state = transition(&state, &view, Event::Stage(event)).new_state;
        }
        prop_assert_eq!(state.timeline, expected);
    }

    /// The latch is armed exactly when the terminal stage has appeared.
    #[test]
    fn latch_tracks_the_terminal_stage(updates in prop::collection::vec(arb_any_update(), 0..12)) {
        let view = active_view();
        let mut state = ClientState::default();
        let mut saw_terminal = false;

        for raw in updates {
            saw_terminal |= raw
                .as_object()
                .is_some_and(|map| map.contains_key("compile_final_research"));
            state = transition(&state, &view, Event::Stage(StageEvent::from_update(raw))).new_state;
        }
        prop_assert_eq!(state.finalize_pending, saw_terminal);
    }

    /// Submit with real text always yields a fresh turn, a single submit
    /// effect carrying the trimmed text, and an untouched archive.
    #[test]
    fn submit_resets_turn_state(
        state in arb_client_state(),
        text in "[a-zA-Z0-9 ]{0,20}[a-zA-Z0-9][a-zA-Z0-9 ]{0,20}",
    ) {
        let result = transition(
            &state,
            &idle_view(),
            Event::Submit { id: "m-next".to_string(), text: text.clone() },
        );

        prop_assert!(result.new_state.timeline.is_empty());
        prop_assert!(!result.new_state.finalize_pending);
        prop_assert_eq!(&result.new_state.archive, &state.archive);
        prop_assert_eq!(
            result.effects,
            vec![Effect::SubmitTurn { message: Message::human("m-next", text.trim()) }]
        );
    }

    /// Whitespace-only submissions change nothing at all.
    #[test]
    fn blank_submit_is_a_noop(state in arb_client_state(), text in "[ \t\r\n]{0,8}") {
        let result = transition(
            &state,
            &idle_view(),
            Event::Submit { id: "unused".to_string(), text },
        );
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }

    /// Cancel discards everything and asks the session to stop, then reset.
    #[test]
    fn cancel_discards_all_state(state in arb_client_state(), loading in any::<bool>()) {
        let result = transition(&state, &SessionView::new(loading, None), Event::Cancel);
        prop_assert_eq!(result.new_state, ClientState::default());
        prop_assert_eq!(result.effects, vec![Effect::StopRun, Effect::ResetSession]);
    }
}

// ============================================================================
// Archival invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// While the run is active the latch never triggers archival.
    #[test]
    fn no_archival_while_loading(state in arb_client_state(), answer_id in "[a-z0-9]{1,8}") {
        let view = SessionView::new(true, Some(Message::ai(answer_id, "done")));
        let result = transition(&state, &view, Event::Sync);
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }

    /// A sync with the latch down is inert no matter what the view shows.
    #[test]
    fn sync_without_latch_is_inert(state in arb_client_state(), loading in any::<bool>()) {
        let mut state = state;
        state.finalize_pending = false;
        let view = SessionView::new(loading, Some(Message::ai("m1", "done")));
        let result = transition(&state, &view, Event::Sync);
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }

    /// A non-qualifying last message defers archival and keeps the latch.
    #[test]
    fn archival_deferred_without_a_qualifying_answer(
        timeline in prop::collection::vec(arb_step(), 1..5),
    ) {
        let state = ClientState {
            timeline,
            finalize_pending: true,
            archive: HashMap::new(),
        };
        let views = [
            SessionView::new(false, None),
            SessionView::new(false, Some(Message::human("h1", "hi"))),
            SessionView::new(
                false,
                Some(Message { id: None, role: Role::Ai, content: "x".to_string() }),
            ),
        ];
        for view in views {
            let result = transition(&state, &view, Event::Sync);
            prop_assert!(result.new_state.archive.is_empty());
            prop_assert!(result.new_state.finalize_pending);
            prop_assert!(result.effects.is_empty());
        }
    }

    /// A qualifying sync archives the live timeline under the answer id,
    /// clears the latch, and cannot fire a second time.
    #[test]
    fn qualifying_sync_archives_exactly_once(
        timeline in prop::collection::vec(arb_step(), 0..5),
        answer_id in "[a-z0-9]{1,8}",
    ) {
        let state = ClientState {
            timeline: timeline.clone(),
            finalize_pending: true,
            archive: HashMap::new(),
        };
        let view = SessionView::new(false, Some(Message::ai(answer_id.clone(), "done")));

        let result = transition(&state, &view, Event::Sync);
        prop_assert_eq!(result.new_state.archived(&answer_id), Some(timeline.as_slice()));
        prop_assert!(!result.new_state.finalize_pending);
        prop_assert_eq!(
            result.effects,
            vec![Effect::TurnArchived { message_id: answer_id.clone() }]
        );

        let again = transition(&result.new_state, &view, Event::Sync);
        prop_assert_eq!(again.new_state, result.new_state);
        prop_assert!(again.effects.is_empty());
    }
}

// ============================================================================
// Multi-turn sequences
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Later turns never overwrite an earlier archive entry: keys are the
    /// answer ids, and each turn gets a fresh one.
    #[test]
    fn archives_survive_later_turns(
        first in prop::collection::vec(arb_any_update(), 0..6),
        second in prop::collection::vec(arb_any_update(), 0..6),
    ) {
        let state = run_turn(&ClientState::default(), "m1", &first);
        let first_archived = state.archived("m1").map(<[TimelineStep]>::to_vec);
        prop_assert!(first_archived.is_some());

        let state = run_turn(&state, "m2", &second);
        prop_assert_eq!(state.archived("m1").map(<[TimelineStep]>::to_vec), first_archived);
        prop_assert!(state.archived("m2").is_some());
        prop_assert!(!state.finalize_pending);
    }

    /// A turn's archived snapshot always ends with the finalizing step and
    /// matches the timeline at completion.
    #[test]
    fn archived_snapshot_matches_completed_timeline(
        updates in prop::collection::vec(arb_any_update(), 0..8),
    ) {
        let state = run_turn(&ClientState::default(), "m1", &updates);
        let archived = state.archived("m1").map(<[TimelineStep]>::to_vec);
        prop_assert_eq!(archived, Some(state.timeline.clone()));
        let last = state.timeline.last();
        prop_assert_eq!(last.map(|s| s.title.as_str()), Some("Finalizing"));
    }
}
