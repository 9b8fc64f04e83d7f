use std::collections::{HashSet, VecDeque};

use rxdial_call_core::state_table::CALL_STATE_TABLE;
use rxdial_call_core::types::SearchId;
use rxdial_call_core::{
    CallCoreError, CallEvent, CallState, CallStateMachine, CreateCallParams, TransitionOptions,
};

const ALL_STATES: [CallState; 12] = [
    CallState::Created,
    CallState::Dialing,
    CallState::Ivr,
    CallState::IvrFailed,
    CallState::Hold,
    CallState::HumanDetected,
    CallState::Voicemail,
    CallState::Failed,
    CallState::Bridging,
    CallState::Connected,
    CallState::Ending,
    CallState::Ended,
];

fn params(search_id: &SearchId) -> CreateCallParams {
    CreateCallParams {
        search_id: search_id.clone(),
        pharmacy_id: "ph-1".into(),
        pharmacy_name: "CVS Pharmacy #1184".to_string(),
        phone_number: "+15551230000".to_string(),
        metadata: Default::default(),
    }
}

/// Drive a call along a path of states, asserting each hop succeeds.
async fn drive(machine: &CallStateMachine, search_id: &SearchId, path: &[CallState]) -> rxdial_call_core::CallRecord {
    let record = machine.create(params(search_id)).await.unwrap();
    for state in path {
        machine
            .transition(&record.call_id, *state, TransitionOptions::default())
            .await
            .unwrap_or_else(|e| panic!("transition to {:?} failed: {e}", state));
    }
    machine.get_call(&record.call_id).await.unwrap()
}

/// Independent statement of the allowed transition graph. Every one of
/// the 144 (from, to) pairs must agree with the table.
fn expected_targets(from: CallState) -> &'static [CallState] {
    use CallState::*;
    match from {
        Created => &[Dialing, Failed],
        Dialing => &[Ivr, Failed, Ended],
        Ivr => &[Hold, IvrFailed, HumanDetected, Voicemail, Failed],
        IvrFailed => &[Ending, Ended],
        Hold => &[HumanDetected, Ending, Ended, Failed],
        HumanDetected => &[Bridging, Ending, Ended],
        Voicemail => &[Ending, Ended],
        Failed => &[Ended],
        Bridging => &[Connected, Ending, Ended, Failed],
        Connected => &[Ending, Ended],
        Ending => &[Ended],
        Ended => &[],
    }
}

#[tokio::test]
async fn every_pair_succeeds_iff_in_table() {
    for from in ALL_STATES {
        for to in ALL_STATES {
            assert_eq!(
                CALL_STATE_TABLE.is_allowed(from, to),
                expected_targets(from).contains(&to),
                "transition legality mismatch for {:?} -> {:?}",
                from,
                to
            );
        }
    }

    // Exercise the machine itself on a few representative pairs.
    let machine = CallStateMachine::new();
    let search_id = SearchId::new();
    let record = machine.create(params(&search_id)).await.unwrap();

    // Created -> Connected is not in the table: rejected, state unchanged.
    let err = machine
        .transition(&record.call_id, CallState::Connected, TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CallCoreError::InvalidTransition { .. }));
    assert_eq!(machine.state_of(&record.call_id).await, Some(CallState::Created));

    // Created -> Dialing is in the table.
    machine
        .transition(&record.call_id, CallState::Dialing, TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(machine.state_of(&record.call_id).await, Some(CallState::Dialing));
}

#[tokio::test]
async fn ended_is_absorbing() {
    let machine = CallStateMachine::new();
    let search_id = SearchId::new();
    let record = drive(
        &machine,
        &search_id,
        &[CallState::Dialing, CallState::Ended],
    )
    .await;

    for to in ALL_STATES {
        let result = machine
            .transition(&record.call_id, to, TransitionOptions::default())
            .await;
        assert!(
            result.is_err(),
            "no transition out of Ended may succeed (tried {:?})",
            to
        );
    }
    assert_eq!(machine.state_of(&record.call_id).await, Some(CallState::Ended));
}

#[test]
fn human_adjacent_states_require_dialing() {
    // Reachability from Created with the Dialing node removed: the only
    // states left are the direct dial-failure path. Nothing human-adjacent
    // is reachable without passing through Dialing.
    let mut reachable = HashSet::new();
    let mut frontier = VecDeque::from([CallState::Created]);
    while let Some(state) = frontier.pop_front() {
        if !reachable.insert(state) {
            continue;
        }
        for target in CALL_STATE_TABLE.allowed_targets(state) {
            if *target != CallState::Dialing {
                frontier.push_back(*target);
            }
        }
    }

    assert!(!reachable.contains(&CallState::Ivr));
    assert!(!reachable.contains(&CallState::Hold));
    assert!(!reachable.contains(&CallState::HumanDetected));
    assert!(!reachable.contains(&CallState::Voicemail));
    assert!(!reachable.contains(&CallState::Bridging));
    assert!(!reachable.contains(&CallState::Connected));
}

#[tokio::test]
async fn full_happy_path_yields_nine_history_entries() {
    let machine = CallStateMachine::new();
    let search_id = SearchId::new();
    let record = drive(
        &machine,
        &search_id,
        &[
            CallState::Dialing,
            CallState::Ivr,
            CallState::Hold,
            CallState::HumanDetected,
            CallState::Bridging,
            CallState::Connected,
            CallState::Ending,
            CallState::Ended,
        ],
    )
    .await;

    let history = machine.transition_history(&record.call_id).await;
    assert_eq!(history.len(), 9, "creation entry plus eight transitions");
    assert_eq!(history[0].from, CallState::Created);
    assert_eq!(history[0].to, CallState::Created);
    assert_eq!(history[8].to, CallState::Ended);
    assert_eq!(record.state, CallState::Ended);
    assert_eq!(record.previous_state, Some(CallState::Ending));
}

#[tokio::test]
async fn rejected_transition_leaves_history_untouched() {
    let machine = CallStateMachine::new();
    let search_id = SearchId::new();
    let record = machine.create(params(&search_id)).await.unwrap();

    let before = machine.transition_history(&record.call_id).await.len();
    let _ = machine
        .transition(&record.call_id, CallState::Voicemail, TransitionOptions::default())
        .await;
    let after = machine.transition_history(&record.call_id).await.len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn events_are_published_per_transition_kind() {
    let machine = CallStateMachine::new();
    let mut events = machine.subscribe();
    let search_id = SearchId::new();

    let record = machine.create(params(&search_id)).await.unwrap();
    machine
        .transition(&record.call_id, CallState::Dialing, TransitionOptions::default())
        .await
        .unwrap();
    machine
        .transition(&record.call_id, CallState::Ivr, TransitionOptions::default())
        .await
        .unwrap();
    machine
        .transition(&record.call_id, CallState::HumanDetected, TransitionOptions::default())
        .await
        .unwrap();

    let mut saw_state_changed = 0;
    let mut saw_human_detected = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CallEvent::StateChanged { .. } => saw_state_changed += 1,
            CallEvent::HumanDetected { pharmacy_name, .. } => {
                saw_human_detected = true;
                assert_eq!(pharmacy_name, "CVS Pharmacy #1184");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(saw_state_changed, 3);
    assert!(saw_human_detected);
}

#[tokio::test]
async fn failure_and_end_events() {
    let machine = CallStateMachine::new();
    let mut events = machine.subscribe();
    let search_id = SearchId::new();

    let record = machine.create(params(&search_id)).await.unwrap();
    machine
        .transition(&record.call_id, CallState::Failed, TransitionOptions::default())
        .await
        .unwrap();
    machine
        .transition(&record.call_id, CallState::Ended, TransitionOptions::default())
        .await
        .unwrap();

    let mut saw_failed = false;
    let mut saw_ended = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CallEvent::CallFailed { state, .. } => {
                saw_failed = true;
                assert_eq!(state, CallState::Failed);
            }
            CallEvent::CallEnded { final_state, .. } => {
                saw_ended = true;
                assert_eq!(final_state, CallState::Ended);
            }
            CallEvent::StateChanged { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(saw_failed);
    assert!(saw_ended);
}

#[tokio::test]
async fn external_session_is_assign_once() {
    let machine = CallStateMachine::new();
    let search_id = SearchId::new();
    let record = machine.create(params(&search_id)).await.unwrap();

    machine
        .set_external_session(&record.call_id, "PA-001")
        .await
        .unwrap();
    let err = machine
        .set_external_session(&record.call_id, "PA-002")
        .await
        .unwrap_err();
    assert!(matches!(err, CallCoreError::ExternalSessionAlreadySet(_)));

    let record = machine.get_call(&record.call_id).await.unwrap();
    assert_eq!(record.external_session_id.as_deref(), Some("PA-001"));
}

#[tokio::test]
async fn purge_removes_only_aged_out_terminal_records() {
    let machine = CallStateMachine::new();
    let search_id = SearchId::new();

    let ended = drive(&machine, &search_id, &[CallState::Dialing, CallState::Ended]).await;
    let live = machine.create(params(&search_id)).await.unwrap();

    // Zero retention purges anything already terminal.
    let purged = machine.purge_concluded(std::time::Duration::ZERO).await;
    assert_eq!(purged, 1);
    assert!(machine.get_call(&ended.call_id).await.is_none());
    assert!(machine.get_call(&live.call_id).await.is_some());
    assert_eq!(machine.calls_for_search(&search_id).await.len(), 1);
}
