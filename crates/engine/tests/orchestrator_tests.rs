mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{pharmacy, MockDirectory, MockOutcomeStore, MockTelephony, RecordingSink};

use rxdial_call_core::types::{CallState, Pharmacy, SearchId};
use rxdial_call_core::{CallStateMachine, IvrNavigationTracker, TransitionOptions};
use rxdial_engine::{
    AckTimeoutConfig, AckTimeoutMonitor, CandidateDialState, DiscoveryPage, EngineConfig,
    EngineError, HumanReadyQueue, SearchOrchestrator, SearchResult, SearchStatus,
};

struct Ctx {
    orchestrator: Arc<SearchOrchestrator>,
    machine: Arc<CallStateMachine>,
    telephony: Arc<MockTelephony>,
    directory: Arc<MockDirectory>,
    sink: Arc<RecordingSink>,
    outcomes: Arc<MockOutcomeStore>,
    queue: Arc<HumanReadyQueue>,
    ack: Arc<AckTimeoutMonitor>,
}

fn test_config() -> EngineConfig {
    EngineConfig {
        polite_grace: Duration::from_millis(1),
        ack_deadline: Duration::from_secs(60),
        ack_sweep_interval: Duration::from_secs(5),
        ..Default::default()
    }
}

fn build(config: EngineConfig, directory: MockDirectory) -> Ctx {
    let machine = Arc::new(CallStateMachine::new());
    let tracker = Arc::new(IvrNavigationTracker::new());
    let telephony = Arc::new(MockTelephony::default());
    let directory = Arc::new(directory);
    let sink = Arc::new(RecordingSink::default());
    let outcomes = Arc::new(MockOutcomeStore::default());
    let queue = Arc::new(HumanReadyQueue::new(
        machine.clone(),
        telephony.clone(),
        config.polite_grace,
    ));
    let ack = Arc::new(AckTimeoutMonitor::new(
        AckTimeoutConfig::from(&config),
        queue.clone(),
        sink.clone(),
    ));
    let orchestrator = Arc::new(SearchOrchestrator::new(
        config,
        machine.clone(),
        tracker,
        queue.clone(),
        ack.clone(),
        telephony.clone(),
        directory.clone(),
        outcomes.clone(),
        sink.clone(),
    ));
    Ctx {
        orchestrator,
        machine,
        telephony,
        directory,
        sink,
        outcomes,
        queue,
        ack,
    }
}

fn three_pharmacies() -> Vec<Pharmacy> {
    vec![
        pharmacy("ph-1", "CVS Pharmacy #1184", Some("+15550001111")),
        pharmacy("ph-2", "Walgreens #881", Some("+15550002222")),
        pharmacy("ph-3", "Hometown Apothecary", Some("+15550003333")),
    ]
}

#[tokio::test]
async fn start_search_dials_one_candidate_and_reserves_the_rest() {
    let ctx = build(test_config(), MockDirectory::default());

    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin 500mg", "Springfield", three_pharmacies())
        .await
        .unwrap();

    assert_eq!(ctx.telephony.dial_count(), 1);
    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.status, SearchStatus::Active);
    assert_eq!(summary.calls_initiated, 1);
    assert_eq!(summary.reserve_pharmacies, 2);

    let calls = ctx.machine.calls_for_search(&search_id).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].state, CallState::Dialing);
    assert!(calls[0].external_session_id.is_some());
    assert_eq!(calls[0].pharmacy_name, "CVS Pharmacy #1184");
}

#[tokio::test]
async fn phoneless_candidates_are_tracked_but_never_dialed() {
    let ctx = build(test_config(), MockDirectory::default());

    let search_id = ctx
        .orchestrator
        .start_search(
            "user-1",
            "amoxicillin",
            "Springfield",
            vec![
                pharmacy("ph-1", "No Phone Drug", None),
                pharmacy("ph-2", "CVS", Some("+15550001111")),
            ],
        )
        .await
        .unwrap();

    assert_eq!(ctx.telephony.dial_count(), 1);
    let search = ctx.orchestrator.get_search(&search_id).await.unwrap();
    let no_phone = search
        .tracked
        .iter()
        .find(|c| c.pharmacy.name == "No Phone Drug")
        .unwrap();
    assert_eq!(no_phone.dial_state, CandidateDialState::NotCallable);
    assert!(no_phone.call_id.is_none());
}

#[tokio::test]
async fn dial_failure_escalates_to_the_next_candidate() {
    let ctx = build(test_config(), MockDirectory::default());
    ctx.telephony.fail_dials_to("+15550001111");

    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();

    // First dial failed, second succeeded; the search kept going.
    assert_eq!(ctx.telephony.dial_count(), 2);
    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.status, SearchStatus::Active);

    let calls = ctx.machine.calls_for_search(&search_id).await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].state, CallState::Ended, "failed dial is concluded");
    assert_eq!(calls[1].state, CallState::Dialing);

    let search = ctx.orchestrator.get_search(&search_id).await.unwrap();
    assert_eq!(search.tracked[0].dial_state, CandidateDialState::Concluded);
}

#[tokio::test]
async fn concluded_call_escalates_sequentially() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();

    let first_call = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();

    // Carrier reports no answer.
    ctx.orchestrator
        .handle_provider_status(&first_call, "no-answer")
        .await;

    assert_eq!(ctx.machine.state_of(&first_call).await, Some(CallState::Ended));
    // The next candidate was dialed automatically.
    assert_eq!(ctx.telephony.dial_count(), 2);
    let calls = ctx.machine.calls_for_search(&search_id).await;
    assert_eq!(calls[1].pharmacy_name, "Walgreens #881");
    assert_eq!(calls[1].state, CallState::Dialing);
}

#[tokio::test]
async fn exhausted_candidates_trigger_one_discovery_fetch_then_settle() {
    // The discovery page only carries phoneless candidates.
    let directory = MockDirectory::with_pages(vec![DiscoveryPage {
        pharmacies: vec![
            pharmacy("ph-9", "Unlisted Drug Co", None),
            pharmacy("ph-10", "Another Unlisted", None),
        ],
        has_more: false,
    }]);
    let ctx = build(test_config(), directory);

    let search_id = ctx
        .orchestrator
        .start_search(
            "user-1",
            "amoxicillin",
            "Springfield",
            vec![pharmacy("ph-1", "CVS", Some("+15550001111"))],
        )
        .await
        .unwrap();
    assert_eq!(ctx.directory.fetch_count(), 0);

    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();
    ctx.orchestrator
        .handle_provider_status(&call_id, "completed")
        .await;

    // Exactly one discovery page was fetched; it yielded nothing callable,
    // so the search settled as not found - no error raised.
    assert_eq!(ctx.directory.fetch_count(), 1);
    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.result, Some(SearchResult::NotFound));

    // Further attempts are inert: the search is settled.
    assert!(!ctx.orchestrator.start_next_call(&search_id).await.unwrap());
    assert_eq!(ctx.directory.fetch_count(), 1);

    // The phoneless discoveries are still surfaced to the patient.
    let search = ctx.orchestrator.get_search(&search_id).await.unwrap();
    assert!(search
        .tracked
        .iter()
        .any(|c| c.pharmacy.name == "Unlisted Drug Co"
            && c.dial_state == CandidateDialState::NotCallable));
}

#[tokio::test]
async fn discovery_replenishes_the_callable_pool() {
    let directory = MockDirectory::with_pages(vec![DiscoveryPage {
        pharmacies: vec![pharmacy("ph-9", "Costco Pharmacy", Some("+15550009999"))],
        has_more: false,
    }]);
    let ctx = build(test_config(), directory);

    let search_id = ctx
        .orchestrator
        .start_search(
            "user-1",
            "amoxicillin",
            "Springfield",
            vec![pharmacy("ph-1", "CVS", Some("+15550001111"))],
        )
        .await
        .unwrap();

    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();
    ctx.orchestrator
        .handle_provider_status(&call_id, "completed")
        .await;

    // The freshly discovered pharmacy was promoted and dialed.
    assert_eq!(ctx.directory.fetch_count(), 1);
    assert_eq!(ctx.telephony.dial_count(), 2);
    let calls = ctx.machine.calls_for_search(&search_id).await;
    assert_eq!(calls[1].pharmacy_name, "Costco Pharmacy");
    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.status, SearchStatus::Active);
}

#[tokio::test]
async fn a_full_reserve_pool_skips_discovery() {
    let ctx = build(test_config(), MockDirectory::default());
    let pharmacies = vec![
        pharmacy("ph-1", "CVS", Some("+15550001111")),
        pharmacy("ph-2", "Walgreens", Some("+15550002222")),
        pharmacy("ph-3", "Walmart", Some("+15550003333")),
        pharmacy("ph-4", "Kroger", Some("+15550004444")),
    ];
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", pharmacies)
        .await
        .unwrap();

    // Three reserves on hand - at the low-water mark, no fetch needed.
    assert!(ctx.orchestrator.check_and_fetch_more(&search_id).await.unwrap());
    assert_eq!(ctx.directory.fetch_count(), 0);
}

#[tokio::test]
async fn result_is_write_once() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();

    ctx.orchestrator
        .mark_found(&search_id, "CVS Pharmacy #1184")
        .await
        .unwrap();
    let err = ctx.orchestrator.mark_not_found(&search_id).await.unwrap_err();
    assert!(matches!(err, EngineError::ResultAlreadySet(_)));

    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.result, Some(SearchResult::Found));
    assert_eq!(
        summary.found_at_pharmacy_name.as_deref(),
        Some("CVS Pharmacy #1184")
    );
    // Exactly one outcome was persisted.
    assert_eq!(ctx.outcomes.persisted().len(), 1);
    assert_eq!(ctx.outcomes.persisted()[0].result, SearchResult::Found);
}

#[tokio::test]
async fn cancel_tears_down_active_calls() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();

    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();
    // Drive the call to hold so cancel has something live to end.
    ctx.orchestrator
        .handle_bridge_established(&call_id, "bridge-1")
        .await;
    ctx.machine
        .transition(&call_id, CallState::Hold, TransitionOptions::default())
        .await
        .unwrap();

    ctx.orchestrator.cancel_search(&search_id).await.unwrap();

    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.status, SearchStatus::Cancelled);
    assert_eq!(summary.result, Some(SearchResult::Cancelled));
    assert_eq!(ctx.machine.state_of(&call_id).await, Some(CallState::Ending));
    assert_eq!(ctx.telephony.completed_sessions().len(), 1);
}

#[tokio::test]
async fn bridge_established_moves_the_call_into_the_menu() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();
    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();

    ctx.orchestrator
        .handle_bridge_established(&call_id, "bridge-7")
        .await;

    let record = ctx.machine.get_call(&call_id).await.unwrap();
    assert_eq!(record.state, CallState::Ivr);
    assert_eq!(record.bridge_session_name.as_deref(), Some("bridge-7"));
}

#[tokio::test]
async fn out_of_order_provider_statuses_are_absorbed() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();
    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();

    ctx.orchestrator
        .handle_provider_status(&call_id, "completed")
        .await;
    assert_eq!(ctx.machine.state_of(&call_id).await, Some(CallState::Ended));

    // A late "ringing" duplicate changes nothing.
    ctx.orchestrator
        .handle_provider_status(&call_id, "ringing")
        .await;
    assert_eq!(ctx.machine.state_of(&call_id).await, Some(CallState::Ended));

    // Unknown vocabulary is ignored outright.
    ctx.orchestrator
        .handle_provider_status(&call_id, "transferred")
        .await;
    assert_eq!(ctx.machine.state_of(&call_id).await, Some(CallState::Ended));
}

#[tokio::test]
async fn patient_join_wins_and_retires_other_ready_calls() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();

    // First call reaches a human.
    let first = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();
    ctx.orchestrator
        .handle_bridge_established(&first, "bridge-1")
        .await;
    ctx.machine
        .transition(&first, CallState::HumanDetected, TransitionOptions::default())
        .await
        .unwrap();
    ctx.orchestrator.handle_human_ready(&first).await.unwrap();
    assert_eq!(ctx.ack.outstanding(), 1);

    // A second call (driven by hand) also reaches a human, and a third
    // sits on hold.
    let second = {
        let record = ctx
            .machine
            .create(rxdial_call_core::CreateCallParams {
                search_id: search_id.clone(),
                pharmacy_id: "ph-2".into(),
                pharmacy_name: "Walgreens #881".to_string(),
                phone_number: "+15550002222".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        ctx.machine
            .set_external_session(&record.call_id, "PA-88")
            .await
            .unwrap();
        for state in [CallState::Dialing, CallState::Ivr, CallState::HumanDetected] {
            ctx.machine
                .transition(&record.call_id, state, TransitionOptions::default())
                .await
                .unwrap();
        }
        record.call_id
    };
    let third = {
        let record = ctx
            .machine
            .create(rxdial_call_core::CreateCallParams {
                search_id: search_id.clone(),
                pharmacy_id: "ph-3".into(),
                pharmacy_name: "Hometown Apothecary".to_string(),
                phone_number: "+15550003333".to_string(),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        ctx.machine
            .set_external_session(&record.call_id, "PA-89")
            .await
            .unwrap();
        for state in [CallState::Dialing, CallState::Ivr, CallState::Hold] {
            ctx.machine
                .transition(&record.call_id, state, TransitionOptions::default())
                .await
                .unwrap();
        }
        record.call_id
    };

    // The earliest human-ready call is the first one.
    assert_eq!(
        ctx.orchestrator
            .next_human_ready_call(&search_id)
            .await
            .unwrap()
            .call_id,
        first
    );

    ctx.orchestrator.patient_join(&search_id, &first).await.unwrap();

    // Winner connected; other ready call retired; hold kept warm.
    assert_eq!(ctx.machine.state_of(&first).await, Some(CallState::Connected));
    assert_eq!(ctx.machine.state_of(&second).await, Some(CallState::Ending));
    assert_eq!(ctx.machine.state_of(&third).await, Some(CallState::Hold));

    // Deadline disarmed, connected call recorded, result settled.
    assert_eq!(ctx.ack.outstanding(), 0);
    assert_eq!(
        ctx.queue.connected_call(&search_id).await.unwrap().call_id,
        first
    );
    let summary = ctx.orchestrator.search_summary(&search_id).await.unwrap();
    assert_eq!(summary.result, Some(SearchResult::Found));
    assert_eq!(
        summary.found_at_pharmacy_name.as_deref(),
        Some("CVS Pharmacy #1184")
    );
    assert_eq!(ctx.outcomes.persisted().len(), 1);
    assert!(ctx.sink.event_types().contains(&"search_update".to_string()));
}

#[tokio::test]
async fn joining_a_call_that_is_not_ready_fails() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();
    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();

    let err = ctx
        .orchestrator
        .patient_join(&search_id, &call_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotHumanReady(_)));
}

#[tokio::test]
async fn call_progress_derives_human_readiness() {
    let ctx = build(test_config(), MockDirectory::default());
    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();
    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();

    let progress = ctx.orchestrator.call_progress(&search_id).await.unwrap();
    assert_eq!(progress.len(), 1);
    assert!(!progress[0].is_human_ready);

    ctx.orchestrator
        .handle_bridge_established(&call_id, "bridge-1")
        .await;
    ctx.machine
        .transition(&call_id, CallState::HumanDetected, TransitionOptions::default())
        .await
        .unwrap();

    let progress = ctx.orchestrator.call_progress(&search_id).await.unwrap();
    assert!(progress[0].is_human_ready);

    let missing = ctx.orchestrator.call_progress(&SearchId::new()).await;
    assert!(matches!(missing, Err(EngineError::SearchNotFound(_))));
}

#[tokio::test]
async fn event_pump_queues_human_ready_calls_and_escalates_ended_ones() {
    let ctx = build(test_config(), MockDirectory::default());
    let _pump = ctx.orchestrator.spawn_event_pump();

    let search_id = ctx
        .orchestrator
        .start_search("user-1", "amoxicillin", "Springfield", three_pharmacies())
        .await
        .unwrap();
    let call_id = ctx.machine.calls_for_search(&search_id).await[0]
        .call_id
        .clone();

    ctx.orchestrator
        .handle_bridge_established(&call_id, "bridge-1")
        .await;
    ctx.machine
        .transition(&call_id, CallState::HumanDetected, TransitionOptions::default())
        .await
        .unwrap();

    // Give the pump a moment to react to the broadcast.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let entry = ctx.queue.next_in_queue().await.expect("call should be queued");
    assert_eq!(entry.call_id, call_id);
    assert!(entry.notified_at.is_some());
    assert_eq!(ctx.ack.outstanding(), 1);
}
