//! End-to-end pipeline scenarios over in-memory stores and scripted
//! collaborators: fragment grouping, throttling, human takeover, keyword
//! handoff, webhook redelivery and the pause/send race.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use citabot_agent::command::AgentCommand;
use citabot_agent::context::ContextEntry;
use citabot_agent::decision::{DecisionError, DecisionMaker, MergedTurn, ScriptedDecisionMaker};
use citabot_calendar::NoopCalendarClient;
use citabot_chatwoot::client::NoopChatClient;
use citabot_chatwoot::events::{ConversationStatus, InboundEvent, MessageFragment};
use citabot_core::config::PipelineConfig;
use citabot_core::domain::catalog::{
    AvailabilityBlock, Provider, ProviderId, Service, ServiceId, Weekday,
};
use citabot_core::domain::conversation::ConversationId;
use citabot_db::repositories::{
    InMemoryBookingStore, InMemoryCatalogStore, InMemoryConversationStore, InMemoryKeywordStore,
    InMemoryRateLimitStore, InMemoryStatsStore,
};
use citabot_engine::{
    AvailabilityOracle, BookingEngine, ConversationGate, EventDisposition, Orchestrator,
    RateLimiter,
};

struct Harness {
    orchestrator: Orchestrator,
    chat: Arc<NoopChatClient>,
    gate: Arc<ConversationGate>,
    stats: Arc<InMemoryStatsStore>,
}

fn harness(decision: Arc<dyn DecisionMaker>, rate_capacity: u32) -> Harness {
    let bookings = Arc::new(InMemoryBookingStore::new());
    let conversations = Arc::new(InMemoryConversationStore::new());
    let stats = Arc::new(InMemoryStatsStore::new());
    let chat = Arc::new(NoopChatClient::new());
    let calendar = Arc::new(NoopCalendarClient::new());
    let catalog = Arc::new(catalog_fixture());
    let keywords = Arc::new(InMemoryKeywordStore::new(vec!["agente".to_string()]));

    let gate = Arc::new(ConversationGate::new(conversations.clone(), Duration::from_secs(30)));
    let oracle = Arc::new(AvailabilityOracle::new(
        calendar.clone(),
        bookings.clone(),
        "primary",
        Duration::from_secs(300),
    ));
    let engine = Arc::new(BookingEngine::new(
        bookings.clone(),
        catalog.clone(),
        calendar,
        oracle.clone(),
        stats.clone(),
        "primary",
    ));
    let limiter_config = PipelineConfig {
        rate_limit_max_messages: rate_capacity,
        rate_limit_window_secs: 3600,
        message_group_delay_secs: 3,
        context_max_entries: 20,
    };
    let limiter = RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), &limiter_config);

    let orchestrator = Orchestrator::new(
        citabot_engine::PipelineDeps {
            gate: gate.clone(),
            limiter,
            engine,
            oracle,
            bookings,
            catalog,
            conversations,
            keywords,
            decision,
            chat: chat.clone(),
            stats: stats.clone(),
        },
        Duration::from_secs(3),
        20,
    );

    Harness { orchestrator, chat, gate, stats }
}

fn catalog_fixture() -> InMemoryCatalogStore {
    let ana = ProviderId("prov-ana".to_string());
    InMemoryCatalogStore::new(
        vec![Service {
            id: ServiceId("corte".to_string()),
            name: "Corte de cabello".to_string(),
            description: None,
            price: Decimal::new(15_000, 2),
            duration_minutes: 45,
            eligible_providers: vec![ana.clone()],
            active: true,
        }],
        vec![Provider {
            id: ana,
            name: "Ana Martínez".to_string(),
            phone: None,
            specialties: Vec::new(),
            schedule: vec![AvailabilityBlock {
                weekday: Weekday::Monday,
                start: NaiveTime::from_hms_opt(9, 0, 0).expect("time"),
                end: NaiveTime::from_hms_opt(18, 0, 0).expect("time"),
            }],
            active: true,
        }],
    )
}

fn fragment(conversation: i64, message_id: i64, content: &str) -> InboundEvent {
    InboundEvent::MessageFragment(MessageFragment {
        conversation_id: ConversationId(conversation),
        message_id: Some(message_id),
        client_phone: "5215512345678".to_string(),
        client_name: Some("Mariana".to_string()),
        content: content.to_string(),
        attachment_refs: Vec::new(),
        timestamp: None,
    })
}

/// Records the turns the decision-maker receives, then always replies.
#[derive(Default)]
struct CapturingDecisionMaker {
    turns: Mutex<Vec<MergedTurn>>,
}

#[async_trait]
impl DecisionMaker for CapturingDecisionMaker {
    async fn decide(
        &self,
        turn: &MergedTurn,
        _context: &[ContextEntry],
    ) -> Result<AgentCommand, DecisionError> {
        self.turns.lock().await.push(turn.clone());
        Ok(AgentCommand::Reply { text: "¡Claro! ¿Para qué fecha te gustaría tu cita?".to_string() })
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_fragments_becomes_one_turn_and_one_reply() {
    let decision = Arc::new(CapturingDecisionMaker::default());
    let harness = harness(decision.clone(), 30);
    let now = Utc::now();

    let disposition = harness
        .orchestrator
        .handle_event(fragment(900, 1, "Hola"), now)
        .await
        .expect("first fragment");
    assert_eq!(disposition, EventDisposition::Queued);

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness
        .orchestrator
        .handle_event(fragment(900, 2, "quiero una cita"), now)
        .await
        .expect("second fragment");

    tokio::time::sleep(Duration::from_secs(4)).await;

    let turns = decision.turns.lock().await;
    assert_eq!(turns.len(), 1, "two fragments inside the window make one turn");
    assert_eq!(turns[0].text, "Hola quiero una cita");

    let sent = harness.chat.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, ConversationId(900));
    assert!(sent[0].1.contains("¿Para qué fecha"));
}

#[tokio::test(start_paused = true)]
async fn over_capacity_sender_gets_a_throttle_notice_and_no_decision_call() {
    let decision = Arc::new(CapturingDecisionMaker::default());
    let harness = harness(decision.clone(), 2);
    let now = Utc::now();

    assert_eq!(
        harness.orchestrator.handle_event(fragment(901, 10, "uno"), now).await.expect("one"),
        EventDisposition::Queued
    );
    assert_eq!(
        harness.orchestrator.handle_event(fragment(901, 11, "dos"), now).await.expect("two"),
        EventDisposition::Queued
    );
    assert_eq!(
        harness.orchestrator.handle_event(fragment(901, 12, "tres"), now).await.expect("three"),
        EventDisposition::RateLimited
    );

    // The throttle notice goes out immediately, before any flush.
    let sent = harness.chat.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Has enviado muchos mensajes"));
    assert!(decision.turns.lock().await.is_empty(), "no downstream work for throttled input");
}

#[tokio::test(start_paused = true)]
async fn human_takeover_suppresses_replies_until_resolved() {
    let decision = Arc::new(CapturingDecisionMaker::default());
    let harness = harness(decision.clone(), 30);
    let now = Utc::now();

    harness.orchestrator.handle_event(fragment(902, 20, "Hola"), now).await.expect("contact");
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(harness.chat.sent().await.len(), 1, "bot replies while automated");

    let disposition = harness
        .orchestrator
        .handle_event(
            InboundEvent::HumanAgentReplied {
                conversation_id: ConversationId(902),
                agent_name: Some("Agente Sofía".to_string()),
            },
            now,
        )
        .await
        .expect("human reply");
    assert_eq!(disposition, EventDisposition::HumanPaused);

    harness
        .orchestrator
        .handle_event(fragment(902, 21, "¿me pueden atender?"), now)
        .await
        .expect("paused fragment");
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        harness.chat.sent().await.len(),
        1,
        "turns while paused are recorded but never answered"
    );
    assert!(decision.turns.lock().await.len() <= 1, "paused turn skips the decision-maker");

    let disposition = harness
        .orchestrator
        .handle_event(
            InboundEvent::StatusChanged {
                conversation_id: ConversationId(902),
                status: ConversationStatus::Resolved,
            },
            now,
        )
        .await
        .expect("resolve");
    assert_eq!(disposition, EventDisposition::Resumed);

    harness
        .orchestrator
        .handle_event(fragment(902, 22, "gracias, ¿y mañana?"), now)
        .await
        .expect("fresh fragment");
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(harness.chat.sent().await.len(), 2, "resolution restores automated replies");

    assert_eq!(harness.stats.totals().await.human_handoffs, 1);
}

#[tokio::test(start_paused = true)]
async fn handoff_keyword_pauses_and_notifies() {
    let decision = Arc::new(ScriptedDecisionMaker::with_script(Vec::new()));
    let harness = harness(decision, 30);
    let now = Utc::now();

    harness
        .orchestrator
        .handle_event(fragment(903, 30, "quiero hablar con un agente por favor"), now)
        .await
        .expect("keyword fragment");
    tokio::time::sleep(Duration::from_secs(4)).await;

    let sent = harness.chat.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("agente humano"));
    assert!(!harness.gate.is_active(ConversationId(903)).await.expect("gate"));
    assert_eq!(harness.stats.totals().await.human_handoffs, 1);
}

#[tokio::test(start_paused = true)]
async fn redelivered_webhooks_do_not_duplicate_fragments() {
    let decision = Arc::new(CapturingDecisionMaker::default());
    let harness = harness(decision.clone(), 30);
    let now = Utc::now();

    harness.orchestrator.handle_event(fragment(904, 40, "Hola"), now).await.expect("delivery");
    let disposition = harness
        .orchestrator
        .handle_event(fragment(904, 40, "Hola"), now)
        .await
        .expect("redelivery");
    assert_eq!(disposition, EventDisposition::Duplicate);

    tokio::time::sleep(Duration::from_secs(4)).await;
    let turns = decision.turns.lock().await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].text, "Hola", "content appears once despite redelivery");
}

/// Pauses the conversation while "thinking", simulating a human agent
/// jumping in between the decision and the send.
struct PausingDecisionMaker {
    gate: std::sync::Mutex<Option<Arc<ConversationGate>>>,
}

#[async_trait]
impl DecisionMaker for PausingDecisionMaker {
    async fn decide(
        &self,
        turn: &MergedTurn,
        _context: &[ContextEntry],
    ) -> Result<AgentCommand, DecisionError> {
        let gate = self.gate.lock().expect("gate slot").clone().expect("gate wired");
        gate.pause(
            turn.conversation_id,
            citabot_core::domain::conversation::PauseReason::HumanReply,
            Some("Agente"),
            Utc::now(),
        )
        .await
        .expect("pause");
        Ok(AgentCommand::Reply { text: "respuesta que nadie debe ver".to_string() })
    }
}

#[tokio::test(start_paused = true)]
async fn reply_is_dropped_when_a_human_takes_over_mid_flight() {
    let decision = Arc::new(PausingDecisionMaker { gate: std::sync::Mutex::new(None) });
    let harness = harness(decision.clone(), 30);
    *decision.gate.lock().expect("gate slot") = Some(harness.gate.clone());
    let now = Utc::now();

    harness.orchestrator.handle_event(fragment(905, 50, "Hola"), now).await.expect("fragment");
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert!(harness.chat.sent().await.is_empty(), "send-time gate re-check dropped the reply");
    assert!(!harness.gate.is_active(ConversationId(905)).await.expect("gate"));
}
