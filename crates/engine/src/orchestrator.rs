use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use citabot_agent::command::AgentCommand;
use citabot_agent::context::{ContextBuffer, ContextEntry, Speaker};
use citabot_agent::decision::{DecisionError, DecisionMaker, MergedTurn};
use citabot_agent::replies;
use citabot_chatwoot::client::ChatClient;
use citabot_chatwoot::dedupe::DedupeCache;
use citabot_chatwoot::events::{ConversationStatus, InboundEvent, MessageFragment};
use citabot_core::domain::conversation::{ConversationId, PauseReason};
use citabot_core::errors::PipelineError;
use citabot_core::interval::TimeSlot;
use citabot_db::repositories::{
    BookingStore, CatalogStore, ConversationStore, KeywordStore, StatsDelta, StatsStore,
};

use crate::aggregator::{FlushSink, MessageAggregator, PendingFlush};
use crate::availability::AvailabilityOracle;
use crate::booking::{BookingChanges, BookingEngine, CreateBookingRequest};
use crate::gate::ConversationGate;
use crate::rate_limiter::RateLimiter;

/// What happened to an inbound event; returned for logging and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventDisposition {
    Queued,
    Duplicate,
    RateLimited,
    HumanPaused,
    ConversationCreated,
    Resumed,
    Ignored,
}

/// Everything the pipeline composes over; wired once at bootstrap.
pub struct PipelineDeps {
    pub gate: Arc<ConversationGate>,
    pub limiter: RateLimiter,
    pub engine: Arc<BookingEngine>,
    pub oracle: Arc<AvailabilityOracle>,
    pub bookings: Arc<dyn BookingStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub keywords: Arc<dyn KeywordStore>,
    pub decision: Arc<dyn DecisionMaker>,
    pub chat: Arc<dyn ChatClient>,
    pub stats: Arc<dyn StatsStore>,
}

/// Sequences the pipeline per inbound event: dedupe → rate limit → gate →
/// aggregate; and per flushed turn: record → keyword scan → decide →
/// execute → gate re-check → send.
pub struct Orchestrator {
    core: Arc<PipelineCore>,
    aggregator: MessageAggregator,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, group_delay: Duration, context_max_entries: usize) -> Self {
        let core = Arc::new(PipelineCore {
            gate: deps.gate,
            limiter: deps.limiter,
            engine: deps.engine,
            oracle: deps.oracle,
            bookings: deps.bookings,
            catalog: deps.catalog,
            conversations: deps.conversations,
            keywords: deps.keywords,
            decision: deps.decision,
            chat: deps.chat,
            stats: deps.stats,
            dedupe: DedupeCache::default(),
            contexts: Mutex::new(HashMap::new()),
            context_max_entries,
        });
        let sink: Arc<dyn FlushSink> = core.clone();
        let aggregator = MessageAggregator::new(group_delay, sink);
        Self { core, aggregator }
    }

    pub async fn handle_event(
        &self,
        event: InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<EventDisposition, PipelineError> {
        match event {
            InboundEvent::MessageFragment(fragment) => self.handle_fragment(fragment, now).await,
            InboundEvent::HumanAgentReplied { conversation_id, agent_name } => {
                self.core
                    .gate
                    .pause(conversation_id, PauseReason::HumanReply, agent_name.as_deref(), now)
                    .await?;
                self.core.clear_context(conversation_id).await;
                self.core
                    .record_stats(now, StatsDelta { human_handoffs: 1, ..StatsDelta::default() })
                    .await;
                Ok(EventDisposition::HumanPaused)
            }
            InboundEvent::ConversationCreated { conversation_id, client_phone, client_name } => {
                self.core
                    .upsert_conversation(conversation_id, &client_phone, client_name.as_deref(), now)
                    .await?;
                Ok(EventDisposition::ConversationCreated)
            }
            InboundEvent::StatusChanged { conversation_id, status } => {
                if status == ConversationStatus::Resolved {
                    self.core.gate.resume(conversation_id, now).await?;
                    self.core.clear_context(conversation_id).await;
                    Ok(EventDisposition::Resumed)
                } else {
                    Ok(EventDisposition::Ignored)
                }
            }
            InboundEvent::Ignored { reason } => {
                debug!(?reason, "webhook event ignored");
                Ok(EventDisposition::Ignored)
            }
        }
    }

    async fn handle_fragment(
        &self,
        fragment: MessageFragment,
        now: DateTime<Utc>,
    ) -> Result<EventDisposition, PipelineError> {
        // At-least-once delivery: drop redelivered webhooks before they can
        // re-enter the aggregator.
        let dedupe_key =
            fragment.message_id.or_else(|| fragment.timestamp.map(|ts| ts.timestamp()));
        if let Some(key) = dedupe_key {
            if !self.core.dedupe.first_seen(fragment.conversation_id, key) {
                debug!(
                    conversation_id = fragment.conversation_id.0,
                    message_key = key,
                    "duplicate webhook delivery dropped"
                );
                return Ok(EventDisposition::Duplicate);
            }
        }

        self.core
            .upsert_conversation(
                fragment.conversation_id,
                &fragment.client_phone,
                fragment.client_name.as_deref(),
                now,
            )
            .await?;
        self.core
            .record_stats(now, StatsDelta { messages_received: 1, ..StatsDelta::default() })
            .await;

        // Throttled senders consume nothing downstream: no aggregation, no
        // decision call, no calendar traffic.
        let decision = self.core.limiter.check(&fragment.client_phone, now).await?;
        if !decision.allowed {
            warn!(
                conversation_id = fragment.conversation_id.0,
                reset_at = %decision.reset_at,
                "sender rate limited"
            );
            let notice = PipelineError::RateLimitExceeded { reset_at: decision.reset_at };
            self.core.send_if_active(fragment.conversation_id, &notice.user_message()).await;
            return Ok(EventDisposition::RateLimited);
        }

        // Paused conversations still aggregate: the merged turn is recorded
        // for the human agent's context, it just never reaches the
        // decision-maker.
        self.aggregator.enqueue(&fragment, now);
        Ok(EventDisposition::Queued)
    }

    pub fn pending_conversations(&self) -> usize {
        self.aggregator.pending_conversations()
    }
}

struct PipelineCore {
    gate: Arc<ConversationGate>,
    limiter: RateLimiter,
    engine: Arc<BookingEngine>,
    oracle: Arc<AvailabilityOracle>,
    bookings: Arc<dyn BookingStore>,
    catalog: Arc<dyn CatalogStore>,
    conversations: Arc<dyn ConversationStore>,
    keywords: Arc<dyn KeywordStore>,
    decision: Arc<dyn DecisionMaker>,
    chat: Arc<dyn ChatClient>,
    stats: Arc<dyn StatsStore>,
    dedupe: DedupeCache,
    contexts: Mutex<HashMap<i64, ContextBuffer>>,
    context_max_entries: usize,
}

#[async_trait]
impl FlushSink for PipelineCore {
    async fn flush(&self, turn: PendingFlush) {
        self.handle_flush(turn).await;
    }
}

impl PipelineCore {
    async fn handle_flush(&self, turn: PendingFlush) {
        let started = Instant::now();
        let now = Utc::now();
        let id = turn.conversation_id;

        let state = match self.gate.state(id).await {
            Ok(state) => state,
            Err(gate_error) => {
                error!(conversation_id = id.0, error = %gate_error, "gate lookup failed at flush");
                return;
            }
        };

        if !state.is_active() {
            // The flush still happened, so the message record survives for
            // whoever is handling the thread; no automated reply.
            self.push_context(id, Speaker::Client, &turn.text).await;
            info!(
                conversation_id = id.0,
                fragments = turn.fragment_count,
                "turn recorded while paused; automated reply suppressed"
            );
            return;
        }

        if self.keyword_handoff(id, &turn).await {
            return;
        }

        let context = self.context_entries(id).await;
        self.push_context(id, Speaker::Client, &turn.text).await;

        let merged = MergedTurn {
            conversation_id: id,
            client_phone: turn.client_phone.clone(),
            client_name: turn.client_name.clone(),
            text: turn.text.clone(),
        };

        let reply = match self.decision.decide(&merged, &context).await {
            Ok(command) => match self.execute_with_retry(command, &merged, now).await {
                Ok(reply) => reply,
                Err(pipeline_error) => {
                    self.note_failure(id, &pipeline_error, now).await;
                    pipeline_error.user_message()
                }
            },
            Err(DecisionError::Service(message)) => {
                let failure = PipelineError::external("decision", message, true);
                self.note_failure(id, &failure, now).await;
                failure.user_message()
            }
            Err(DecisionError::Malformed(message)) => {
                warn!(conversation_id = id.0, detail = %message, "decision output malformed");
                PipelineError::Validation(
                    "No pude entender tu solicitud. ¿Podrías decirlo de otra forma?".to_string(),
                )
                .user_message()
            }
        };

        self.push_context(id, Speaker::Assistant, &reply).await;
        self.record_stats(
            now,
            StatsDelta {
                messages_responded: 1,
                response_time_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
                ..StatsDelta::default()
            },
        )
        .await;

        // A human may have taken over between the flush and this point;
        // re-check right before the send and drop silently if so.
        match self.gate.is_active(id).await {
            Ok(true) => {
                if let Err(send_error) = self.chat.send_reply(id, &reply).await {
                    error!(conversation_id = id.0, error = %send_error, "reply delivery failed");
                    self.record_stats(now, StatsDelta { errors: 1, ..StatsDelta::default() })
                        .await;
                }
            }
            Ok(false) => {
                info!(
                    conversation_id = id.0,
                    "conversation paused mid-flight; automated reply dropped"
                );
            }
            Err(gate_error) => {
                // Can't verify who holds the conversation: drop the reply
                // rather than talk over a human agent.
                error!(
                    conversation_id = id.0,
                    error = %gate_error,
                    "gate re-check failed; reply dropped"
                );
            }
        }
    }

    /// Scan the merged turn for handoff keywords. On a match the
    /// conversation pauses and the client is told a human will take over.
    async fn keyword_handoff(&self, id: ConversationId, turn: &PendingFlush) -> bool {
        let keywords = match self.keywords.active_keywords().await {
            Ok(keywords) => keywords,
            Err(keyword_error) => {
                warn!(
                    conversation_id = id.0,
                    error = %keyword_error,
                    "keyword lookup failed; continuing without handoff scan"
                );
                return false;
            }
        };

        let lowered = turn.text.to_lowercase();
        let Some(matched) = keywords.iter().find(|keyword| lowered.contains(keyword.as_str()))
        else {
            return false;
        };

        info!(conversation_id = id.0, keyword = %matched, "handoff keyword matched");
        let now = Utc::now();

        self.push_context(id, Speaker::Client, &turn.text).await;
        if let Err(pause_error) =
            self.gate.pause(id, PauseReason::KeywordMatch, None, now).await
        {
            error!(conversation_id = id.0, error = %pause_error, "keyword pause failed");
            return false;
        }

        self.record_stats(now, StatsDelta { human_handoffs: 1, ..StatsDelta::default() }).await;
        if let Err(send_error) = self.chat.send_reply(id, &replies::handoff_notice()).await {
            error!(conversation_id = id.0, error = %send_error, "handoff notice delivery failed");
        }
        true
    }

    async fn execute_with_retry(
        &self,
        command: AgentCommand,
        turn: &MergedTurn,
        now: DateTime<Utc>,
    ) -> Result<String, PipelineError> {
        match self.execute_command(command.clone(), turn, now).await {
            Err(PipelineError::Persistence(first_failure)) => {
                warn!(
                    conversation_id = turn.conversation_id.0,
                    error = %first_failure,
                    "persistence failure; retrying command once"
                );
                self.execute_command(command, turn, now).await
            }
            other => other,
        }
    }

    async fn execute_command(
        &self,
        command: AgentCommand,
        turn: &MergedTurn,
        now: DateTime<Utc>,
    ) -> Result<String, PipelineError> {
        match command {
            AgentCommand::ListServices => {
                let services = self
                    .catalog
                    .list_services()
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;
                Ok(replies::services_list(&services))
            }
            AgentCommand::ListProviders => {
                let providers = self
                    .catalog
                    .list_providers()
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;
                Ok(replies::providers_list(&providers))
            }
            AgentCommand::CheckAvailability(args) => {
                let duration = args.duration_minutes.unwrap_or(60);
                let provider = match args.provider_name.as_deref() {
                    Some(name) => self
                        .catalog
                        .find_provider_by_name(name)
                        .await
                        .map_err(|e| PipelineError::Persistence(e.to_string()))?
                        .ok_or_else(|| {
                            PipelineError::Validation(replies::unknown_provider(name))
                        })?,
                    None => self
                        .catalog
                        .list_providers()
                        .await
                        .map_err(|e| PipelineError::Persistence(e.to_string()))?
                        .into_iter()
                        .next()
                        .ok_or_else(|| {
                            PipelineError::Validation(
                                "No hay estilistas disponibles en este momento.".to_string(),
                            )
                        })?,
                };

                let start = args.date.and_time(args.time).and_utc();
                if start < now {
                    return Err(PipelineError::Validation(
                        "No puedo verificar disponibilidad para fechas pasadas.".to_string(),
                    ));
                }
                let slot =
                    TimeSlot::new(start, start + chrono::Duration::minutes(i64::from(duration)))?;

                let date_text = args.date.format("%Y-%m-%d").to_string();
                let time_text = args.time.format("%H:%M").to_string();

                let availability = self.oracle.query(&provider.id, &slot).await?;
                if availability.free {
                    Ok(replies::availability_free(&date_text, &time_text, duration))
                } else {
                    let alternatives = self
                        .oracle
                        .free_slots(&provider, args.date, duration, now)
                        .await?
                        .iter()
                        .map(|slot| slot.start.time())
                        .collect::<Vec<_>>();
                    Ok(replies::availability_busy(&date_text, &time_text, &alternatives))
                }
            }
            AgentCommand::CreateBooking(args) => {
                let request = CreateBookingRequest {
                    client_phone: turn.client_phone.clone(),
                    client_name: args.client_name,
                    service_names: args.services,
                    provider_name: args.provider_name,
                    start: args.date.and_time(args.time).and_utc(),
                    notes: args.notes,
                };
                let outcome = self.engine.create(&request, now).await?;
                Ok(replies::booking_confirmed(
                    &outcome.booking,
                    &outcome.service_names,
                    &outcome.provider_name,
                ))
            }
            AgentCommand::UpdateBooking(args) => {
                let changes = BookingChanges {
                    new_date: args.new_date,
                    new_time: args.new_time,
                    new_service_names: args.new_services,
                    new_provider_name: args.new_provider_name,
                };
                let outcome =
                    self.engine.update_next_for_phone(&turn.client_phone, &changes, now).await?;
                Ok(replies::booking_updated(&outcome.booking, &outcome.changes))
            }
            AgentCommand::CancelBooking(args) => {
                let outcome = self
                    .engine
                    .cancel_next_for_phone(&turn.client_phone, args.reason.as_deref(), now)
                    .await?;
                Ok(replies::booking_cancelled(&outcome.booking, &outcome.service_names))
            }
            AgentCommand::GetAppointments => {
                let upcoming = self
                    .bookings
                    .upcoming_for_phone(&turn.client_phone, now)
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;
                let past = self
                    .bookings
                    .past_for_phone(&turn.client_phone, now, 3)
                    .await
                    .map_err(|e| PipelineError::Persistence(e.to_string()))?;
                Ok(replies::appointments_summary(&upcoming, &past))
            }
            AgentCommand::Reply { text } => Ok(text),
        }
    }

    async fn upsert_conversation(
        &self,
        id: ConversationId,
        client_phone: &str,
        client_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        // One retry on persistence failure, then escalate.
        let first = self.conversations.upsert_on_contact(id, client_phone, client_name, now).await;
        if let Err(first_failure) = first {
            warn!(
                conversation_id = id.0,
                error = %first_failure,
                "conversation upsert failed; retrying once"
            );
            self.conversations
                .upsert_on_contact(id, client_phone, client_name, now)
                .await
                .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    async fn note_failure(&self, id: ConversationId, failure: &PipelineError, now: DateTime<Utc>) {
        error!(conversation_id = id.0, error = %failure, "pipeline command failed");
        if matches!(
            failure,
            PipelineError::ExternalService { .. } | PipelineError::Persistence(_)
        ) {
            self.record_stats(now, StatsDelta { errors: 1, ..StatsDelta::default() }).await;
        }
    }

    async fn send_if_active(&self, id: ConversationId, text: &str) {
        match self.gate.is_active(id).await {
            Ok(true) => {
                if let Err(send_error) = self.chat.send_reply(id, text).await {
                    error!(conversation_id = id.0, error = %send_error, "notice delivery failed");
                }
            }
            Ok(false) => {}
            Err(gate_error) => {
                error!(conversation_id = id.0, error = %gate_error, "gate lookup failed");
            }
        }
    }

    async fn push_context(&self, id: ConversationId, speaker: Speaker, text: &str) {
        let mut contexts = self.contexts.lock().await;
        contexts
            .entry(id.0)
            .or_insert_with(|| ContextBuffer::new(self.context_max_entries))
            .push(speaker, text);
    }

    async fn context_entries(&self, id: ConversationId) -> Vec<ContextEntry> {
        let contexts = self.contexts.lock().await;
        contexts.get(&id.0).map(ContextBuffer::entries).unwrap_or_default()
    }

    async fn clear_context(&self, id: ConversationId) {
        let mut contexts = self.contexts.lock().await;
        contexts.remove(&id.0);
    }

    async fn record_stats(&self, now: DateTime<Utc>, delta: StatsDelta) {
        if let Err(stats_error) = self.stats.record(now.date_naive(), delta).await {
            warn!(error = %stats_error, "failed to record pipeline stats");
        }
    }
}
