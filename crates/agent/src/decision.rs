use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use citabot_core::domain::conversation::ConversationId;

use crate::command::AgentCommand;
use crate::context::{ContextEntry, Speaker};

/// One merged turn of client input, as produced by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedTurn {
    pub conversation_id: ConversationId,
    pub client_phone: String,
    pub client_name: Option<String>,
    pub text: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// The decision service itself failed (timeout, transport, provider
    /// outage). Retried by the caller's policy.
    #[error("decision service failure: {0}")]
    Service(String),
    /// The service answered, but not with a valid command. Surfaced as a
    /// validation problem, never retried blindly.
    #[error("decision output was not a valid command: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(
        &self,
        turn: &MergedTurn,
        context: &[ContextEntry],
    ) -> Result<AgentCommand, DecisionError>;
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Decision-maker backed by an [`LlmClient`]. Prompts for strict JSON,
/// parses into the closed command set, retries transport failures with a
/// short backoff.
pub struct LlmDecisionMaker<C> {
    client: C,
    max_retries: u32,
}

impl<C> LlmDecisionMaker<C>
where
    C: LlmClient,
{
    pub fn new(client: C, max_retries: u32) -> Self {
        Self { client, max_retries }
    }

    fn build_prompt(&self, turn: &MergedTurn, context: &[ContextEntry]) -> String {
        let mut prompt = String::from(SYSTEM_PROMPT);

        if !context.is_empty() {
            prompt.push_str("\n\nConversación previa:\n");
            for entry in context {
                let speaker = match entry.speaker {
                    Speaker::Client => "Cliente",
                    Speaker::Assistant => "Asistente",
                };
                prompt.push_str(&format!("{speaker}: {}\n", entry.text));
            }
        }

        if let Some(name) = &turn.client_name {
            prompt.push_str(&format!("\nNombre del cliente: {name}\n"));
        }
        prompt.push_str(&format!("\nMensaje del cliente:\n{}\n\nJSON:", turn.text));
        prompt
    }
}

const SYSTEM_PROMPT: &str = "Eres el asistente de citas de un salón de belleza. \
Analiza el mensaje del cliente y responde ÚNICAMENTE con un objeto JSON de la forma \
{\"command\": \"...\", \"args\": {...}}. Comandos disponibles: \
list_services, list_providers, \
check_availability {date: YYYY-MM-DD, time: HH:MM, duration_minutes?, provider_name?}, \
create_booking {client_name, services: [..], date, time, provider_name?, notes?}, \
update_booking {new_date?, new_time?, new_services?, new_provider_name?}, \
cancel_booking {reason?}, get_appointments, reply {text}. \
Si falta información para agendar, usa reply para pedirla. \
Nunca inventes precios ni horarios.";

#[async_trait]
impl<C> DecisionMaker for LlmDecisionMaker<C>
where
    C: LlmClient,
{
    async fn decide(
        &self,
        turn: &MergedTurn,
        context: &[ContextEntry],
    ) -> Result<AgentCommand, DecisionError> {
        let prompt = self.build_prompt(turn, context);

        let mut attempt = 0u32;
        let raw = loop {
            match self.client.complete(&prompt).await {
                Ok(raw) => break raw,
                Err(error) if attempt < self.max_retries => {
                    warn!(
                        conversation_id = turn.conversation_id.0,
                        attempt,
                        error = %error,
                        "decision call failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(250 << attempt.min(4))).await;
                    attempt += 1;
                }
                Err(error) => return Err(DecisionError::Service(error.to_string())),
            }
        };

        let json = extract_json_object(&raw)
            .ok_or_else(|| DecisionError::Malformed("no JSON object in response".to_string()))?;
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|error| DecisionError::Malformed(error.to_string()))?;

        AgentCommand::parse(&value).map_err(|error| DecisionError::Malformed(error.to_string()))
    }
}

/// Models wrap JSON in prose and code fences; take the outermost braces.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Test double that replays a script of decisions, in the order enqueued.
pub struct ScriptedDecisionMaker {
    script: Mutex<VecDeque<Result<AgentCommand, DecisionError>>>,
}

impl ScriptedDecisionMaker {
    pub fn with_script(script: Vec<Result<AgentCommand, DecisionError>>) -> Self {
        Self { script: Mutex::new(script.into()) }
    }

    pub fn always_reply(text: impl Into<String>) -> Self {
        Self::with_script(vec![Ok(AgentCommand::Reply { text: text.into() })])
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecisionMaker {
    async fn decide(
        &self,
        _turn: &MergedTurn,
        _context: &[ContextEntry],
    ) -> Result<AgentCommand, DecisionError> {
        let mut script = self.script.lock().await;
        match script.pop_front() {
            Some(decision) => decision,
            // An exhausted script keeps answering with a harmless reply so
            // long tests do not have to count turns exactly.
            None => Ok(AgentCommand::Reply { text: "¿Algo más en lo que pueda ayudarte?".to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use citabot_core::domain::conversation::ConversationId;

    use super::{
        extract_json_object, DecisionError, DecisionMaker, LlmClient, LlmDecisionMaker, MergedTurn,
    };
    use crate::command::AgentCommand;

    struct CannedLlm {
        responses: Vec<Result<String>>,
        calls: AtomicU32,
    }

    impl CannedLlm {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self { responses, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.responses.get(index) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(error)) => Err(anyhow!(error.to_string())),
                None => Err(anyhow!("script exhausted")),
            }
        }
    }

    fn turn() -> MergedTurn {
        MergedTurn {
            conversation_id: ConversationId(1),
            client_phone: "5215512345678".to_string(),
            client_name: None,
            text: "¿qué servicios tienen?".to_string(),
        }
    }

    #[tokio::test]
    async fn parses_a_fenced_json_answer() {
        let llm = CannedLlm::new(vec![Ok(
            "Claro, aquí está:\n```json\n{\"command\": \"list_services\"}\n```".to_string()
        )]);
        let maker = LlmDecisionMaker::new(llm, 1);

        let command = maker.decide(&turn(), &[]).await.expect("decide");
        assert_eq!(command, AgentCommand::ListServices);
    }

    #[tokio::test]
    async fn retries_transport_failures_then_succeeds() {
        let llm = CannedLlm::new(vec![
            Err(anyhow!("connection reset")),
            Ok("{\"command\": \"get_appointments\"}".to_string()),
        ]);
        let maker = LlmDecisionMaker::new(llm, 2);

        let command = maker.decide(&turn(), &[]).await.expect("decide");
        assert_eq!(command, AgentCommand::GetAppointments);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_a_service_error() {
        let llm = CannedLlm::new(vec![Err(anyhow!("down")), Err(anyhow!("down")),
            Err(anyhow!("down"))]);
        let maker = LlmDecisionMaker::new(llm, 2);

        let error = maker.decide(&turn(), &[]).await.expect_err("must fail");
        assert!(matches!(error, DecisionError::Service(_)));
    }

    #[tokio::test]
    async fn non_json_answers_are_malformed_not_fatal() {
        let llm = CannedLlm::new(vec![Ok("lo siento, no entendí".to_string())]);
        let maker = LlmDecisionMaker::new(llm, 0);

        let error = maker.decide(&turn(), &[]).await.expect_err("must fail");
        assert!(matches!(error, DecisionError::Malformed(_)));
    }

    #[test]
    fn json_extraction_handles_prose_wrapping() {
        assert_eq!(extract_json_object("x {\"a\": 1} y"), Some("{\"a\": 1}"));
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("}{"), None);
    }
}
