//! Conversation context and orchestrator.
//!
//! One shared multi-turn conversation with the remote model for the whole
//! process, not one per user or per session. That is a deliberate
//! simplification carried over from the product's design; every caller
//! talks to the same assistant.
//!
//! The context is guarded by a single async mutex covering read-history,
//! the remote call, and the append of both new turns, so concurrent
//! requests serialize and an exchange is atomic: either both turns land
//! in history or neither does. `reset` takes the same mutex before
//! swapping the context out.

use plena_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::provider::{
    default_safety_settings, GenerationConfig, Provider, SafetySetting, Turn,
};

/// Fixed system preamble: persona, behaviour guidelines, interview flow,
/// internal report template, and an example of the expected output.
pub const PREAMBLE: &str = "\
Você é Vida Plena, uma inteligência artificial especializada em bem-estar físico e emocional.
Seu papel é ajudar o usuário a montar rotinas de autocuidado, planos de atividades físicas, hábitos alimentares saudáveis e oferecer apoio emocional leve e motivador.

**DIRETRIZES DE COMPORTAMENTO**

- Mantenha sempre um tom acolhedor, divertido e empático.
- Evite responder ou se aprofundar em assuntos fora do tema de bem-estar geral, mas não diga explicitamente que não pode falar sobre isso.
  - Em vez disso, reconduza naturalmente a conversa para temas relacionados à saúde, equilíbrio, motivação, hábitos ou autocuidado.
  - Exemplo: se o usuário falar de trabalho, responda algo como:
    \"Entendo! Às vezes o trabalho pode ser bem puxado… quer que eu te ajude a equilibrar isso com uma rotina de descanso ou alimentação melhor?\"
- Nunca seja ríspida, fria ou negativa. Sempre demonstre interesse genuíno pelo bem-estar do usuário.
- Utilize linguagem simples, empática e otimista. Suas respostas devem também ser formatadas para melhor visualização do usuário.

**FLUXO DE CONVERSA**

- Faça de 5 a 8 perguntas para coletar informações necessárias antes de gerar um relatório ou plano personalizado.
- Adapte a quantidade e o estilo das perguntas conforme o comportamento do usuário (mais diretas se ele for objetivo; mais acolhedoras se estiver desanimado ou inseguro).
- As perguntas podem abranger:
  - objetivos físicos (ex: ganho de massa, emagrecimento, disposição);
  - alimentação;
  - rotina diária;
  - humor/emocional;
  - tempo disponível e preferências de atividades.

**ESTRUTURA DE RELATÓRIO (INTERNA)**

Use este modelo para armazenar as informações coletadas e gerar o resultado final.
Não exiba esse formato ao usuário — ele serve apenas como base interna.

Exemplo de estrutura:
peso: 70
peso_desejado: 65
objetivo: melhorar disposição e saúde mental
rotina_disponível: manhã e noite
alimentação_atual: rica em carboidratos e poucos vegetais
nível_de_energia: médio
estado_emocional: um pouco ansioso

Essas variáveis devem ser usadas para gerar o relatório final ou recomendações, com linguagem natural, como se fosse uma conversa real de acompanhamento.

**EXEMPLO DE SAÍDA PARA O USUÁRIO**

Que legal, já entendi bem o seu perfil 💚
Montando um plano leve pra você começar:
- **Atividade física**: 20 min de caminhada leve 3x por semana, depois vamos aumentando.
- **Alimentação**: incluir mais frutas no café da manhã e reduzir refrigerantes.
- **Emocional**: reserve 10 min diários pra algo que te acalme — pode ser música ou respiração guiada.

Como se sente com esse começo?
";

/// The single process-wide conversation service.
///
/// `None` history means `Uninitialized`: chat requests fail with
/// `ChatNotReady` until an `initialize` succeeds.
pub struct ChatService {
    provider: Arc<dyn Provider>,
    config: GenerationConfig,
    safety: Vec<SafetySetting>,
    history: Mutex<Option<Vec<Turn>>>,
}

impl ChatService {
    /// Create the service in the `Uninitialized` state.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            config: GenerationConfig::default(),
            safety: default_safety_settings(),
            history: Mutex::new(None),
        }
    }

    /// Seed a fresh context with exactly one system preamble turn.
    ///
    /// On failure the context stays (or becomes) uninitialized.
    pub async fn initialize(&self) -> Result<()> {
        let mut history = self.history.lock().await;
        *history = None;

        self.provider
            .ensure_ready()
            .map_err(|e| Error::ChatNotReady(e.to_string()))?;

        *history = Some(vec![Turn::system(PREAMBLE)]);
        tracing::info!(provider = %self.provider.name(), "Chat context initialized");
        Ok(())
    }

    /// Discard the context outright and reseed it. Nothing from the prior
    /// conversation survives.
    pub async fn reset(&self) -> Result<()> {
        self.initialize().await
    }

    /// Forward a user message and return the assistant's reply.
    ///
    /// The context mutex is held across the remote call: history must not
    /// be read or reset while a call is outstanding. No lock on the
    /// durable store is ever held here.
    pub async fn send_message(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("mensagem vazia".into()));
        }

        let mut guard = self.history.lock().await;
        let Some(history) = guard.as_mut() else {
            return Err(Error::ChatNotReady(
                "chat não inicializado, tente novamente mais tarde".into(),
            ));
        };

        let user_turn = Turn::user(text);
        let mut request_turns = history.clone();
        request_turns.push(user_turn.clone());

        let reply = self
            .provider
            .generate(&request_turns, &self.config, &self.safety)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Model call failed, history unchanged");
                Error::Model(e.to_string())
            })?;

        // The exchange is atomic: both turns are appended only now.
        history.push(user_turn);
        history.push(Turn::assistant(reply.clone()));
        tracing::debug!(turns = history.len(), "Exchange recorded");

        Ok(reply)
    }

    /// Number of turns in the current context, or `None` if uninitialized.
    pub async fn turn_count(&self) -> Option<usize> {
        self.history.lock().await.as_ref().map(Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scripted provider: echoes the last user turn, optionally failing.
    struct MockProvider {
        fail_ready: AtomicBool,
        fail_generate: AtomicBool,
    }

    impl MockProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail_ready: AtomicBool::new(false),
                fail_generate: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn ensure_ready(&self) -> std::result::Result<(), ProviderError> {
            if self.fail_ready.load(Ordering::SeqCst) {
                return Err(ProviderError {
                    provider: "mock".into(),
                    message: "not ready".into(),
                    status_code: None,
                });
            }
            Ok(())
        }

        async fn generate(
            &self,
            turns: &[Turn],
            _config: &GenerationConfig,
            _safety: &[SafetySetting],
        ) -> std::result::Result<String, ProviderError> {
            if self.fail_generate.load(Ordering::SeqCst) {
                return Err(ProviderError {
                    provider: "mock".into(),
                    message: "quota exceeded".into(),
                    status_code: Some(429),
                });
            }
            // Yield so concurrent callers would interleave without the
            // context mutex.
            tokio::task::yield_now().await;
            let last_user = turns
                .iter()
                .rev()
                .find(|t| t.role == Role::User)
                .map(|t| t.text.clone())
                .unwrap_or_default();
            Ok(format!("re:{last_user}"))
        }
    }

    #[tokio::test]
    async fn test_uninitialized_rejects_messages() {
        let chat = ChatService::new(MockProvider::new());
        let err = chat.send_message("oi").await.unwrap_err();
        assert!(matches!(err, Error::ChatNotReady(_)));
        assert!(chat.turn_count().await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_seeds_one_system_turn() {
        let chat = ChatService::new(MockProvider::new());
        chat.initialize().await.unwrap();
        assert_eq!(chat.turn_count().await, Some(1));

        let guard = chat.history.lock().await;
        let history = guard.as_ref().unwrap();
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].text, PREAMBLE);
    }

    #[tokio::test]
    async fn test_initialize_failure_leaves_uninitialized() {
        let provider = MockProvider::new();
        provider.fail_ready.store(true, Ordering::SeqCst);
        let chat = ChatService::new(provider.clone());

        assert!(matches!(
            chat.initialize().await.unwrap_err(),
            Error::ChatNotReady(_)
        ));
        assert!(chat.turn_count().await.is_none());

        // A later initialize can still succeed.
        provider.fail_ready.store(false, Ordering::SeqCst);
        chat.initialize().await.unwrap();
        assert_eq!(chat.turn_count().await, Some(1));
    }

    #[tokio::test]
    async fn test_empty_message_never_mutates_history() {
        let chat = ChatService::new(MockProvider::new());
        chat.initialize().await.unwrap();

        for text in ["", "   ", "\n\t"] {
            let err = chat.send_message(text).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }
        assert_eq!(chat.turn_count().await, Some(1));
    }

    #[tokio::test]
    async fn test_sequential_exchanges_append_in_order() {
        let chat = ChatService::new(MockProvider::new());
        chat.initialize().await.unwrap();

        let first = chat.send_message("Quero melhorar o sono").await.unwrap();
        assert_eq!(first, "re:Quero melhorar o sono");
        assert_eq!(chat.turn_count().await, Some(3));

        let second = chat.send_message("durmo tarde").await.unwrap();
        assert_eq!(second, "re:durmo tarde");
        assert_eq!(chat.turn_count().await, Some(5));

        let guard = chat.history.lock().await;
        let history = guard.as_ref().unwrap();
        let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant
            ]
        );
        assert_eq!(history[1].text, "Quero melhorar o sono");
        assert_eq!(history[3].text, "durmo tarde");
    }

    #[tokio::test]
    async fn test_model_error_leaves_history_unmodified() {
        let provider = MockProvider::new();
        let chat = ChatService::new(provider.clone());
        chat.initialize().await.unwrap();
        chat.send_message("primeira").await.unwrap();

        provider.fail_generate.store(true, Ordering::SeqCst);
        let err = chat.send_message("segunda").await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        // No partial append: still preamble + one exchange.
        assert_eq!(chat.turn_count().await, Some(3));

        // Retry by resubmission works once the model recovers.
        provider.fail_generate.store(false, Ordering::SeqCst);
        chat.send_message("segunda").await.unwrap();
        assert_eq!(chat.turn_count().await, Some(5));
    }

    #[tokio::test]
    async fn test_reset_drops_all_prior_turns() {
        let chat = ChatService::new(MockProvider::new());
        chat.initialize().await.unwrap();
        chat.send_message("Quero melhorar o sono").await.unwrap();
        assert_eq!(chat.turn_count().await, Some(3));

        chat.reset().await.unwrap();
        assert_eq!(chat.turn_count().await, Some(1));

        // The next exchange succeeds independently of the prior one.
        let reply = chat.send_message("oi").await.unwrap();
        assert_eq!(reply, "re:oi");
        assert_eq!(chat.turn_count().await, Some(3));
    }

    #[tokio::test]
    async fn test_concurrent_sends_keep_pairs_contiguous() {
        let chat = Arc::new(ChatService::new(MockProvider::new()));
        chat.initialize().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let chat = chat.clone();
            handles.push(tokio::spawn(async move {
                chat.send_message(&format!("mensagem-{i}")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let guard = chat.history.lock().await;
        let history = guard.as_ref().unwrap();
        assert_eq!(history.len(), 1 + 8 * 2);

        // Each user turn is immediately followed by the reply to it.
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].text, format!("re:{}", pair[0].text));
        }
    }
}
