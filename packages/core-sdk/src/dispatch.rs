use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::errors::DispatchError;
use crate::executor::CodeRunner;
use crate::extract::{extract_code_blocks, extract_json_blocks};
use crate::llm::ChatBackend;
use crate::models::{Endpoint, Message, DEFAULT_EXEC_TIMEOUT_SECS};
use crate::telemetry;

/**
 * \brief How one round reaches its endpoints.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /** \brief All requests in flight together; replies kept in endpoint-list order. */
    Parallel,
    /**
     * \brief One endpoint after another, each seeing what the earlier ones said.
     * \param pause Delay between two consecutive endpoints.
     */
    Relay { pause: Duration },
}

impl Strategy {
    pub fn relay() -> Self {
        Strategy::Relay {
            pause: Duration::from_secs(1),
        }
    }
}

/**
 * \brief Running notes shared between endpoints in relay mode, kept for a whole submission.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayContext {
    text: String,
}

impl RelayContext {
    pub fn as_option(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }

    /**
     * \brief Fold one reply in: its structured ```json data first, then the text itself.
     */
    pub fn record(&mut self, endpoint_name: &str, reply: &str) {
        let blocks = extract_json_blocks(reply);
        if !blocks.is_empty() {
            self.text
                .push_str(&format!("\n{} provided structured data:\n", endpoint_name));
            for block in blocks {
                let pretty = serde_json::to_string_pretty(&block).unwrap_or_else(|_| block.to_string());
                self.text.push_str(&pretty);
                self.text.push('\n');
            }
        }
        self.text
            .push_str(&format!("\n{}'s response:\n{}\n", endpoint_name, reply));
    }
}

/**
 * \brief Sends a conversation to every active endpoint and collects one reply each.
 */
pub struct Dispatcher {
    backend: Arc<dyn ChatBackend>,
    strategy: Strategy,
    runner: Option<Arc<dyn CodeRunner>>,
    exec_timeout: Duration,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            strategy: Strategy::Parallel,
            runner: None,
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /**
     * \brief Run `RUN-CODE` blocks found in replies through `runner`.
     */
    pub fn with_code_runner(mut self, runner: Arc<dyn CodeRunner>, timeout: Duration) -> Self {
        self.runner = Some(runner);
        self.exec_timeout = timeout;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /**
     * \brief One round over `endpoints`, skipping those without a key.
     * \return Replies in endpoint-list order; a failed endpoint contributes an
     *         `{name}_Error` message instead of aborting the round.
     */
    pub async fn run_round(
        &self,
        history: &[Message],
        endpoints: &[Endpoint],
        context: &mut RelayContext,
    ) -> Result<Vec<Message>, DispatchError> {
        let active: Vec<&Endpoint> = endpoints.iter().filter(|e| e.is_active()).collect();
        if active.is_empty() {
            telemetry::log_error("dispatch", "no active endpoint");
            return Err(DispatchError::NoActiveEndpoint);
        }
        telemetry::log_event(
            "dispatch",
            &format!(
                "round endpoints={} history={} strategy={:?}",
                active.len(),
                history.len(),
                self.strategy
            ),
        );

        let outcomes = match self.strategy {
            Strategy::Parallel => {
                join_all(
                    active
                        .iter()
                        .map(|ep| self.backend.complete(ep, history, None)),
                )
                .await
            }
            Strategy::Relay { pause } => {
                let mut outcomes = Vec::with_capacity(active.len());
                for (i, ep) in active.iter().enumerate() {
                    if i > 0 && !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    let outcome = self.backend.complete(ep, history, context.as_option()).await;
                    if let Ok(reply) = &outcome {
                        context.record(&ep.name, reply);
                    }
                    outcomes.push(outcome);
                }
                outcomes
            }
        };

        let mut replies = Vec::with_capacity(active.len());
        for (ep, outcome) in active.iter().zip(outcomes) {
            match outcome {
                Ok(reply) => {
                    let code_blocks = match &self.runner {
                        Some(_) => extract_code_blocks(&reply),
                        None => Vec::new(),
                    };
                    replies.push(Message::assistant(ep.name.clone(), reply));
                    if let Some(runner) = &self.runner {
                        for code in code_blocks {
                            let output = runner.run(&code, self.exec_timeout).await;
                            replies.push(Message::assistant(
                                format!("{}_Code_Output", ep.name),
                                format!("Code execution output:\n{}", output),
                            ));
                        }
                    }
                }
                Err(e) => {
                    telemetry::log_error("dispatch", &e.to_string());
                    replies.push(Message::assistant(
                        format!("{}_Error", ep.name),
                        format!("Error: {}", e),
                    ));
                }
            }
        }
        Ok(replies)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::errors::DispatchError;
    use crate::executor::CodeRunner;
    use crate::llm::ChatBackend;
    use crate::models::{Endpoint, Message};

    /**
     * \brief Scripted backend: replies by endpoint name, optional per-endpoint delay.
     */
    #[derive(Default)]
    pub struct FakeBackend {
        pub replies: HashMap<String, Result<String, String>>,
        pub delays: HashMap<String, Duration>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<(String, usize, Option<String>)>>,
    }

    impl FakeBackend {
        pub fn reply(mut self, name: &str, text: &str) -> Self {
            self.replies.insert(name.to_string(), Ok(text.to_string()));
            self
        }

        pub fn fail(mut self, name: &str, reason: &str) -> Self {
            self.replies.insert(name.to_string(), Err(reason.to_string()));
            self
        }

        pub fn delay(mut self, name: &str, delay: Duration) -> Self {
            self.delays.insert(name.to_string(), delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn complete(
            &self,
            endpoint: &Endpoint,
            history: &[Message],
            context: Option<&str>,
        ) -> Result<String, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("seen lock").push((
                endpoint.name.clone(),
                history.len(),
                context.map(|c| c.to_string()),
            ));
            if let Some(delay) = self.delays.get(&endpoint.name) {
                tokio::time::sleep(*delay).await;
            }
            match self.replies.get(&endpoint.name) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(reason)) => Err(DispatchError::InvalidResponse {
                    endpoint: endpoint.name.clone(),
                    reason: reason.clone(),
                }),
                None => Ok(format!("{} says hi", endpoint.name)),
            }
        }
    }

    pub struct EchoRunner;

    #[async_trait]
    impl CodeRunner for EchoRunner {
        async fn run(&self, code: &str, _timeout: Duration) -> String {
            format!("ran {}", code)
        }
    }

    pub fn endpoint(name: &str, key: &str) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            api_key: key.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model_id: "gpt-4".to_string(),
        }
    }
}
