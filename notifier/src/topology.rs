//! Broker topology: one topic exchange and two durable queues.
//!
//! Both the publisher and the consumers derive their exchange, queue and
//! routing-key names from the same [`Topology`], built once from [`Config`].
//! Declaration is idempotent; redeclaring with different arguments makes the
//! broker close the channel with `PRECONDITION_FAILED`, which surfaces here
//! as a [`TopologyError`] at startup.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ExchangeKind,
};
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::envelope::NotificationKind;

/// A durable queue and the key it is bound with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub employee: QueueBinding,
    pub leave: QueueBinding,
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("routing key {routing_key:?} would also be delivered to queue {queue:?}")]
    CrossRouting { routing_key: String, queue: String },

    #[error("failed to declare exchange {exchange:?}")]
    Exchange {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare queue {queue:?}")]
    Queue {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to bind queue {queue:?} with key {routing_key:?}")]
    Bind {
        queue: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },
}

impl Topology {
    /// Build the topology, checking that each routing key reaches only its own queue.
    pub fn from_config(config: &Config) -> Result<Self, TopologyError> {
        config.validate()?;

        let topology = Topology {
            exchange: config.exchange.clone(),
            employee: QueueBinding {
                queue: config.employee_queue.clone(),
                routing_key: config.employee_routing_key.clone(),
            },
            leave: QueueBinding {
                queue: config.leave_queue.clone(),
                routing_key: config.leave_routing_key.clone(),
            },
        };

        for (_, own) in topology.bindings() {
            for queue in topology.route(&own.routing_key) {
                if queue != own.queue {
                    return Err(TopologyError::CrossRouting {
                        routing_key: own.routing_key.clone(),
                        queue: queue.to_string(),
                    });
                }
            }
        }

        Ok(topology)
    }

    /// Queue and routing key for a notification kind.
    pub fn binding(&self, kind: NotificationKind) -> &QueueBinding {
        match kind {
            NotificationKind::EmployeeCreated => &self.employee,
            NotificationKind::LeaveStatusUpdated => &self.leave,
        }
    }

    pub fn bindings(&self) -> [(NotificationKind, &QueueBinding); 2] {
        [
            (NotificationKind::EmployeeCreated, &self.employee),
            (NotificationKind::LeaveStatusUpdated, &self.leave),
        ]
    }

    /// Queues the exchange would deliver a message with `routing_key` to.
    pub fn route(&self, routing_key: &str) -> Vec<&str> {
        self.bindings()
            .into_iter()
            .filter(|(_, binding)| topic_matches(&binding.routing_key, routing_key))
            .map(|(_, binding)| binding.queue.as_str())
            .collect()
    }

    /// Declare the exchange, both queues and their bindings.
    pub async fn declare(&self, channel: &Channel) -> Result<(), TopologyError> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| TopologyError::Exchange {
                exchange: self.exchange.clone(),
                source,
            })?;

        info!(exchange = %self.exchange, kind = "topic", "rabbitmq_exchange_declared");

        for (kind, binding) in self.bindings() {
            channel
                .queue_declare(
                    &binding.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| TopologyError::Queue {
                    queue: binding.queue.clone(),
                    source,
                })?;

            channel
                .queue_bind(
                    &binding.queue,
                    &self.exchange,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|source| TopologyError::Bind {
                    queue: binding.queue.clone(),
                    routing_key: binding.routing_key.clone(),
                    source,
                })?;

            info!(
                kind = %kind,
                queue = %binding.queue,
                routing_key = %binding.routing_key,
                "rabbitmq_queue_bound"
            );
        }

        Ok(())
    }
}

/// AMQP topic matching: `*` matches one word, `#` zero or more.
pub fn topic_matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding_key.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &words)
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match (pattern.first(), words.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            match_words(&pattern[1..], words)
                || (!words.is_empty() && match_words(pattern, &words[1..]))
        }
        (Some(&"*"), Some(_)) => match_words(&pattern[1..], &words[1..]),
        (Some(p), Some(w)) if p == w => match_words(&pattern[1..], &words[1..]),
        _ => false,
    }
}
