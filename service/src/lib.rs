use broker::domain_event_handler::StreamEventHandler;
use broker::fanout::memory::InMemoryFanout;
use broker::fanout::redis::RedisFanout;
use broker::fanout::FanoutBackend;
use broker::ticket::memory::InMemoryTicketStore;
use broker::ticket::redis::RedisTicketStore;
use broker::ticket::{TicketIssuer, TicketStore};
use broker::Manager;
use config::{Config, StoreBackend};
use events::EventPublisher;
use log::*;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Opens a Redis client and a multiplexed, self-reconnecting connection on it.
/// The client is kept for opening dedicated pub/sub connections.
pub async fn init_redis(config: &Config) -> Result<(Client, ConnectionManager), RedisError> {
    let url = config.redis_url().unwrap_or("redis://127.0.0.1:6379");
    info!("Connecting to Redis at {url}");

    let client = Client::open(url)?;
    let conn = ConnectionManager::new(client.clone()).await?;

    Ok((client, conn))
}

/// The fan-out exchange and ticket store selected by configuration.
pub struct Backends {
    pub fanout: Arc<dyn FanoutBackend>,
    pub tickets: Arc<dyn TicketStore>,
}

pub async fn init_backends(config: &Config) -> Result<Backends, RedisError> {
    match config.store_backend {
        StoreBackend::Redis => {
            let (client, conn) = init_redis(config).await?;
            Ok(Backends {
                fanout: Arc::new(RedisFanout::new(
                    client,
                    conn.clone(),
                    config.fanout_channel.clone(),
                )),
                tickets: Arc::new(RedisTicketStore::new(conn)),
            })
        }
        StoreBackend::Memory => {
            if config.is_production() {
                warn!("In-memory backends do not fan out across instances");
            }
            Ok(Backends {
                fanout: Arc::new(InMemoryFanout::default()),
                tickets: Arc::new(InMemoryTicketStore::new()),
            })
        }
    }
}

// Service-level state shared by every request handler
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub broker: Arc<Manager>,
    pub tickets: Arc<TicketIssuer>,
    pub event_publisher: EventPublisher,
}

impl AppState {
    /// Builds the state around a running broker. Domain events published
    /// through `event_publisher` are streamed to connected clients.
    pub fn new(app_config: Config, broker: Arc<Manager>, tickets: TicketIssuer) -> Self {
        let event_publisher = EventPublisher::new()
            .with_handler(Arc::new(StreamEventHandler::new(Arc::clone(&broker))));

        Self {
            config: app_config,
            broker,
            tickets: Arc::new(tickets),
            event_publisher,
        }
    }

    /// Starts a broker and ticket issuer on the given backends.
    pub fn start(app_config: Config, backends: Backends) -> Self {
        let broker = Arc::new(Manager::start(backends.fanout, app_config.broker_settings()));
        let tickets = TicketIssuer::new(backends.tickets, app_config.ticket_settings());
        Self::new(app_config, broker, tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::fanout::ConnectionState;
    use broker::message::SessionContext;
    use clap::Parser;
    use events::{DomainEvent, Id};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_backends_stream_domain_events() {
        let config = Config::parse_from(["shopping_list_rs", "--store-backend", "memory"]);
        let backends = init_backends(&config).await.unwrap();
        let app_state = AppState::start(config, backends);
        app_state
            .broker
            .fanout_state_changes()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let list_id = Id::new_v4();
        let mut context = SessionContext::new();
        context.insert("listId".to_string(), json!(list_id.to_string()));
        let (session, mut outbound) = app_state.broker.new_session("u1".to_string(), context);
        app_state.broker.join(session);
        assert_eq!(app_state.broker.session_count().await, 1);

        app_state
            .event_publisher
            .publish(DomainEvent::ListItemsUpdated {
                list_id,
                items: json!([]),
            })
            .await;

        let frame = outbound.recv().await.unwrap();
        assert!(frame.contains("LIST_ITEMS_UPDATED"));
    }

    #[tokio::test]
    async fn test_issued_tickets_redeem_through_app_state() {
        let config = Config::parse_from(["shopping_list_rs", "--store-backend", "memory"]);
        let app_state = AppState::start(config.clone(), init_backends(&config).await.unwrap());

        let ticket = app_state.tickets.issue("u1").await.unwrap();
        assert_eq!(app_state.tickets.redeem(&ticket).await.unwrap(), "u1");
    }
}
