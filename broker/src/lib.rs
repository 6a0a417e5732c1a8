//! Real-time event distribution for connected clients.
//!
//! Clients hold long-lived Server-Sent Events or WebSocket connections and
//! receive typed events as lists and items change. Any number of service
//! instances can run side by side; every event published on one instance is
//! delivered to matching sessions on all of them.
//!
//! # Architecture
//!
//! - **Session registry**: a single task owns every session record on this
//!   instance. Joins, leaves and dispatches are messages to that task, so there
//!   are no locks and each session's queue has exactly one writer.
//! - **Local broker** (`Manager`): the entry point for publishing and for
//!   sessions to join and leave.
//! - **Fan-out**: events are only ever published to a shared exchange. Each
//!   instance consumes the exchange and dispatches into its own registry, so
//!   local and remote sessions take the same path.
//! - **Tickets**: short-lived opaque credentials kept in a shared store, used
//!   where a client cannot send an `Authorization` header.
//! - **Ephemeral events**: nothing is replayed. A client that was offline sees
//!   fresh data on its next load.
//!
//! # Message Flow
//!
//! 1. A client redeems a ticket (SSE) or presents its identity (WebSocket) and
//!    its session joins the registry with the context it asked for.
//! 2. A list or item changes and a `DomainEvent` reaches `StreamEventHandler`.
//! 3. The handler builds an `Event` with a target and publishes it.
//! 4. Every instance's consumer receives it and dispatches it to its registry.
//! 5. The registry evaluates the target against each session and enqueues the
//!    client frame on the ones that match.
//! 6. The session's pump writes the frame to the connection.
//!
//! # Example: Publishing an event
//!
//! ```rust,ignore
//! use broker::message::{Event, EventType, Target};
//!
//! let event = Event::new(
//!     EventType::LIST_ITEMS_ADDED,
//!     &serde_json::json!({ "listId": list_id, "items": items }),
//!     Target::context("listId", list_id.to_string()),
//! )?;
//! app_state.broker.publish(event).await?;
//! ```
//!
//! # Modules
//!
//! - `connection`: SSE stream and WebSocket pumps
//! - `domain_event_handler`: maps domain events onto broker events
//! - `error`: error types shared by the broker
//! - `fanout`: fan-out exchange backends, consumer and reconnect backoff
//! - `manager`: the local broker
//! - `message`: event, event type and target definitions
//! - `registry`: the session registry task and backpressure policy
//! - `session`: session records and their outbound queues
//! - `ticket`: ticket issuing, redemption and stores

pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod fanout;
pub mod manager;
pub mod message;
pub mod registry;
pub mod session;
pub mod ticket;

pub use manager::Manager;
