//! One-time tickets for streaming connections that cannot send an
//! `Authorization` header (e.g. a browser `EventSource`).
//!
//! An authenticated client asks for a ticket, then passes it as a query
//! parameter when opening the stream. Tickets live in a shared ephemeral store
//! so any instance can redeem a ticket issued by any other.

pub mod memory;
pub mod redis;

use crate::error::{AuthenticationErrorKind, Error, ErrorKind, Result};
use crate::message::UserId;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use log::*;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(30);

/// Ephemeral key/value store with per-key expiry.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Stores `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Reads `key` without removing it.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically reads and removes `key`.
    async fn take(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct TicketSettings {
    /// Namespace prepended to every ticket key.
    pub key_prefix: String,
    pub ttl: Duration,
    /// Delete the ticket when it is redeemed.
    pub single_use: bool,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            key_prefix: "shopping-list".to_string(),
            ttl: DEFAULT_TICKET_TTL,
            single_use: true,
        }
    }
}

/// Issues and redeems tickets against a [`TicketStore`].
#[derive(Clone)]
pub struct TicketIssuer {
    store: Arc<dyn TicketStore>,
    settings: TicketSettings,
}

impl TicketIssuer {
    pub fn new(store: Arc<dyn TicketStore>, settings: TicketSettings) -> Self {
        Self { store, settings }
    }

    /// Creates a ticket bound to `user_id`, valid for the configured TTL.
    pub async fn issue(&self, user_id: &str) -> Result<String> {
        let ticket = Self::generate_ticket();
        self.store
            .put(&self.key(&ticket), user_id, self.settings.ttl)
            .await?;
        debug!(
            "Issued stream ticket for user {user_id}, valid for {}s",
            self.settings.ttl.as_secs()
        );
        Ok(ticket)
    }

    /// Resolves a ticket to the identity it was issued for.
    pub async fn redeem(&self, ticket: &str) -> Result<UserId> {
        if ticket.is_empty() {
            return Err(Error::new(ErrorKind::Authentication(
                AuthenticationErrorKind::MissingTicket,
            )));
        }

        let key = self.key(ticket);
        let user_id = if self.settings.single_use {
            self.store.take(&key).await?
        } else {
            self.store.get(&key).await?
        };

        match user_id {
            Some(user_id) if !user_id.is_empty() => {
                debug!("Redeemed stream ticket for user {user_id}");
                Ok(user_id)
            }
            _ => {
                debug!("Rejected unknown or expired stream ticket");
                Err(Error::new(ErrorKind::Authentication(
                    AuthenticationErrorKind::NotFound,
                )))
            }
        }
    }

    fn key(&self, ticket: &str) -> String {
        format!("{}.API:SSETICKET:{}", self.settings.key_prefix, ticket)
    }

    fn generate_ticket() -> String {
        let mut random_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut random_bytes);
        URL_SAFE_NO_PAD.encode(random_bytes)
    }
}
