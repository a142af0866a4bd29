//! Storage for disposal items, QR codes and pickup requests
//!
//! Data model:
//! - disposal:{id} → JSON disposal item
//! - qr:item:{id} → payload minted for the item (set once)
//! - qr:code:{payload} → disposal item id
//! - scan:processed:{id} → set once when the item's code is processed
//! - pickup:{id} → JSON pickup request
//! - pickup:seq → pickup id counter

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use wastetrack_common::{DisposalItem, DisposalItemId, PickupId, PickupRequest};

#[async_trait]
pub trait PickupStore: Send {
    async fn health_check(&mut self) -> Result<()>;

    /// Returns false if an item with that id already exists
    async fn insert_item(&mut self, item: &DisposalItem) -> Result<bool>;

    async fn get_item(&mut self, id: DisposalItemId) -> Result<Option<DisposalItem>>;

    async fn save_item(&mut self, item: &DisposalItem) -> Result<()>;

    async fn qr_payload(&mut self, id: DisposalItemId) -> Result<Option<String>>;

    /// Bind `payload` to the item unless it already has one
    ///
    /// Returns the payload that ended up bound.
    async fn claim_qr_payload(&mut self, id: DisposalItemId, payload: &str) -> Result<String>;

    async fn resolve_code(&mut self, code: &str) -> Result<Option<DisposalItemId>>;

    /// Returns true only for the first caller
    async fn mark_processed(&mut self, id: DisposalItemId) -> Result<bool>;

    /// Undo [`PickupStore::mark_processed`] when the scan could not be recorded
    async fn clear_processed(&mut self, id: DisposalItemId) -> Result<()>;

    async fn next_pickup_id(&mut self) -> Result<PickupId>;

    async fn save_pickup(&mut self, pickup: &PickupRequest) -> Result<()>;

    /// Write a new pickup and its updated items in one step
    async fn open_pickup(&mut self, pickup: &PickupRequest, items: &[DisposalItem]) -> Result<()>;

    async fn get_pickup(&mut self, id: PickupId) -> Result<Option<PickupRequest>>;
}

fn item_key(id: DisposalItemId) -> String {
    format!("disposal:{}", id)
}

fn qr_item_key(id: DisposalItemId) -> String {
    format!("qr:item:{}", id)
}

fn qr_code_key(payload: &str) -> String {
    format!("qr:code:{}", payload)
}

fn processed_key(id: DisposalItemId) -> String {
    format!("scan:processed:{}", id)
}

fn pickup_key(id: PickupId) -> String {
    format!("pickup:{}", id)
}

/// Redis storage backend
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Successfully connected to Redis");

        Ok(Self { conn })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self.conn.get(key).await?;
        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| format!("Corrupt record at {}", key))
        })
        .transpose()
    }
}

#[async_trait]
impl PickupStore for RedisStore {
    async fn health_check(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn insert_item(&mut self, item: &DisposalItem) -> Result<bool> {
        let json = serde_json::to_string(item).context("Failed to serialize disposal item")?;
        let created: bool = self.conn.set_nx(item_key(item.id), json).await?;

        if created {
            info!("Registered disposal item {}", item.id);
        } else {
            debug!("Disposal item {} already exists", item.id);
        }
        Ok(created)
    }

    async fn get_item(&mut self, id: DisposalItemId) -> Result<Option<DisposalItem>> {
        self.get_json(&item_key(id)).await
    }

    async fn save_item(&mut self, item: &DisposalItem) -> Result<()> {
        let json = serde_json::to_string(item).context("Failed to serialize disposal item")?;
        let _: () = self.conn.set(item_key(item.id), json).await?;
        Ok(())
    }

    async fn qr_payload(&mut self, id: DisposalItemId) -> Result<Option<String>> {
        Ok(self.conn.get(qr_item_key(id)).await?)
    }

    async fn claim_qr_payload(&mut self, id: DisposalItemId, payload: &str) -> Result<String> {
        // The reverse mapping goes first so a bound payload always resolves
        let _: () = self.conn.set(qr_code_key(payload), id).await?;

        let claimed: bool = self.conn.set_nx(qr_item_key(id), payload).await?;
        if claimed {
            return Ok(payload.to_string());
        }

        let _: () = self.conn.del(qr_code_key(payload)).await?;
        let existing: Option<String> = self.conn.get(qr_item_key(id)).await?;
        existing.with_context(|| format!("QR payload for disposal item {} vanished", id))
    }

    async fn resolve_code(&mut self, code: &str) -> Result<Option<DisposalItemId>> {
        Ok(self.conn.get(qr_code_key(code)).await?)
    }

    async fn mark_processed(&mut self, id: DisposalItemId) -> Result<bool> {
        Ok(self.conn.set_nx(processed_key(id), "1").await?)
    }

    async fn clear_processed(&mut self, id: DisposalItemId) -> Result<()> {
        let _: () = self.conn.del(processed_key(id)).await?;
        Ok(())
    }

    async fn next_pickup_id(&mut self) -> Result<PickupId> {
        Ok(self.conn.incr("pickup:seq", 1).await?)
    }

    async fn save_pickup(&mut self, pickup: &PickupRequest) -> Result<()> {
        let json = serde_json::to_string(pickup).context("Failed to serialize pickup request")?;
        let _: () = self.conn.set(pickup_key(pickup.id), json).await?;
        Ok(())
    }

    async fn open_pickup(&mut self, pickup: &PickupRequest, items: &[DisposalItem]) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for item in items {
            let json = serde_json::to_string(item).context("Failed to serialize disposal item")?;
            pipe.set(item_key(item.id), json).ignore();
        }
        let json = serde_json::to_string(pickup).context("Failed to serialize pickup request")?;
        pipe.set(pickup_key(pickup.id), json).ignore();

        let _: () = pipe.query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn get_pickup(&mut self, id: PickupId) -> Result<Option<PickupRequest>> {
        self.get_json(&pickup_key(id)).await
    }
}

/// Process-local storage for development and tests
#[derive(Default)]
pub struct MemoryStore {
    items: HashMap<DisposalItemId, DisposalItem>,
    payloads: HashMap<DisposalItemId, String>,
    codes: HashMap<String, DisposalItemId>,
    processed: HashSet<DisposalItemId>,
    pickups: HashMap<PickupId, PickupRequest>,
    pickup_seq: PickupId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PickupStore for MemoryStore {
    async fn health_check(&mut self) -> Result<()> {
        Ok(())
    }

    async fn insert_item(&mut self, item: &DisposalItem) -> Result<bool> {
        if self.items.contains_key(&item.id) {
            return Ok(false);
        }
        self.items.insert(item.id, item.clone());
        Ok(true)
    }

    async fn get_item(&mut self, id: DisposalItemId) -> Result<Option<DisposalItem>> {
        Ok(self.items.get(&id).cloned())
    }

    async fn save_item(&mut self, item: &DisposalItem) -> Result<()> {
        self.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn qr_payload(&mut self, id: DisposalItemId) -> Result<Option<String>> {
        Ok(self.payloads.get(&id).cloned())
    }

    async fn claim_qr_payload(&mut self, id: DisposalItemId, payload: &str) -> Result<String> {
        let bound = self
            .payloads
            .entry(id)
            .or_insert_with(|| payload.to_string())
            .clone();
        self.codes.insert(bound.clone(), id);
        Ok(bound)
    }

    async fn resolve_code(&mut self, code: &str) -> Result<Option<DisposalItemId>> {
        Ok(self.codes.get(code).copied())
    }

    async fn mark_processed(&mut self, id: DisposalItemId) -> Result<bool> {
        Ok(self.processed.insert(id))
    }

    async fn clear_processed(&mut self, id: DisposalItemId) -> Result<()> {
        self.processed.remove(&id);
        Ok(())
    }

    async fn next_pickup_id(&mut self) -> Result<PickupId> {
        self.pickup_seq += 1;
        Ok(self.pickup_seq)
    }

    async fn save_pickup(&mut self, pickup: &PickupRequest) -> Result<()> {
        self.pickups.insert(pickup.id, pickup.clone());
        Ok(())
    }

    async fn open_pickup(&mut self, pickup: &PickupRequest, items: &[DisposalItem]) -> Result<()> {
        for item in items {
            self.items.insert(item.id, item.clone());
        }
        self.pickups.insert(pickup.id, pickup.clone());
        Ok(())
    }

    async fn get_pickup(&mut self, id: PickupId) -> Result<Option<PickupRequest>> {
        Ok(self.pickups.get(&id).cloned())
    }
}
