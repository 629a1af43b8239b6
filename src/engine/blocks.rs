use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::{self, DEFAULT_BLOCK_REASON, FULL_BLOCK_REASON, MAX_REASON_LEN};
use crate::model::*;

use super::conflict::{check_capacity, check_no_block_conflict, check_text, checked_span};
use super::store::Held;
use super::{Engine, EngineError, EntityKind, Gate, observe};

impl Engine {
    /// Hold a room for a date range. Checked against the room's other blocks only.
    pub async fn create_block(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        reason: Option<String>,
    ) -> Result<RoomBlock, EngineError> {
        observe(
            "create_block",
            self.create_block_inner(room_id, start, end, reason).await,
        )
    }

    async fn create_block_inner(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        reason: Option<String>,
    ) -> Result<RoomBlock, EngineError> {
        let span = checked_span(start, end)?;
        let reason = match reason {
            Some(r) if !r.trim().is_empty() => r,
            _ => DEFAULT_BLOCK_REASON.to_string(),
        };
        check_text(&reason, MAX_REASON_LEN, "block reason too long")?;

        let gate = self.enter().await?;
        let guard = self.lock_room(room_id).await?;
        check_capacity(&guard)?;
        check_no_block_conflict(&guard, &span)?;
        self.insert_block(gate, guard, span, reason).await
    }

    async fn insert_block(
        &self,
        gate: Gate,
        guard: tokio::sync::OwnedRwLockWriteGuard<RoomState>,
        span: Span,
        reason: String,
    ) -> Result<RoomBlock, EngineError> {
        let block = RoomBlock {
            id: Ulid::new(),
            room_id: guard.room.id,
            span,
            reason,
        };
        let hotel_id = guard.room.hotel_id;
        let event = Event::BlockCreated {
            block: block.clone(),
        };
        self.commit(gate, Some(hotel_id), event, Held::Rooms(vec![guard]))
            .await?;
        info!(
            "block {} on room {} [{}, {}): {}",
            block.id, block.room_id, span.start, span.end, block.reason
        );
        Ok(block)
    }

    /// Hard-delete a block.
    pub async fn remove_block(&self, block_id: Ulid) -> Result<(), EngineError> {
        observe("remove_block", self.remove_block_inner(block_id).await)
    }

    async fn remove_block_inner(&self, block_id: Ulid) -> Result<(), EngineError> {
        let room_id = self
            .store
            .room_for_block(&block_id)
            .ok_or(EngineError::NotFound(EntityKind::Block, block_id))?;
        let gate = self.enter().await?;
        let guard = self.lock_room(room_id).await?;
        if !guard.blocks.iter().any(|b| b.id == block_id) {
            return Err(EngineError::NotFound(EntityKind::Block, block_id));
        }
        let hotel_id = guard.room.hotel_id;
        let event = Event::BlockRemoved {
            id: block_id,
            room_id,
        };
        self.commit(gate, Some(hotel_id), event, Held::Rooms(vec![guard]))
            .await?;
        info!("block {block_id} removed from room {room_id}");
        Ok(())
    }

    /// Hide or unhide a room entirely. Returns the sentinel block when one was
    /// created, `None` when it was removed.
    ///
    /// Creating the sentinel goes through the same overlap check as any block,
    /// so a room with ordinary holds fails with `BlockConflict`.
    pub async fn toggle_full_block(&self, room_id: Ulid) -> Result<Option<RoomBlock>, EngineError> {
        observe("toggle_full_block", self.toggle_full_block_inner(room_id).await)
    }

    async fn toggle_full_block_inner(&self, room_id: Ulid) -> Result<Option<RoomBlock>, EngineError> {
        let gate = self.enter().await?;
        let guard = self.lock_room(room_id).await?;
        match guard.full_block().map(|b| b.id) {
            Some(id) => {
                let hotel_id = guard.room.hotel_id;
                let event = Event::BlockRemoved { id, room_id };
                self.commit(gate, Some(hotel_id), event, Held::Rooms(vec![guard]))
                    .await?;
                info!("room {room_id} unhidden");
                Ok(None)
            }
            None => {
                let span = limits::full_block_span();
                check_capacity(&guard)?;
                check_no_block_conflict(&guard, &span)?;
                let block = self
                    .insert_block(gate, guard, span, FULL_BLOCK_REASON.to_string())
                    .await?;
                Ok(Some(block))
            }
        }
    }
}
