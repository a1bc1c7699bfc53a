//! Automatic expiry of emergency chats.
//!
//! Each emergency gets a timer for its chat's `expires_at`. A server-side
//! sweep over expired active chats backs the timers up, so an episode still
//! closes when the process that scheduled the timer went away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lifeline_shared::constants::{CHAT_EXPIRED_TEXT, CHAT_RESOLVED_TEXT};
use lifeline_shared::models::{Closure, EmergencyStatus, NewMessage};
use lifeline_shared::types::{ChatId, EmergencyId};

use crate::engine::EngineContext;
use crate::error::Result;

/// Close an episode: emergency first, then its chat and the closing notice.
///
/// Both writes are conditional. The chat close elects a single closer, so of
/// several racing resolve/expire calls exactly one returns `true` and exactly
/// one closing message is posted. A call that finds the emergency already
/// closed still closes a chat left active by an interrupted close.
pub(crate) async fn close_episode(
    ctx: &EngineContext,
    emergency_id: EmergencyId,
    chat_id: Option<ChatId>,
    closure: Closure,
) -> Result<bool> {
    let won = ctx
        .store
        .transition_emergency(emergency_id, EmergencyStatus::Closed)
        .await?;
    if !won {
        debug!(emergency = %emergency_id, "Emergency already closed");
    }

    let Some(chat_id) = chat_id else {
        if won {
            info!(emergency = %emergency_id, closure = %closure, "Emergency closed");
        }
        return Ok(won);
    };
    if !ctx.store.close_chat(chat_id, closure).await? {
        return Ok(false);
    }

    let text = match closure {
        Closure::Resolved => CHAT_RESOLVED_TEXT,
        Closure::Expired => CHAT_EXPIRED_TEXT,
    };
    if let Err(e) = ctx
        .store
        .append_message(&NewMessage::system(chat_id, text), ctx.clock.now())
        .await
    {
        warn!(chat = %chat_id, error = %e, "Closing message not posted");
    }
    info!(emergency = %emergency_id, closure = %closure, "Emergency closed");
    Ok(true)
}

pub struct ExpiryScheduler {
    ctx: EngineContext,
    pending: Arc<Mutex<HashMap<EmergencyId, JoinHandle<()>>>>,
}

impl ExpiryScheduler {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arm the timer for one emergency. Re-scheduling replaces the old timer.
    pub fn schedule(&self, emergency_id: EmergencyId, chat_id: ChatId, expires_at: DateTime<Utc>) {
        let delay = (expires_at - self.ctx.clock.now())
            .to_std()
            .unwrap_or_default();
        let ctx = self.ctx.clone();
        let pending = self.pending.clone();

        // Held across the spawn so the task cannot deregister before it is
        // registered.
        let mut armed = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match close_episode(&ctx, emergency_id, Some(chat_id), Closure::Expired).await {
                Ok(true) => info!(emergency = %emergency_id, "Emergency expired"),
                Ok(false) => {}
                Err(e) => {
                    error!(emergency = %emergency_id, error = %e, "Failed to expire emergency")
                }
            }
            lock(&pending).remove(&emergency_id);
        });

        if let Some(old) = armed.insert(emergency_id, handle) {
            old.abort();
        }
        drop(armed);
        debug!(emergency = %emergency_id, ?delay, "Expiry armed");
    }

    /// Disarm the timer. Returns `true` if one was pending.
    pub fn cancel(&self, emergency_id: EmergencyId) -> bool {
        match lock(&self.pending).remove(&emergency_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Close every active chat past its expiry. Returns how many episodes
    /// this call closed.
    pub async fn sweep(&self) -> Result<usize> {
        let now = self.ctx.clock.now();
        let expired = self.ctx.store.expired_active_chats(now).await?;
        let mut closed = 0;
        for chat in expired {
            let closing =
                close_episode(&self.ctx, chat.emergency_id, Some(chat.id), Closure::Expired);
            match closing.await {
                Ok(true) => {
                    closed += 1;
                    self.cancel(chat.emergency_id);
                }
                Ok(false) => {}
                Err(e) => error!(chat = %chat.id, error = %e, "Sweep failed on chat"),
            }
        }
        if closed > 0 {
            info!("Expiry sweep closed {} chat(s)", closed);
        }
        Ok(closed)
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.pending).drain() {
            handle.abort();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
