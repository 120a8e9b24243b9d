//! Fans catalog changes out to connected sessions as MCP list-changed
//! notifications. The watch channel coalesces bursts, so every session sees
//! at least one notification per distinct catalog version it outlived.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use crate::handler::GatewayState;

pub fn spawn_notifier(state: Arc<GatewayState>) -> JoinHandle<()> {
    let mut catalog = state.catalog.clone();
    tokio::spawn(async move {
        loop {
            if catalog.changed().await.is_err() {
                break;
            }
            let version = catalog.borrow().version();
            let peers = state.sessions.peers();
            if peers.is_empty() {
                continue;
            }
            debug!(
                "catalog v{version}: notifying {} session(s) of tool list change",
                peers.len()
            );

            for (session_id, peer) in peers {
                let tools_ok = peer.notify_tool_list_changed().await.is_ok();
                let resources_ok = peer.notify_resource_list_changed().await.is_ok();
                let prompts_ok = peer.notify_prompt_list_changed().await.is_ok();
                if !(tools_ok && resources_ok && prompts_ok) {
                    // The transport is gone; forget the peer so we stop
                    // queueing for it.
                    info!("session {session_id} unreachable, dropping its peer");
                    state.sessions.remove_session(&session_id).await;
                }
            }
        }
    })
}
