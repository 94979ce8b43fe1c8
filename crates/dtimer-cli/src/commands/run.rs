//! Run command implementation

use super::Target;
use anyhow::{Context, Result};
use dtimer_core::ScheduleStore;
use dtimer_scheduler::{EventRecord, TimerNode, TimerNotification};
use std::future::Future;
use tokio::sync::mpsc;

pub async fn execute(
    target: &Target,
    node_id: Option<String>,
    max_events: usize,
    auto_confirm: bool,
) -> Result<()> {
    let node_id = node_id.unwrap_or_else(|| format!("node-{}", std::process::id()));
    let (node, mut notifications) = target.worker_node(node_id.clone(), max_events).await?;
    node.join().await.context("Failed to join")?;

    println!("Node {} running... (Press Ctrl+C to stop)", node_id);

    let stop = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    serve(&node, &mut notifications, auto_confirm, stop).await;

    node.leave().await.context("Failed to leave")?;
    println!("✓ Node {} left", node_id);
    Ok(())
}

/// Print events until `stop` resolves or the node closes its channel.
/// A failing event is logged and skipped. Returns how many events were seen.
async fn serve<S, F>(
    node: &TimerNode<S>,
    notifications: &mut mpsc::Receiver<TimerNotification>,
    auto_confirm: bool,
    stop: F,
) -> usize
where
    S: ScheduleStore,
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut seen = 0;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            notification = notifications.recv() => match notification {
                Some(TimerNotification::Event(event)) => {
                    seen += 1;
                    if let Err(e) = handle_event(node, &event, auto_confirm).await {
                        tracing::warn!(event_id = %event.id, error = %e, "Failed to handle event");
                    }
                }
                Some(TimerNotification::Error(e)) => {
                    tracing::warn!(error = %e, "Node reported an error");
                }
                Some(TimerNotification::Ready) => {}
                None => break,
            },
        }
    }
    seen
}

async fn handle_event<S: ScheduleStore>(
    node: &TimerNode<S>,
    event: &EventRecord,
    auto_confirm: bool,
) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    if auto_confirm && !node.confirm(&event.id).await? {
        tracing::warn!(event_id = %event.id, "Event was no longer leased");
    }
    Ok(())
}
