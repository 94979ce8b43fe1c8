//! Post, peek, cancel, confirm and change-delay

use super::Target;
use anyhow::{bail, Context, Result};
use dtimer_scheduler::{parse_delay_ms, NewEvent};

pub async fn post(
    target: &Target,
    delay: &str,
    payload: &str,
    id: Option<String>,
    max_retries: Option<u32>,
) -> Result<()> {
    let delay_ms = parse_delay_ms(delay)?;
    let value: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let mut event = NewEvent::from_value(value)?;
    if let Some(id) = id {
        event = event.with_id(id);
    }
    if let Some(max_retries) = max_retries {
        event = event.with_max_retries(max_retries);
    }

    let node = target.post_only_node().await?;
    let id = node.post(event, delay_ms).await.context("Failed to post event")?;
    tracing::info!(event_id = %id, delay_ms, "Event scheduled");
    println!("{}", id);
    Ok(())
}

pub async fn peek(target: &Target, id: &str) -> Result<()> {
    let node = target.post_only_node().await?;
    match node.peek(id).await.context("Failed to read event")? {
        Some(peeked) => println!("{}", serde_json::to_string_pretty(&peeked)?),
        None => bail!("Event {} is not pending", id),
    }
    Ok(())
}

pub async fn cancel(target: &Target, id: &str) -> Result<()> {
    let node = target.post_only_node().await?;
    if !node.cancel(id).await.context("Failed to cancel event")? {
        bail!("Event {} is not pending", id);
    }
    println!("✓ Cancelled {}", id);
    Ok(())
}

pub async fn confirm(target: &Target, id: &str) -> Result<()> {
    let node = target.post_only_node().await?;
    if !node.confirm(id).await.context("Failed to confirm event")? {
        bail!("Event {} is not awaiting confirmation", id);
    }
    println!("✓ Confirmed {}", id);
    Ok(())
}

pub async fn change_delay(target: &Target, id: &str, delay: &str) -> Result<()> {
    let delay_ms = parse_delay_ms(delay)?;
    let node = target.post_only_node().await?;
    if !node
        .change_delay(id, delay_ms)
        .await
        .context("Failed to change delay")?
    {
        bail!("Event {} is not pending", id);
    }
    println!("✓ {} now fires in {} ms", id, delay_ms);
    Ok(())
}
