//! Status and upcoming commands

use super::{format_ms, Target};
use anyhow::{Context, Result};
use dtimer_scheduler::UpcomingOptions;

pub async fn execute(target: &Target) -> Result<()> {
    tracing::info!("Checking schedule status: {}", target.db_path.display());

    let node = target.post_only_node().await?;
    let stats = node.stats().await.context("Failed to read schedule")?;

    println!("\nSchedule Status");
    println!("{}", "=".repeat(60));
    println!("Path: {}", target.db_path.display());
    println!("Namespace: {}", target.namespace);
    println!("Now: {}", format_ms(stats.now));

    println!("\nEvents:");
    println!("  Pending: {}", stats.pending);
    println!("  Awaiting confirmation: {}", stats.leased);
    match stats.horizon {
        Some(at) if at <= stats.now => println!("  Next due: overdue since {}", format_ms(at)),
        Some(at) => println!("  Next due: {} (in {} ms)", format_ms(at), at - stats.now),
        None => println!("  Next due: -"),
    }

    println!("\nMembers ({}):", stats.members.len());
    for member in &stats.members {
        println!("  {}", member);
    }
    if stats.members.is_empty() && stats.pending > 0 {
        println!("\n⚠️  No node has joined; pending events will not fire");
        println!("Run 'dtimer run' to start one");
    }

    Ok(())
}

pub async fn upcoming(
    target: &Target,
    offset: i64,
    duration: Option<u64>,
    limit: Option<usize>,
) -> Result<()> {
    let mut options = UpcomingOptions::new().with_offset_ms(offset);
    if let Some(duration) = duration {
        options = options.with_duration_ms(duration);
    }
    if let Some(limit) = limit {
        options = options.with_limit(limit);
    }

    let node = target.post_only_node().await?;
    let events = node
        .upcoming(options)
        .await
        .context("Failed to list events")?;
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
