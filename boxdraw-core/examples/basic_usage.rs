use boxdraw_core::{
    BoxClaims, ChannelPatch, LotteryConfig, Member, NewChannel, SharedStore, SqliteStore,
};
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Create temp dir
    let temp_dir = tempdir()?;
    println!("Using temporary directory: {:?}", temp_dir.path());

    let config = LotteryConfig::default();
    let store = SqliteStore::open(&temp_dir.path().join("boxdraw.db"), &config).await?;

    println!("Creating channel...");
    let id = store
        .create(NewChannel {
            name: "Example".to_string(),
            admin_id: "alice".to_string(),
            max_users: 4,
            users: vec![Member::admin("alice", "Alice")],
            selected_boxes: BoxClaims::new(),
            results: Vec::new(),
            is_drawn: false,
        })
        .await?;
    println!("Channel ID: {}", id);

    let mut subscription = store.subscribe(&id).await?;
    if let Some(initial) = subscription.next().await {
        println!("Initial snapshot: version {}", initial.version);
    }

    // Conditional write against version 1
    let mut boxes = BoxClaims::new();
    boxes.insert(2, "alice".to_string());
    let updated = store
        .update(&id, ChannelPatch::selected_boxes(boxes), Some(1))
        .await?;
    println!("Claimed box 2, now at version {}", updated.version);

    // A second write against the same version is rejected
    if let Err(e) = store
        .update(&id, ChannelPatch::selected_boxes(BoxClaims::new()), Some(1))
        .await
    {
        println!("Stale write rejected: {}", e);
    }

    if let Some(next) = subscription.next().await {
        println!("Subscriber saw version {}: {:?}", next.version, next.selected_boxes);
    }

    let channels = store.list().await?;
    println!("\nAvailable channels: {}", channels.len());

    println!("\nExample completed successfully!");

    Ok(())
}
