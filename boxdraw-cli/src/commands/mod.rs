use boxdraw_core::{Channel, ChannelSummary};
use boxdraw_lottery::{ChannelStateMachine, LotteryError, Phase, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;

pub async fn create_channel(
    machine: &ChannelStateMachine,
    name: &str,
    max_users: u32,
    display_name: Option<&str>,
) -> Result<()> {
    let user_id = machine.user_id();
    let session = machine
        .create_channel(name, max_users, display_name.unwrap_or(&user_id))
        .await?;

    println!("Created channel '{}'", session.channel().name);
    println!("Channel ID: {}", session.channel_id());
    println!("Admin: {}", user_id);
    println!("Boxes: {}", session.channel().max_users);
    println!();
    println!("Share this command with the other participants:");
    println!("boxdraw --user <their-id> join {}", session.channel_id());

    Ok(())
}

pub async fn list_channels(machine: &ChannelStateMachine) -> Result<()> {
    let channels = machine.list_channels().await?;

    if channels.is_empty() {
        println!("No channels found.");
        println!("Create one with: boxdraw create <name>");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "ID", "Members", "Boxes", "Status", "Created"]);
    for summary in &channels {
        table.add_row(summary_row(summary));
    }

    println!("{}", table);
    Ok(())
}

pub async fn join_channel(
    machine: &ChannelStateMachine,
    channel_id: &str,
    display_name: Option<&str>,
) -> Result<()> {
    let user_id = machine.user_id();
    let session = machine
        .join_channel(channel_id, display_name.unwrap_or(&user_id))
        .await?;
    let channel = session.channel();

    println!("Joined channel '{}' as {}", channel.name, channel.display_name(&user_id));
    println!("Members: {}/{}", channel.users.len(), channel.max_users);
    println!();
    println!("Claim a box with:");
    println!("boxdraw --user {} select {} <box>", user_id, channel_id);

    Ok(())
}

pub async fn select_box(
    machine: &ChannelStateMachine,
    channel_id: &str,
    box_index: u32,
) -> Result<()> {
    let mut session = machine.open(channel_id).await?;
    let boxes = session.select_box(box_index).await?;

    println!("Claimed box {}", box_index);
    println!("{}/{} boxes claimed", boxes.len(), session.channel().max_users);
    Ok(())
}

pub async fn release_box(machine: &ChannelStateMachine, channel_id: &str) -> Result<()> {
    let mut session = machine.open(channel_id).await?;
    let held = session.channel().box_of(session.user_id());
    let boxes = session.release_box().await?;

    match held {
        Some(box_index) => println!("Released box {}", box_index),
        None => println!("You were not holding a box."),
    }
    println!("{}/{} boxes claimed", boxes.len(), session.channel().max_users);
    Ok(())
}

pub async fn draw(machine: &ChannelStateMachine, channel_id: &str) -> Result<()> {
    let mut session = machine.open(channel_id).await?;
    session.start_draw().await?;

    println!("Drawing... (Ctrl-C to cancel)");
    let drawn = tokio::select! {
        drawn = session.wait_for_draw() => drawn?,
        _ = tokio::signal::ctrl_c() => {
            println!("Draw cancelled.");
            return Ok(());
        }
    };

    println!("{}", results_table(&drawn));
    Ok(())
}

pub async fn reset(machine: &ChannelStateMachine, channel_id: &str) -> Result<()> {
    let mut session = machine.open(channel_id).await?;
    let channel = session.reset().await?;

    println!("Channel '{}' reset; {} members kept", channel.name, channel.users.len());
    Ok(())
}

pub async fn show_status(machine: &ChannelStateMachine, channel_id: &str) -> Result<()> {
    let channel = machine.repository().get(channel_id).await?;
    print_channel(&channel, &machine.user_id());
    Ok(())
}

pub async fn watch(machine: &ChannelStateMachine, channel_id: &str) -> Result<()> {
    let mut session = machine.open(channel_id).await?;
    let user_id = session.user_id().to_string();
    print_channel(session.channel(), &user_id);

    loop {
        tokio::select! {
            next = session.next_snapshot() => match next {
                Some(channel) => {
                    println!();
                    println!("-- update (version {}) --", channel.version);
                    print_channel(channel, &user_id);
                }
                None => {
                    println!("Channel was deleted.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.leave();
    Ok(())
}

pub async fn delete_channel(
    machine: &ChannelStateMachine,
    channel_id: &str,
    force: bool,
) -> Result<()> {
    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to delete channel '{}'? This action cannot be undone.",
                channel_id
            ))
            .default(false)
            .interact()
            .map_err(|e| LotteryError::Internal(e.to_string()))?;

        if !confirm {
            println!("Deletion cancelled.");
            return Ok(());
        }
    }

    machine.delete_channel(channel_id).await?;
    println!("Channel '{}' deleted successfully.", channel_id);
    Ok(())
}

fn print_channel(channel: &Channel, user_id: &str) {
    println!("Channel: {}", channel.name);
    println!("  ID: {}", channel.id);
    println!("  Admin: {}", channel.display_name(&channel.admin_id));
    println!("  Members: {}/{}", channel.users.len(), channel.max_users);
    println!("  Status: {}", phase_label(Phase::of(channel)));
    println!();

    let mut members = Table::new();
    members.load_preset(UTF8_FULL);
    members.set_header(vec!["Member", "ID", "Role", "Box"]);
    for member in &channel.users {
        let name = if member.id == user_id {
            format!("{} (you)", member.name)
        } else {
            member.name.clone()
        };
        members.add_row(vec![
            name,
            member.id.clone(),
            if member.is_admin { "admin" } else { "member" }.to_string(),
            channel
                .box_of(&member.id)
                .map_or_else(|| "-".to_string(), |b| b.to_string()),
        ]);
    }
    println!("{}", members);

    if channel.is_drawn {
        println!("{}", results_table(channel));
    } else {
        let mut boxes = Table::new();
        boxes.load_preset(UTF8_FULL);
        boxes.set_header(vec!["Box", "Claimed by"]);
        for row in box_rows(channel) {
            boxes.add_row(row);
        }
        println!("{}", boxes);
    }
}

fn results_table(channel: &Channel) -> Table {
    let mut results = channel.results.clone();
    results.sort_by_key(|r| r.position);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Position", "Box", "Member"]);
    for result in results {
        table.add_row(vec![
            result.position.to_string(),
            result.box_index.to_string(),
            result.user_name,
        ]);
    }
    table
}

fn box_rows(channel: &Channel) -> Vec<Vec<String>> {
    (0..channel.max_users)
        .map(|index| {
            let owner = channel
                .box_owner(index)
                .map_or_else(|| "free".to_string(), |id| channel.display_name(id));
            vec![index.to_string(), owner]
        })
        .collect()
}

fn summary_row(summary: &ChannelSummary) -> Vec<String> {
    vec![
        summary.name.clone(),
        summary.id.clone(),
        format!("{}/{}", summary.member_count, summary.max_users),
        format!("{}/{}", summary.claimed_boxes, summary.max_users),
        if summary.is_drawn { "Drawn" } else { "Open" }.to_string(),
        summary
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
    ]
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Open => "Open",
        Phase::Drawing => "Drawing",
        Phase::Drawn => "Drawn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxdraw_core::{LotteryConfig, MemoryStore, SqliteStore, StaticIdentity};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn machine(store: Arc<dyn boxdraw_core::SharedStore>, user: &str) -> ChannelStateMachine {
        ChannelStateMachine::new(
            store,
            Arc::new(StaticIdentity(user.to_string())),
            LotteryConfig::instant(),
        )
    }

    #[tokio::test]
    async fn test_box_rows_show_claimants() {
        let store: Arc<dyn boxdraw_core::SharedStore> = Arc::new(MemoryStore::new());
        let admin = machine(store.clone(), "alice");
        let mut session = admin.create_channel("Rows", 3, "Alice").await.unwrap();
        session.select_box(1).await.unwrap();

        let rows = box_rows(session.sync());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["0".to_string(), "free".to_string()]);
        assert_eq!(rows[1], vec!["1".to_string(), "Alice".to_string()]);
    }

    #[tokio::test]
    async fn test_commands_against_sqlite() {
        let temp_dir = tempdir().unwrap();
        let config = LotteryConfig::instant();
        let store: Arc<dyn boxdraw_core::SharedStore> = Arc::new(
            SqliteStore::open(&temp_dir.path().join("boxdraw.db"), &config)
                .await
                .unwrap(),
        );
        let admin = machine(store.clone(), "alice");
        let bob = machine(store.clone(), "bob");

        create_channel(&admin, "Cli", 2, Some("Alice")).await.unwrap();
        let summary = admin.list_channels().await.unwrap().remove(0);
        assert_eq!(summary_row(&summary)[2], "1/2");

        join_channel(&bob, &summary.id, None).await.unwrap();
        select_box(&bob, &summary.id, 0).await.unwrap();
        let err = select_box(&admin, &summary.id, 0).await.unwrap_err();
        assert!(matches!(err, LotteryError::BoxUnavailable(0)));

        let err = draw(&bob, &summary.id).await.unwrap_err();
        assert!(matches!(err, LotteryError::Unauthorized));
        draw(&admin, &summary.id).await.unwrap();

        let channel = admin.repository().get(&summary.id).await.unwrap();
        assert!(channel.is_drawn);
        assert_eq!(channel.results[0].user_name, "bob");

        reset(&admin, &summary.id).await.unwrap();
        delete_channel(&admin, &summary.id, true).await.unwrap();
        assert!(admin.list_channels().await.unwrap().is_empty());
    }
}
