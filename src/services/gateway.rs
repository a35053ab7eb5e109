//! Discord gateway adapter.
//!
//! Converts serenity's gateway payloads into the typed events in
//! `services::events` and posts replies back to the channel. Nothing from
//! serenity crosses into the rest of the crate.

use std::num::NonZeroU16;
use std::sync::Arc;

use serenity::all::{
    Context, EventHandler, GatewayIntents, Guild, GuildId, Member, Message, PartialGuild, Ready,
    UnavailableGuild, UserId,
};
use serenity::async_trait;
use serenity::gateway::ShardManager;
use serenity::Client;
use tokio::task::JoinHandle;

use crate::services::events::{BotEvents, CommunityChangeEvent, MemberRef, MessageEvent};

pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
}

/// Four-digit legacy discriminator, or empty for accounts that have none.
pub fn format_tag(discriminator: Option<NonZeroU16>) -> String {
    discriminator
        .map(|d| format!("{:04}", d.get()))
        .unwrap_or_default()
}

fn member_ref(member: &Member) -> MemberRef {
    MemberRef {
        id: member.user.id.to_string(),
        name: member.user.name.clone(),
    }
}

fn message_event(msg: &Message) -> MessageEvent {
    MessageEvent {
        author_id: msg.author.id.to_string(),
        author_name: msg.author.name.clone(),
        author_tag: format_tag(msg.author.discriminator),
        community_id: msg.guild_id.map(|id| id.to_string()),
        content: msg.content.clone(),
        is_bot: msg.author.bot,
    }
}

pub struct GatewayHandler {
    events: BotEvents,
}

impl GatewayHandler {
    pub fn new(events: BotEvents) -> Self {
        Self { events }
    }

    async fn community_changed(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        owner_id: UserId,
        mut members: Vec<MemberRef>,
    ) {
        // Large guilds arrive without a full member list
        let owner = owner_id.to_string();
        if !members.iter().any(|m| m.id == owner) {
            match guild_id.member(ctx, owner_id).await {
                Ok(member) => members.push(member_ref(&member)),
                Err(e) => {
                    tracing::warn!("Failed to fetch owner of guild {}: {}", guild_id, e);
                }
            }
        }

        let event = CommunityChangeEvent {
            community_id: guild_id.to_string(),
            members,
            owner_id: owner,
        };

        if let Err(e) = self.events.on_community_change(&event).await {
            tracing::error!("Failed to save guild {}: {}", guild_id, e);
        }
    }
}

#[async_trait]
impl EventHandler for GatewayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(
            "Discord gateway connected as {} ({} guilds)",
            ready.user.name,
            ready.guilds.len()
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let event = message_event(&msg);
        let Some(reply) = self.events.on_message(&event).await else {
            return;
        };

        if let Err(e) = msg.channel_id.say(&ctx, reply).await {
            tracing::warn!("Failed to reply in channel {}: {}", msg.channel_id, e);
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let members = guild.members.values().map(member_ref).collect();
        self.community_changed(&ctx, guild.id, guild.owner_id, members)
            .await;
    }

    async fn guild_update(&self, ctx: Context, _old: Option<Guild>, guild: PartialGuild) {
        self.community_changed(&ctx, guild.id, guild.owner_id, vec![])
            .await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An outage, not a removal
        if incomplete.unavailable {
            tracing::warn!("Guild {} became unavailable", incomplete.id);
            return;
        }

        if let Err(e) = self
            .events
            .on_community_removed(&incomplete.id.to_string())
            .await
        {
            tracing::error!("Failed to remove guild {}: {}", incomplete.id, e);
        }
    }
}

/// A running gateway connection
pub struct GatewayHandle {
    shard_manager: Arc<ShardManager>,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// Log in and run the gateway client on a background task.
    pub async fn start(token: &str, events: BotEvents) -> anyhow::Result<Self> {
        let mut client = Client::builder(token, intents())
            .event_handler(GatewayHandler::new(events))
            .await?;

        let shard_manager = client.shard_manager.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!("Discord gateway stopped: {}", e);
            }
        });

        Ok(Self {
            shard_manager,
            task,
        })
    }

    pub async fn shutdown(self) {
        self.shard_manager.shutdown_all().await;
        if let Err(e) = self.task.await {
            tracing::warn!("Discord gateway task join failed: {:?}", e);
        }
        tracing::info!("Discord gateway shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_zero_padded() {
        assert_eq!(format_tag(NonZeroU16::new(42)), "0042");
        assert_eq!(format_tag(NonZeroU16::new(1337)), "1337");
        assert_eq!(format_tag(None), "");
    }

    #[test]
    fn intents_include_message_content() {
        let intents = intents();
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(intents.contains(GatewayIntents::GUILD_MEMBERS));
    }
}
