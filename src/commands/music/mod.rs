//! Music commands: a per-guild playback queue driven by prefix commands in chat.
//!
//! This module is the gateway side. It turns serenity messages into
//! [`CallerContext`]s for the [`interpreter`], and posts rendered outcomes and
//! playback notices back to text channels.

pub mod audio_sources;
pub mod interpreter;
pub mod utils;

use poise::serenity_prelude as serenity;
use serenity::{CreateMessage, Guild, GuildId, Http, Message};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::{Data, Error};
use interpreter::CallerContext;
use utils::embedded_messages;
use utils::music_manager::{MusicError, PlaybackNotice};

/// Runs a chat message through the interpreter and replies with the result.
pub async fn handle_message(
    ctx: &serenity::Context,
    data: &Data,
    message: &Message,
) -> Result<(), Error> {
    if message.author.bot {
        return Ok(());
    }

    let Some(guild_id) = message.guild_id else {
        if message
            .content
            .trim_start()
            .starts_with(data.interpreter.prefix())
        {
            let embed = embedded_messages::error(&MusicError::NotInGuild);
            message
                .channel_id
                .send_message(&ctx.http, CreateMessage::new().embed(embed))
                .await?;
        }
        return Ok(());
    };

    let caller = caller_context(ctx, guild_id, message);
    let Some(result) = data
        .interpreter
        .handle_message(&caller, &message.content)
        .await
    else {
        return Ok(());
    };

    let embed = match &result {
        Ok(outcome) => embedded_messages::outcome(outcome),
        Err(e) => {
            info!(
                "Command from user {} in guild {} failed: {}",
                caller.user_id, guild_id, e
            );
            embedded_messages::error(e)
        }
    };

    message
        .channel_id
        .send_message(
            &ctx.http,
            CreateMessage::new().embed(embed).reference_message(message),
        )
        .await?;

    Ok(())
}

/// Reads the caller's voice channel and the bot's permissions there from the cache.
fn caller_context(ctx: &serenity::Context, guild_id: GuildId, message: &Message) -> CallerContext {
    let bot_id = ctx.cache.current_user().id;

    let (voice_channel, can_join) = match guild_id.to_guild_cached(&ctx.cache) {
        Some(guild) => {
            let voice_channel = guild
                .voice_states
                .get(&message.author.id)
                .and_then(|state| state.channel_id);
            let can_join = voice_channel
                .map(|channel_id| bot_can_join(&guild, bot_id, channel_id))
                .unwrap_or(false);
            (voice_channel, can_join)
        }
        None => {
            debug!("Guild {} is not cached", guild_id);
            (None, false)
        }
    };

    CallerContext {
        guild_id,
        user_id: message.author.id,
        text_channel: message.channel_id,
        voice_channel,
        can_join,
    }
}

fn bot_can_join(guild: &Guild, bot_id: serenity::UserId, channel_id: serenity::ChannelId) -> bool {
    let (Some(channel), Some(member)) =
        (guild.channels.get(&channel_id), guild.members.get(&bot_id))
    else {
        return false;
    };

    let permissions = guild.user_permissions_in(channel, member);
    permissions.connect() && permissions.speak()
}

/// Posts playback notices to the text channel each queue was started from.
pub async fn forward_notices(http: Arc<Http>, mut notices: UnboundedReceiver<PlaybackNotice>) {
    while let Some(notice) = notices.recv().await {
        let embed = embedded_messages::notice(&notice);

        if let Err(e) = notice
            .text_channel()
            .send_message(&http, CreateMessage::new().embed(embed))
            .await
        {
            warn!(
                "Failed to post notice for guild {}: {}",
                notice.guild_id(),
                e
            );
        }
    }
    info!("Notice channel closed, stopped forwarding notices");
}
