use poise::serenity_prelude as serenity;
use serenity::FullEvent;
use tracing::{debug, info};

use crate::commands::music;
use crate::{Data, Error};

/// Gateway events the bot reacts to. Registered with the poise framework.
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!("{} is connected", data_about_bot.user.name);
        }
        FullEvent::Message { new_message } => {
            music::handle_message(ctx, data, new_message).await?;
        }
        FullEvent::VoiceStateUpdate { new, .. } => {
            let bot_id = ctx.cache.current_user().id;

            // Kicked, moved out by a moderator, or the channel was deleted
            if new.user_id == bot_id && new.channel_id.is_none() {
                if let Some(guild_id) = new.guild_id {
                    debug!("Bot left voice in guild {}", guild_id);
                    data.music_manager.handle_disconnect(guild_id).await;
                }
            }
        }
        _ => {}
    }

    Ok(())
}
