use poise::serenity_prelude as serenity;
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jukebox::commands::music::{self, audio_sources::youtube::YoutubeApi};
use jukebox::commands::music::utils::songbird_transport::SongbirdTransport;
use jukebox::config::BotConfig;
use jukebox::{CommandInterpreter, Data, Error, MusicManager, events};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize logging with debug level for our crate
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jukebox=debug,warn")),
        )
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true)
        .with_ansi(true)
        .pretty()
        .init();

    let config = BotConfig::from_env()?;
    info!("Using command prefix {}", config.prefix);

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    // Songbird's input wants a 'static program name; config lives for the whole run anyway
    let ytdlp: &'static str = config.ytdlp_path.clone().leak();

    let songbird = Songbird::serenity();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    let transport = SongbirdTransport::new(Arc::clone(&songbird), ytdlp, event_tx);
    let music_manager = MusicManager::new(Arc::new(transport), notice_tx);
    music_manager.spawn_event_loop(event_rx);

    let resolver = YoutubeApi::new(ytdlp);
    let interpreter = Arc::new(CommandInterpreter::new(
        Arc::clone(&music_manager),
        Arc::new(resolver),
        config.prefix.clone(),
    ));

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |_ctx, ready, _framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                Ok(Data {
                    interpreter,
                    music_manager,
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(config.discord_token, intents)
        .framework(framework)
        .register_songbird_with(songbird)
        .await?;

    tokio::spawn(music::forward_notices(Arc::clone(&client.http), notice_rx));

    client.start().await.map_err(Into::into)
}
