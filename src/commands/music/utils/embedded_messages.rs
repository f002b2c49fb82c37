use poise::serenity_prelude::CreateEmbed;
use std::time::Duration;
use thousands::Separable;

use super::format_duration;
use super::music_manager::{ErrorKind, MusicError, NowPlaying, PlaybackNotice};
use super::queue_store::QueueSnapshot;
use crate::commands::music::audio_sources::track_metadata::Track;
use crate::commands::music::interpreter::CommandOutcome;

const SUCCESS: u32 = 0x00ff00;
const FAILURE: u32 = 0xff0000;
const WARNING: u32 = 0xffa500;

/// How many upcoming tracks the queue embed lists before summarizing the rest.
const QUEUE_DISPLAY_LIMIT: usize = 25;

/// Discord rejects embed descriptions longer than this.
const DESCRIPTION_LIMIT: usize = 4096;

/// Room kept after the listing for the "more" and total duration lines.
const QUEUE_FOOTER_RESERVE: usize = 128;

/// Create a progress bar for the current track
fn format_progress_bar(position: Duration, total: Duration) -> String {
    const BAR_LENGTH: usize = 15;
    let progress = if total.as_secs() == 0 {
        0.0
    } else {
        (position.as_secs_f64() / total.as_secs_f64()).min(1.0)
    };

    let filled = (progress * BAR_LENGTH as f64).round() as usize;
    let empty = BAR_LENGTH - filled;

    format!("▬{}🔘{}▬", "▬".repeat(filled), "▬".repeat(empty))
}

fn track_link(track: &Track) -> String {
    format!("[{}]({})", track.title, track.url)
}

fn duration_label(track: &Track) -> String {
    if track.duration_secs == 0 {
        "Live".to_string()
    } else {
        format_duration(track.duration())
    }
}

/// Embed describing one track, used for now playing and added to queue.
fn track_embed(title: &str, track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(title)
        .description(track_link(track))
        .field("Duration", format!("`{}`", duration_label(track)), true)
        .color(SUCCESS);

    if let Some(author) = &track.author {
        let author = match &track.author_url {
            Some(url) => format!("[{}]({})", author, url),
            None => author.clone(),
        };
        embed = embed.field("Channel", author, true);
    }
    if let Some(views) = track.views {
        embed = embed.field("Views", views.separate_with_commas(), true);
    }
    if let Some(published) = track.published {
        embed = embed.field("Published", published.format("%Y-%m-%d").to_string(), true);
    }
    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
}

fn simple(title: &str, description: impl Into<String>) -> CreateEmbed {
    CreateEmbed::new()
        .title(title)
        .description(description)
        .color(SUCCESS)
}

/// Renders the result of a successful command.
pub fn outcome(outcome: &CommandOutcome) -> CreateEmbed {
    match outcome {
        CommandOutcome::Started { track } => track_embed("🎵 Now Playing", track),
        CommandOutcome::Queued { track, position } => track_embed("🎵 Added to Queue", track)
            .field("Position", format!("`#{}`", position), true),
        CommandOutcome::PlaylistStarted { first } => {
            track_embed("🎵 Now Playing", first).footer(playlist_footer())
        }
        CommandOutcome::PlaylistQueued { first, position } => {
            track_embed("🎵 Added Playlist to Queue", first)
                .field("Position", format!("`#{}`", position), true)
                .footer(playlist_footer())
        }
        CommandOutcome::Stopped => simple("⏹️ Stopped", "Playback stopped and queue cleared"),
        CommandOutcome::NowPlaying(now) => now_playing(now),
        CommandOutcome::Skipped(skip) => simple(
            "⏭️ Skipped",
            format!(
                "Skipped {}\nUp next: {}",
                track_link(&skip.skipped),
                track_link(&skip.next)
            ),
        ),
        CommandOutcome::QueueListing(queue) => CreateEmbed::new()
            .title("🎵 Music Queue")
            .description(queue_description(queue))
            .color(SUCCESS),
        CommandOutcome::VolumeChanged(change) => simple(
            "🔊 Volume",
            format!("Volume changed from `{}%` to `{}%`", change.previous, change.current),
        ),
        CommandOutcome::Paused(track) => {
            simple("⏸️ Paused", format!("Paused {}", track_link(track)))
        }
        CommandOutcome::Resumed(track) => {
            simple("▶️ Resumed", format!("Resumed {}", track_link(track)))
        }
        CommandOutcome::Removed { track, position } => simple(
            "🗑️ Track Removed",
            format!("Removed {} from position #{}", track_link(track), position),
        ),
        CommandOutcome::Help { prefix } => simple("📖 Commands", help_text(prefix)),
    }
}

fn playlist_footer() -> poise::serenity_prelude::CreateEmbedFooter {
    poise::serenity_prelude::CreateEmbedFooter::new(
        "The rest of the playlist is being added in the background",
    )
}

fn now_playing(now: &NowPlaying) -> CreateEmbed {
    let title = if now.playing {
        "🎵 Now Playing"
    } else {
        "⏸️ Paused"
    };

    let mut description = track_link(&now.track);
    if let Some(position) = now.position {
        description.push('\n');
        description.push_str(&progress_line(position, &now.track));
    }

    CreateEmbed::new()
        .title(title)
        .description(description)
        .field("Volume", format!("`{}%`", now.volume), true)
        .field("Up next", format!("`{}` tracks", now.upcoming), true)
        .color(SUCCESS)
}

fn progress_line(position: Duration, track: &Track) -> String {
    if track.duration_secs == 0 {
        return format!("`{}` (live)", format_duration(position));
    }

    format!(
        "{} `{}/{}`",
        format_progress_bar(position, track.duration()),
        format_duration(position),
        format_duration(track.duration())
    )
}

/// Text of the queue embed: the current track, then numbered upcoming tracks.
fn queue_description(queue: &QueueSnapshot) -> String {
    let mut description = String::new();

    match queue.now_playing() {
        Some(track) => {
            let state = if queue.playing {
                "🎵 Now Playing"
            } else {
                "⏸️ Paused"
            };
            description.push_str(&format!(
                "**{}**\n{} `{}`\n\n",
                state,
                track_link(track),
                duration_label(track)
            ));
        }
        None => description.push_str("**🔇 Nothing playing**\n\n"),
    }

    let upcoming = queue.tracks.len().saturating_sub(1);
    if upcoming == 0 {
        description.push_str("**📭 Queue is empty**");
        return description;
    }

    description.push_str(&format!("**📋 Queue - {} tracks**\n", upcoming));
    let mut shown = 0;
    for (index, track) in queue.upcoming().take(QUEUE_DISPLAY_LIMIT) {
        let line = format!(
            "`{}.` {} `{}`\n",
            index,
            track_link(track),
            duration_label(track)
        );
        if description.len() + line.len() + QUEUE_FOOTER_RESERVE > DESCRIPTION_LIMIT {
            break;
        }
        description.push_str(&line);
        shown += 1;
    }
    if upcoming > shown {
        description.push_str(&format!("…and {} more\n", upcoming - shown));
    }

    let total: Duration = queue.upcoming().map(|(_, track)| track.duration()).sum();
    if total.as_secs() > 0 {
        description.push_str(&format!(
            "\n**⏱️ Total Duration:** `{}`",
            format_duration(total)
        ));
    }

    description
}

fn help_text(prefix: &str) -> String {
    [
        ("play <search | link | playlist>", "Play a track or add it to the queue"),
        ("stop", "Stop playback, clear the queue and leave"),
        ("nowplaying", "Show the current track"),
        ("skip", "Skip to the next track"),
        ("queue", "List the queue"),
        ("volume <0-100>", "Change the volume"),
        ("pause", "Pause playback"),
        ("resume", "Resume playback"),
        ("remove <position>", "Remove a track from the queue"),
    ]
    .iter()
    .map(|(usage, about)| format!("`{}{}` {}", prefix, usage, about))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Renders a failed command.
pub fn error(err: &MusicError) -> CreateEmbed {
    let (title, color) = match err.kind() {
        ErrorKind::Validation | ErrorKind::Precondition => ("⚠️ Can't do that", WARNING),
        ErrorKind::Resolution => ("🔍 Nothing to play", FAILURE),
        ErrorKind::Transport | ErrorKind::Internal => ("❌ Error", FAILURE),
    };

    CreateEmbed::new()
        .title(title)
        .description(err.to_string())
        .color(color)
}

/// Renders something that happened to a queue outside any command.
pub fn notice(notice: &PlaybackNotice) -> CreateEmbed {
    match notice {
        PlaybackNotice::NowPlaying { track, .. } => track_embed("🎵 Now Playing", track),
        PlaybackNotice::TrackFailed { track, reason, .. } => CreateEmbed::new()
            .title("❌ Track Failed")
            .description(format!("Couldn't play {}: {}", track_link(track), reason))
            .color(FAILURE),
        PlaybackNotice::QueueFinished { .. } => {
            simple("👋 Queue Finished", "Nothing left to play, see you next time")
        }
        PlaybackNotice::PlaylistLoaded { added, failed, .. } => {
            let mut description = format!("Added `{}` more tracks from the playlist", added);
            if *failed > 0 {
                description.push_str(&format!(", `{}` couldn't be loaded", failed));
            }
            simple("📋 Playlist Loaded", description)
        }
    }
}
