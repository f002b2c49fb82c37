//! Test fixtures for the jukebox bot
//! Ids, callers and tracks shared by the integration tests

use fake::Fake;
use fake::faker::lorem::en::Words;
use futures::StreamExt;
use jukebox::{CallerContext, MusicError, MusicResult, Track, TrackStream};
use serenity::model::id::{ChannelId, GuildId, UserId};

pub const GUILD: GuildId = GuildId::new(100);
pub const OTHER_GUILD: GuildId = GuildId::new(200);
pub const ROOM: ChannelId = ChannelId::new(10);
pub const OTHER_ROOM: ChannelId = ChannelId::new(11);
pub const TEXT: ChannelId = ChannelId::new(20);
pub const USER: UserId = UserId::new(30);

/// A caller sitting in `ROOM`, where the bot may connect and speak.
pub fn caller() -> CallerContext {
    CallerContext {
        guild_id: GUILD,
        user_id: USER,
        text_channel: TEXT,
        voice_channel: Some(ROOM),
        can_join: true,
    }
}

pub fn caller_in(room: ChannelId) -> CallerContext {
    CallerContext {
        voice_channel: Some(room),
        ..caller()
    }
}

pub fn caller_without_voice() -> CallerContext {
    CallerContext {
        voice_channel: None,
        ..caller()
    }
}

/// A track with a random title; `id` is what the tests compare on.
pub fn track(id: &str) -> Track {
    let words: Vec<String> = Words(2..5).fake();

    Track {
        id: id.to_string(),
        title: words.join(" "),
        url: format!("https://www.youtube.com/watch?v={}", id),
        author: Some("Lofi Girl".to_string()),
        author_url: None,
        duration_secs: (60..600).fake(),
        thumbnail: None,
        published: None,
        views: Some((1_000..1_000_000).fake()),
    }
}

pub fn tracks(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| track(id)).collect()
}

/// A playlist where entries named `"!"` fail to resolve.
pub fn playlist(ids: &[&str]) -> TrackStream {
    let items: Vec<MusicResult<Track>> = ids
        .iter()
        .map(|id| match *id {
            "!" => Err(MusicError::NotFound("video unavailable".to_string())),
            id => Ok(track(id)),
        })
        .collect();

    futures::stream::iter(items).boxed()
}

pub fn ids(tracks: &[Track]) -> Vec<&str> {
    tracks.iter().map(|track| track.id.as_str()).collect()
}
