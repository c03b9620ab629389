/*
 *  player.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  MPD poller: current song and status, diffed into a change mask per poll
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

/// Separator used when a tag appears more than once
const TAG_SEPARATOR: &str = " - ";

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("MPD error: {0}")]
    Mpd(#[from] mpd::error::Error),

    #[error("Not connected to MPD")]
    NotConnected,

    #[error("Player protocol error: {0}")]
    Protocol(String),
}

/// Which parts of the snapshot moved since the previous poll
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Changed(u8);

impl Changed {
    pub const NONE: Changed = Changed(0);
    pub const ARTIST: Changed = Changed(0x01);
    pub const ALBUM: Changed = Changed(0x02);
    pub const TITLE: Changed = Changed(0x04);
    pub const ELAPSED: Changed = Changed(0x08);
    pub const TOTAL: Changed = Changed(0x10);
    pub const STATUS: Changed = Changed(0x20);
    pub const ALL: Changed = Changed(0x3f);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when any flag of `mask` is set
    pub fn intersects(self, mask: Changed) -> bool {
        self.0 & mask.0 != 0
    }
}

impl BitOr for Changed {
    type Output = Changed;
    fn bitor(self, rhs: Changed) -> Changed {
        Changed(self.0 | rhs.0)
    }
}

impl BitOrAssign for Changed {
    fn bitor_assign(&mut self, rhs: Changed) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Changed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Changed, &str); 6] = [
            (Changed::ARTIST, "ARTIST"),
            (Changed::ALBUM, "ALBUM"),
            (Changed::TITLE, "TITLE"),
            (Changed::ELAPSED, "ELAPSED"),
            (Changed::TOTAL, "TOTAL"),
            (Changed::STATUS, "STATUS"),
        ];
        let mut first = true;
        write!(f, "Changed(")?;
        for (flag, name) in NAMES {
            if self.intersects(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayStatus {
    #[default]
    NoSong,
    Stopped,
    Playing,
    Paused,
}

/// What the player reported on one poll
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackState {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub elapsed: u32,
    pub total: u32,
    pub status: PlayStatus,
}

impl TrackState {
    /// Fields of `next` that differ from `self`
    pub fn diff(&self, next: &TrackState) -> Changed {
        let mut changed = Changed::NONE;
        if self.artist != next.artist {
            changed |= Changed::ARTIST;
        }
        if self.album != next.album {
            changed |= Changed::ALBUM;
        }
        if self.title != next.title {
            changed |= Changed::TITLE;
        }
        if self.elapsed != next.elapsed {
            changed |= Changed::ELAPSED;
        }
        if self.total != next.total {
            changed |= Changed::TOTAL;
        }
        if self.status != next.status {
            changed |= Changed::STATUS;
        }
        changed
    }
}

/// Immutable view of one poll: the track state plus its change mask
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerSnapshot {
    track: TrackState,
    changed: Changed,
}

impl PlayerSnapshot {
    pub fn new(track: TrackState, changed: Changed) -> Self {
        Self { track, changed }
    }

    pub fn artist(&self) -> &str {
        &self.track.artist
    }

    pub fn album(&self) -> &str {
        &self.track.album
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }

    pub fn elapsed(&self) -> u32 {
        self.track.elapsed
    }

    pub fn total(&self) -> u32 {
        self.track.total
    }

    pub fn play_status(&self) -> PlayStatus {
        self.track.status
    }

    pub fn track(&self) -> &TrackState {
        &self.track
    }

    pub fn change_mask(&self) -> Changed {
        self.changed
    }

    /// True when any field in `mask` changed on this poll
    pub fn changed(&self, mask: Changed) -> bool {
        self.changed.intersects(mask)
    }
}

/// Something that can be asked what is playing
pub trait PlayerSource {
    fn reconnect(&mut self) -> Result<(), PlayerError>;
    fn fetch(&mut self) -> Result<TrackState, PlayerError>;
    fn toggle_pause(&mut self) -> Result<(), PlayerError>;
}

/// MPD over TCP
pub struct MpdSource {
    address: String,
    client: Option<mpd::Client>,
}

impl MpdSource {
    /// Does not connect; the first poll does
    pub fn new(host: &str, port: u16) -> Self {
        Self { address: format!("{}:{}", host, port), client: None }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn client(&mut self) -> Result<&mut mpd::Client, PlayerError> {
        self.client.as_mut().ok_or(PlayerError::NotConnected)
    }

    /// Connection is dropped on any protocol failure
    fn guard<T>(&mut self, result: Result<T, mpd::error::Error>) -> Result<T, PlayerError> {
        result.map_err(|e| {
            self.client = None;
            PlayerError::Mpd(e)
        })
    }
}

/// Every value of `key`, joined
fn joined_tag(tags: &[(String, String)], key: &str) -> Option<String> {
    let values: Vec<&str> = tags.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect();
    if values.is_empty() { None } else { Some(values.join(TAG_SEPARATOR)) }
}

impl PlayerSource for MpdSource {
    fn reconnect(&mut self) -> Result<(), PlayerError> {
        self.client = None;
        let client = mpd::Client::connect(self.address.as_str())?;
        info!("Connected to MPD at {}", self.address);
        self.client = Some(client);
        Ok(())
    }

    fn fetch(&mut self) -> Result<TrackState, PlayerError> {
        let status = {
            let result = self.client()?.status();
            self.guard(result)?
        };
        let song = {
            let result = self.client()?.currentsong();
            self.guard(result)?
        };

        let Some(song) = song else {
            return Ok(TrackState::default());
        };

        let status_of = match status.state {
            mpd::State::Stop => PlayStatus::Stopped,
            mpd::State::Play => PlayStatus::Playing,
            mpd::State::Pause => PlayStatus::Paused,
        };
        let artist = joined_tag(&song.tags, "Artist").or(song.artist).unwrap_or_default();
        let album = joined_tag(&song.tags, "Album").unwrap_or_default();
        let total = status.duration.or(song.duration).map(|d| d.as_secs() as u32).unwrap_or(0);

        Ok(TrackState {
            artist,
            album,
            title: song.title.unwrap_or_default(),
            elapsed: status.elapsed.map(|d| d.as_secs() as u32).unwrap_or(0),
            total,
            status: status_of,
        })
    }

    fn toggle_pause(&mut self) -> Result<(), PlayerError> {
        let result = self.client()?.toggle_pause();
        self.guard(result)
    }
}

/// Polls a source and keeps the latest snapshot
///
/// A failed poll keeps the previous track state with an empty change mask
/// and schedules a reconnect after the fixed delay. Attempts never stop.
pub struct PlayerPoller<S: PlayerSource> {
    source: S,
    snapshot: PlayerSnapshot,
    connected: bool,
    reconnect_delay: Duration,
    next_attempt: Option<Instant>,
}

impl<S: PlayerSource> PlayerPoller<S> {
    pub fn new(source: S, reconnect_delay: Duration) -> Self {
        Self {
            source,
            snapshot: PlayerSnapshot::default(),
            connected: false,
            reconnect_delay,
            next_attempt: None,
        }
    }

    pub fn snapshot(&self) -> &PlayerSnapshot {
        &self.snapshot
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn poll(&mut self) -> &PlayerSnapshot {
        self.poll_at(Instant::now())
    }

    /// `poll` with an explicit clock
    pub fn poll_at(&mut self, now: Instant) -> &PlayerSnapshot {
        self.snapshot.changed = Changed::NONE;

        if !self.connected {
            if self.next_attempt.is_some_and(|at| now < at) {
                return &self.snapshot;
            }
            if let Err(e) = self.source.reconnect() {
                warn!("MPD connect failed: {}, retry in {:?}", e, self.reconnect_delay);
                self.next_attempt = Some(now + self.reconnect_delay);
                return &self.snapshot;
            }
            self.connected = true;
            self.next_attempt = None;
        }

        match self.source.fetch() {
            Ok(track) => {
                let changed = self.snapshot.track.diff(&track);
                if !changed.is_empty() {
                    debug!("Player {:?}", changed);
                }
                self.snapshot = PlayerSnapshot { track, changed };
            }
            Err(e) => {
                warn!("MPD poll failed: {}, reconnecting in {:?}", e, self.reconnect_delay);
                self.connected = false;
                self.next_attempt = Some(now + self.reconnect_delay);
            }
        }
        &self.snapshot
    }

    /// Play/pause; the change shows up on the next poll
    pub fn toggle_pause(&mut self) -> Result<(), PlayerError> {
        if !self.connected {
            return Err(PlayerError::NotConnected);
        }
        self.source.toggle_pause().inspect_err(|_| {
            self.connected = false;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Plays back canned answers
    #[derive(Default)]
    struct ScriptedSource {
        connects: VecDeque<Result<(), PlayerError>>,
        fetches: VecDeque<Result<TrackState, PlayerError>>,
        connect_calls: usize,
        toggles: usize,
    }

    impl PlayerSource for ScriptedSource {
        fn reconnect(&mut self) -> Result<(), PlayerError> {
            self.connect_calls += 1;
            self.connects.pop_front().unwrap_or(Ok(()))
        }

        fn fetch(&mut self) -> Result<TrackState, PlayerError> {
            self.fetches
                .pop_front()
                .unwrap_or_else(|| Err(PlayerError::Protocol("script exhausted".into())))
        }

        fn toggle_pause(&mut self) -> Result<(), PlayerError> {
            self.toggles += 1;
            Ok(())
        }
    }

    fn track(artist: &str, album: &str, title: &str, elapsed: u32, total: u32, status: PlayStatus) -> TrackState {
        TrackState {
            artist: artist.into(),
            album: album.into(),
            title: title.into(),
            elapsed,
            total,
            status,
        }
    }

    #[test]
    fn test_changed_flags() {
        let mask = Changed::ARTIST | Changed::TITLE;
        assert_eq!(mask.bits(), 0x05);
        assert!(mask.intersects(Changed::TITLE));
        assert!(!mask.intersects(Changed::ALBUM | Changed::STATUS));
        assert!(Changed::NONE.is_empty());
        assert_eq!(format!("{:?}", mask), "Changed(ARTIST|TITLE)");
    }

    #[test]
    fn test_diff_reports_only_moved_fields() {
        let a = track("Low", "Things We Lost in the Fire", "Sunflower", 10, 200, PlayStatus::Playing);
        let mut b = a.clone();
        assert!(a.diff(&b).is_empty());

        b.elapsed = 11;
        b.title = "Whitetail".into();
        assert_eq!(a.diff(&b), Changed::ELAPSED | Changed::TITLE);
    }

    #[test]
    fn test_first_poll_diffs_against_empty() {
        let mut source = ScriptedSource::default();
        source.fetches.push_back(Ok(track("Low", "", "Sunflower", 0, 0, PlayStatus::Stopped)));
        let mut poller = PlayerPoller::new(source, DEFAULT_RECONNECT_DELAY);

        let snapshot = poller.poll_at(Instant::now());
        assert_eq!(snapshot.change_mask(), Changed::ARTIST | Changed::TITLE | Changed::STATUS);
        assert!(poller.is_connected());
    }

    #[test]
    fn test_failed_poll_keeps_snapshot_with_empty_mask() {
        let playing = track("Low", "Secret Name", "Starfire", 30, 240, PlayStatus::Playing);
        let mut source = ScriptedSource::default();
        source.fetches.push_back(Ok(playing.clone()));
        source.fetches.push_back(Err(PlayerError::Protocol("connection reset".into())));
        let mut poller = PlayerPoller::new(source, DEFAULT_RECONNECT_DELAY);

        let start = Instant::now();
        poller.poll_at(start);
        let snapshot = poller.poll_at(start + Duration::from_secs(1));
        assert_eq!(snapshot.track(), &playing);
        assert!(snapshot.change_mask().is_empty());
        assert!(!poller.is_connected());
    }

    #[test]
    fn test_reconnect_waits_for_the_delay() {
        let mut source = ScriptedSource::default();
        source.fetches.push_back(Err(PlayerError::Protocol("gone".into())));
        source.fetches.push_back(Ok(track("Low", "C'mon", "Try to Sleep", 1, 180, PlayStatus::Playing)));
        let mut poller = PlayerPoller::new(source, Duration::from_secs(5));

        let start = Instant::now();
        poller.poll_at(start);
        assert_eq!(poller.source().connect_calls, 1);

        // inside the delay nothing is attempted
        poller.poll_at(start + Duration::from_secs(1));
        poller.poll_at(start + Duration::from_secs(4));
        assert_eq!(poller.source().connect_calls, 1);

        let snapshot = poller.poll_at(start + Duration::from_secs(5));
        assert!(snapshot.changed(Changed::TITLE));
        assert_eq!(poller.source().connect_calls, 2);
    }

    #[test]
    fn test_connect_failures_retry_forever() {
        let mut source = ScriptedSource::default();
        for _ in 0..3 {
            source.connects.push_back(Err(PlayerError::NotConnected));
        }
        source.fetches.push_back(Ok(track("Low", "", "", 0, 0, PlayStatus::Stopped)));
        let mut poller = PlayerPoller::new(source, Duration::from_secs(5));

        let start = Instant::now();
        for i in 0..4u64 {
            poller.poll_at(start + Duration::from_secs(5 * i));
        }
        assert_eq!(poller.source().connect_calls, 4);
        assert!(poller.is_connected());
        assert_eq!(poller.snapshot().artist(), "Low");
    }

    #[test]
    fn test_toggle_pause_needs_connection() {
        let mut source = ScriptedSource::default();
        source.fetches.push_back(Ok(TrackState::default()));
        let mut poller = PlayerPoller::new(source, DEFAULT_RECONNECT_DELAY);

        assert!(matches!(poller.toggle_pause(), Err(PlayerError::NotConnected)));
        poller.poll_at(Instant::now());
        poller.toggle_pause().unwrap();
        assert_eq!(poller.source().toggles, 1);
    }

    #[test]
    fn test_joined_tags() {
        let tags = vec![
            ("Album".to_string(), "Disc One".to_string()),
            ("Genre".to_string(), "Slowcore".to_string()),
            ("Album".to_string(), "Disc Two".to_string()),
        ];
        assert_eq!(joined_tag(&tags, "Album").as_deref(), Some("Disc One - Disc Two"));
        assert_eq!(joined_tag(&tags, "Genre").as_deref(), Some("Slowcore"));
        assert_eq!(joined_tag(&tags, "Artist"), None);
    }

    #[test]
    fn test_mpd_source_starts_disconnected() {
        let mut source = MpdSource::new("localhost", 6600);
        assert_eq!(source.address(), "localhost:6600");
        assert!(matches!(source.fetch(), Err(PlayerError::NotConnected)));
    }
}
