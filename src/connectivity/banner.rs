use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::Status;

/// How long "Back online" stays up
pub const BANNER_HIDE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerMessage {
    Offline,
    BackOnline,
}

impl fmt::Display for BannerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BannerMessage::Offline => f.write_str("No internet connection"),
            BannerMessage::BackOnline => f.write_str("Back online"),
        }
    }
}

/// Online/offline banner state.
///
/// Being online at startup shows nothing. Going offline shows
/// [`BannerMessage::Offline`] until the connection returns; coming back
/// shows [`BannerMessage::BackOnline`], which hides itself after
/// [`BANNER_HIDE_DELAY`]. `Losing` never changes the banner.
#[derive(Debug)]
pub struct Banner {
    seen_status: bool,
    visible: Option<BannerMessage>,
    hide_at: Option<Instant>,
}

impl Banner {
    /// Banner for the status observed at startup.
    pub fn new(initial: Status) -> Self {
        let visible = match initial {
            Status::Unavailable | Status::Lost => Some(BannerMessage::Offline),
            Status::Available | Status::Losing => None,
        };
        Self {
            seen_status: false,
            visible,
            hide_at: None,
        }
    }

    pub fn visible(&self) -> Option<BannerMessage> {
        self.visible
    }

    /// When a pending auto-hide fires, if one is scheduled
    pub fn hide_at(&self) -> Option<Instant> {
        self.hide_at
    }

    /// Apply a status change. Returns the message to show when the banner
    /// text changes.
    pub fn observe(&mut self, status: Status, now: Instant) -> Option<BannerMessage> {
        let first = !self.seen_status;
        self.seen_status = true;

        match status {
            Status::Available => {
                // The first Available is the subscription's initial report;
                // it only counts as a recovery if we were showing offline.
                if first && self.visible != Some(BannerMessage::Offline) {
                    return None;
                }
                self.hide_at = Some(now + BANNER_HIDE_DELAY);
                self.show(BannerMessage::BackOnline)
            }
            Status::Unavailable | Status::Lost => {
                self.hide_at = None;
                self.show(BannerMessage::Offline)
            }
            Status::Losing => None,
        }
    }

    /// Hide the banner if its auto-hide time has passed. Returns true when
    /// it was hidden by this call.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.hide_at {
            Some(deadline) if now >= deadline => {
                self.hide_at = None;
                self.visible = None;
                true
            }
            _ => false,
        }
    }

    fn show(&mut self, message: BannerMessage) -> Option<BannerMessage> {
        if self.visible == Some(message) {
            return None;
        }
        self.visible = Some(message);
        Some(message)
    }
}
