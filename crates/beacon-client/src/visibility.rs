//! Foreground/background signal.
//!
//! The embedding application owns the sender and flips it when it moves to
//! the background; the monitor pauses pings and staleness checks while it
//! reads `Background`.

use std::fmt;

use tokio::sync::watch;

/// Whether the client is in the foreground.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Visible; heartbeats run.
    #[default]
    Foreground,
    /// Hidden; heartbeats are paused but the connection stays open.
    Background,
}

impl Visibility {
    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signal starting in `Foreground`.
pub fn visibility_channel() -> (watch::Sender<Visibility>, watch::Receiver<Visibility>) {
    watch::channel(Visibility::Foreground)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_foreground() {
        let (_tx, rx) = visibility_channel();
        assert_eq!(*rx.borrow(), Visibility::Foreground);
        assert_eq!(Visibility::Background.to_string(), "background");
    }
}
