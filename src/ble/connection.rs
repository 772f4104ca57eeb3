//! Session connection states.

/// Where a session is in its connect handshake.
///
/// A session walks `Disconnected -> Connecting -> Authenticating ->
/// Subscribing -> Ready` and falls back to `Disconnected` on any failure
/// or link loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No link to the machine.
    #[default]
    Disconnected,
    /// Scanning, connecting or discovering characteristics.
    Connecting,
    /// Writing the pairing token.
    Authenticating,
    /// Enabling notifications.
    Subscribing,
    /// Authenticated and subscribed; commands are accepted.
    Ready,
}

impl SessionState {
    /// Check if commands can be issued.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the handshake is under way.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::Subscribing
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}
