use serde::{Deserialize, Serialize};

/// Lifecycle of a SeedLink connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    /// Handshake and selectors accepted
    Subscribed,
    Streaming {
        packets: u64,
    },
    InfoRequest,
}

impl SessionState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Disconnected, Connecting) |

            (Connecting, Subscribed) |
            (Connecting, Disconnected) |

            (Subscribed, Streaming { .. }) |
            (Subscribed, InfoRequest) |
            (Subscribed, Disconnected) |

            // packet counter updates
            (Streaming { .. }, Streaming { .. }) |
            (Streaming { .. }, Disconnected) |

            (InfoRequest, Disconnected)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Subscribed => "Subscribed",
            Self::Streaming { .. } => "Streaming",
            Self::InfoRequest => "InfoRequest",
        }
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }
}
