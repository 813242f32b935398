//! Frame-bundling policy.
//!
//! Older mainboard firmware revisions ack data frames slowly enough to
//! dominate transfer time, so for those peers the sender releases its
//! own flow gate a bounded number of times between real acks, pacing
//! the burst with short pauses. Newer peers and direct-wired links ack
//! fast; bundling stays off for them.

use crate::protocol::frame::{BinaryKind, FirmwareVersion};
use log::debug;
use std::time::Duration;

/// Newest peer major release that still needs bundling.
const BUNDLE_PEER_MAJOR: u8 = 2;

/// First minor release of [`BUNDLE_PEER_MAJOR`] with fast acks.
const BUNDLE_PEER_MINOR: u8 = 5;

/// Pause between self-released frames toward a driver MCU.
const DRIVER_PAUSE: Duration = Duration::from_millis(20);

/// Extra pause that lets the peer's watchdog breathe on long control
/// transfers.
const WATCHDOG_PAUSE: Duration = Duration::from_millis(20);

/// Data-frame count past which the watchdog pause kicks in.
const WATCHDOG_START: u32 = 300;

/// Watchdog pause interval in data frames.
const WATCHDOG_INTERVAL: u32 = 350;

/// How frames reach the mainboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportClass {
    /// Frames hop through the mesh radio network.
    Mesh,
    /// Frames go over a direct wired link.
    DirectWired,
}

/// Per-target bundling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Profile {
    /// Data-frame index after which self-release is allowed.
    start_after: u32,
    /// Most frames in flight without an external ack.
    max_unacked: u32,
    /// Fixed inter-frame pause, or `None` for the ack-steered delay.
    fixed_pause: Option<Duration>,
}

impl Profile {
    const DRIVER: Self = Self {
        start_after: 4,
        max_unacked: 5,
        fixed_pause: Some(DRIVER_PAUSE),
    };

    const CONTROL: Self = Self {
        start_after: 3,
        max_unacked: 6,
        fixed_pause: None,
    };
}

/// Bundling decision for one send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundlingPolicy {
    profile: Option<Profile>,
}

impl BundlingPolicy {
    /// Policy that never self-releases.
    pub const DISABLED: Self = Self { profile: None };

    /// Derive the policy for a transfer of `kind` binaries toward a
    /// peer running `peer_version` over `transport`.
    ///
    /// `always_bundle` forces bundling on regardless of the peer
    /// version; a direct-wired link forces it off regardless of
    /// everything else.
    pub fn derive(
        kind: BinaryKind,
        peer_version: FirmwareVersion,
        transport: TransportClass,
        always_bundle: bool,
    ) -> Self {
        if transport == TransportClass::DirectWired {
            return Self::DISABLED;
        }
        let slow_peer = peer_version.major == BUNDLE_PEER_MAJOR
            && peer_version.minor < BUNDLE_PEER_MINOR;
        if !(always_bundle || slow_peer) {
            return Self::DISABLED;
        }
        let profile = match kind {
            BinaryKind::DrMcu => Some(Profile::DRIVER),
            BinaryKind::CnMcu => Some(Profile::CONTROL),
            _ => None,
        };
        if profile.is_some() {
            debug!("bundling enabled for {kind} (peer {peer_version})");
        }
        Self { profile }
    }

    /// Whether this policy ever self-releases.
    pub fn enabled(&self) -> bool {
        self.profile.is_some()
    }

    /// Whether the gate may be self-released after data frame
    /// `frame_index` (1-based) with `bundled` frames already sent
    /// since the last external ack.
    pub fn may_self_release(&self, frame_index: u32, bundled: u32) -> bool {
        match self.profile {
            Some(profile) => frame_index > profile.start_after && bundled < profile.max_unacked,
            None => false,
        }
    }

    /// Pause to observe before the self-released frame goes out.
    ///
    /// `ack_delay` is the current ack-steered delay for targets
    /// without a fixed pause.
    pub fn pause(&self, frame_index: u32, ack_delay: Duration) -> Duration {
        match self.profile {
            Some(Profile {
                fixed_pause: Some(pause),
                ..
            }) => pause,
            Some(_) => {
                if frame_index > WATCHDOG_START && frame_index % WATCHDOG_INTERVAL == 0 {
                    WATCHDOG_PAUSE
                } else {
                    ack_delay
                }
            },
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOW_PEER: FirmwareVersion = FirmwareVersion {
        major: 2,
        minor: 4,
        ci: 0,
        branch_id: 0,
    };
    const FAST_PEER: FirmwareVersion = FirmwareVersion {
        major: 2,
        minor: 5,
        ci: 0,
        branch_id: 0,
    };

    #[test]
    fn test_disabled_for_fast_peer() {
        let policy =
            BundlingPolicy::derive(BinaryKind::CnMcu, FAST_PEER, TransportClass::Mesh, false);
        assert!(!policy.enabled());
        assert!(!policy.may_self_release(100, 0));
    }

    #[test]
    fn test_disabled_on_direct_wired_even_when_forced() {
        let policy = BundlingPolicy::derive(
            BinaryKind::DrMcu,
            SLOW_PEER,
            TransportClass::DirectWired,
            true,
        );
        assert!(!policy.enabled());
    }

    #[test]
    fn test_always_bundle_overrides_peer_version() {
        let policy =
            BundlingPolicy::derive(BinaryKind::DrMcu, FAST_PEER, TransportClass::Mesh, true);
        assert!(policy.enabled());
    }

    #[test]
    fn test_driver_window_and_bound() {
        let policy =
            BundlingPolicy::derive(BinaryKind::DrMcu, SLOW_PEER, TransportClass::Mesh, false);
        // Not before frame 5.
        assert!(!policy.may_self_release(4, 0));
        assert!(policy.may_self_release(5, 0));
        // At most 5 unacked self-releases.
        assert!(policy.may_self_release(10, 4));
        assert!(!policy.may_self_release(10, 5));
        assert_eq!(
            policy.pause(10, Duration::from_micros(16_000)),
            DRIVER_PAUSE
        );
    }

    #[test]
    fn test_control_window_and_bound() {
        let policy =
            BundlingPolicy::derive(BinaryKind::CnMcu, SLOW_PEER, TransportClass::Mesh, false);
        assert!(!policy.may_self_release(3, 0));
        assert!(policy.may_self_release(4, 0));
        assert!(policy.may_self_release(10, 5));
        assert!(!policy.may_self_release(10, 6));
    }

    #[test]
    fn test_control_pause_follows_ack_delay() {
        let policy =
            BundlingPolicy::derive(BinaryKind::CnMcu, SLOW_PEER, TransportClass::Mesh, false);
        let steered = Duration::from_micros(12_000);
        assert_eq!(policy.pause(10, steered), steered);
        // Watchdog pause every 350 frames once past 300.
        assert_eq!(policy.pause(350, steered), WATCHDOG_PAUSE);
        assert_eq!(policy.pause(700, steered), WATCHDOG_PAUSE);
        assert_eq!(policy.pause(351, steered), steered);
    }

    #[test]
    fn test_no_profile_for_other_kinds() {
        let policy =
            BundlingPolicy::derive(BinaryKind::Config, SLOW_PEER, TransportClass::Mesh, false);
        assert!(!policy.enabled());
        assert_eq!(policy.pause(10, Duration::from_millis(16)), Duration::ZERO);
    }
}
