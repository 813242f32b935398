//! OTA sender state machine.
//!
//! Drives a parsed distribution toward the mainboard one flow-gated
//! frame at a time:
//!
//! ```text
//! FileInfo -> PackageInfo -> CryptoInfo -> BinaryData ...
//!                  ^                            |
//!                  +------- next package -------+
//! ```
//!
//! Every frame waits for the flow gate first. A gate timeout or a
//! `Restart` status throws the machine back to `FileInfo` and the
//! whole distribution goes out again; the outer session deadline
//! bounds how long that can repeat. After the last data frame the
//! sender waits briefly for the mainboard's `Success` verdict.

use crate::error::{Error, Result};
use crate::image::dist::Distribution;
use crate::ota::policy::{BundlingPolicy, TransportClass};
use crate::ota::session::OtaSession;
use crate::ota::signals::OtaSignals;
use crate::protocol::frame::{BinaryKind, FirmwareVersion, MAX_BINARY_CHUNK, OtaMessage, OtaStatus};
use crate::transport::Transport;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Tuning knobs of one send operation.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Flow-gate wait per frame.
    pub gate_timeout: Duration,
    /// Flow-gate wait per frame for config-kind distributions, which
    /// the mainboard commits to flash as it acks.
    pub config_gate_timeout: Duration,
    /// Overall session deadline covering all restarts.
    pub session_timeout: Duration,
    /// Wait for the final verdict after the last data frame.
    pub verdict_timeout: Duration,
    /// Release version announced in the file-info frame.
    pub release: FirmwareVersion,
    /// Firmware version the mainboard peer is currently running.
    pub peer_version: FirmwareVersion,
    /// How frames reach the mainboard.
    pub transport_class: TransportClass,
    /// Force frame bundling regardless of the peer version.
    pub always_bundle: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            gate_timeout: Duration::from_millis(200),
            config_gate_timeout: Duration::from_millis(2000),
            session_timeout: Duration::from_secs(17),
            verdict_timeout: Duration::from_millis(500),
            release: FirmwareVersion::new(0, 0),
            peer_version: FirmwareVersion::new(0, 0),
            transport_class: TransportClass::Mesh,
            always_bundle: false,
        }
    }
}

/// Position of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    /// Announce the distribution.
    FileInfo,
    /// Announce the current package.
    PackageInfo,
    /// Send the current package's crypto block.
    CryptoInfo,
    /// Stream the current package's payload.
    BinaryData,
}

/// Sends one distribution over a [`Transport`].
pub struct OtaSender<'a, T: Transport> {
    transport: &'a mut T,
    signals: Arc<OtaSignals>,
    config: SenderConfig,
}

impl<'a, T: Transport> OtaSender<'a, T> {
    /// Create a sender over `transport`, reacting to `signals`.
    pub fn new(transport: &'a mut T, signals: Arc<OtaSignals>, config: SenderConfig) -> Self {
        Self {
            transport,
            signals,
            config,
        }
    }

    /// Send the whole distribution and wait for the verdict.
    pub fn send(&mut self, dist: &Distribution<'_>) -> Result<()> {
        self.send_with_progress(dist, |_| {})
    }

    /// Like [`Self::send`], reporting cumulative payload bytes sent
    /// after every data frame. Restarts report from zero again.
    pub fn send_with_progress(
        &mut self,
        dist: &Distribution<'_>,
        mut progress: impl FnMut(u64),
    ) -> Result<()> {
        let target_kind = dist.packages[0].header.kind;
        let policy = BundlingPolicy::derive(
            target_kind,
            self.config.peer_version,
            self.config.transport_class,
            self.config.always_bundle,
        );
        let gate_timeout = self.gate_timeout(target_kind);

        let mut session = OtaSession::new(self.config.session_timeout);
        session.begin(u32::try_from(dist.total_payload()).unwrap_or(u32::MAX));
        self.signals.begin_send();

        info!(
            "sending {} ({} packages, {} bytes) over {}",
            dist.file_header.serial_str(),
            dist.packages.len(),
            dist.total_payload(),
            self.transport.name()
        );

        let mut state = SendState::FileInfo;
        let mut pkg_index = 0;
        let mut payload_pos = 0;
        // 1-based data-frame counter within the current package.
        let mut frame_index = 0u32;
        let mut sent = 0u64;

        loop {
            if session.timed_out() {
                session.reset();
                return Err(Error::SaveTimeout);
            }

            if !self.signals.gate.acquire(gate_timeout) {
                if self.signals.link_error() {
                    session.reset();
                    return Err(Error::Link);
                }
                warn!("flow gate timed out in {state:?}, restarting transfer");
                state = SendState::FileInfo;
                // Reset re-arms the gate so the retry is not stuck
                // behind the ack that never came.
                self.signals.gate.release();
                continue;
            }

            if self.signals.link_error() {
                session.reset();
                return Err(Error::Link);
            }

            if self.signals.take_restart() && state != SendState::FileInfo {
                debug!("restart requested in {state:?}");
                state = SendState::FileInfo;
            }

            match state {
                SendState::FileInfo => {
                    pkg_index = 0;
                    sent = 0;
                    progress(sent);
                    self.transmit(&OtaMessage::FileHeaderInfo {
                        release: self.config.release,
                        count: dist.file_header.binary_count,
                    })?;
                    state = SendState::PackageInfo;
                },
                SendState::PackageInfo => {
                    self.transmit(&OtaMessage::PackageHeaderInfo(
                        dist.packages[pkg_index].header,
                    ))?;
                    state = SendState::CryptoInfo;
                },
                SendState::CryptoInfo => {
                    self.transmit(&OtaMessage::CryptoInfo(dist.packages[pkg_index].crypto))?;
                    payload_pos = 0;
                    frame_index = 0;
                    state = SendState::BinaryData;
                },
                SendState::BinaryData => {
                    let payload = dist.payload(&dist.packages[pkg_index]);
                    let end = (payload_pos + MAX_BINARY_CHUNK).min(payload.len());
                    let chunk = &payload[payload_pos..end];
                    self.transmit(&OtaMessage::BinaryData(chunk.to_vec()))?;
                    payload_pos = end;
                    frame_index += 1;
                    sent += chunk.len() as u64;
                    progress(sent);

                    if payload_pos == payload.len() {
                        debug!(
                            "package {}/{} complete ({frame_index} data frames)",
                            pkg_index + 1,
                            dist.packages.len()
                        );
                        pkg_index += 1;
                        if pkg_index == dist.packages.len() {
                            break;
                        }
                        state = SendState::PackageInfo;
                    } else if policy.may_self_release(frame_index, self.signals.bundled()) {
                        thread::sleep(policy.pause(frame_index, self.signals.bundle_delay()));
                        self.signals.count_bundled();
                        self.signals.gate.release();
                    }
                },
            }
        }

        session.mark_done();
        match self.signals.mailbox.try_take(self.config.verdict_timeout) {
            Some(OtaStatus::Success) => {
                session.mark_validated();
                info!("mainboard accepted the distribution");
                Ok(())
            },
            verdict => {
                warn!("no success verdict (got {verdict:?})");
                session.reset();
                Err(Error::Save)
            },
        }
    }

    /// Config distributions are committed to flash as they are acked,
    /// so they get the long gate timeout for the whole session.
    fn gate_timeout(&self, kind: BinaryKind) -> Duration {
        if kind.is_config() {
            self.config.config_gate_timeout
        } else {
            self.config.gate_timeout
        }
    }

    fn transmit(&mut self, message: &OtaMessage) -> Result<()> {
        self.transport.transmit(&message.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::dist::test_support::build_distribution;
    use crate::protocol::frame::OtaStatus;

    const SERIAL: &[u8; 9] = b"GW0000001";

    /// Decodes every transmitted frame and hands it to a hook that
    /// plays the mainboard, then records it for assertions.
    struct MockTransport {
        frames: Vec<OtaMessage>,
        hook: Box<dyn FnMut(&OtaMessage) + Send>,
    }

    impl MockTransport {
        fn new(hook: impl FnMut(&OtaMessage) + Send + 'static) -> Self {
            Self {
                frames: Vec::new(),
                hook: Box::new(hook),
            }
        }

        fn data_frames(&self) -> usize {
            self.frames
                .iter()
                .filter(|m| matches!(m, OtaMessage::BinaryData(_)))
                .count()
        }

        fn file_info_frames(&self) -> usize {
            self.frames
                .iter()
                .filter(|m| matches!(m, OtaMessage::FileHeaderInfo { .. }))
                .count()
        }
    }

    impl Transport for MockTransport {
        fn transmit(&mut self, frame: &[u8]) -> Result<()> {
            let msg = OtaMessage::decode(frame).expect("sender emitted an invalid frame");
            (self.hook)(&msg);
            self.frames.push(msg);
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn test_config() -> SenderConfig {
        SenderConfig {
            gate_timeout: Duration::from_millis(50),
            config_gate_timeout: Duration::from_millis(500),
            session_timeout: Duration::from_secs(5),
            verdict_timeout: Duration::from_millis(100),
            release: FirmwareVersion::new(3, 0),
            // Fast peer: bundling off unless a test forces it.
            peer_version: FirmwareVersion::new(2, 5),
            ..SenderConfig::default()
        }
    }

    /// Mainboard stand-in that acks everything and reports success
    /// once it has seen `expected_payload` data bytes.
    fn acking_mainboard(
        signals: &Arc<OtaSignals>,
        expected_payload: usize,
    ) -> impl FnMut(&OtaMessage) + Send {
        let signals = Arc::clone(signals);
        let mut received = 0;
        move |msg| {
            if let OtaMessage::BinaryData(data) = msg {
                received += data.len();
                if received == expected_payload {
                    signals.mailbox.post(OtaStatus::Success);
                }
            }
            signals.notify_ack(false);
        }
    }

    #[test]
    fn test_happy_path_frame_sequence() {
        let payload = vec![0xA5; 300];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let mut transport = MockTransport::new(acking_mainboard(&signals, 300));
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), test_config());
        sender.send(&dist).unwrap();

        // 3 control frames + ceil(300 / 128) data frames.
        assert_eq!(transport.frames.len(), 6);
        assert_eq!(
            transport.frames[0],
            OtaMessage::FileHeaderInfo {
                release: FirmwareVersion::new(3, 0),
                count: 1
            }
        );
        assert!(matches!(transport.frames[1], OtaMessage::PackageHeaderInfo(_)));
        assert!(matches!(transport.frames[2], OtaMessage::CryptoInfo(_)));
        assert!(matches!(&transport.frames[3], OtaMessage::BinaryData(d) if d.len() == 128));
        assert!(matches!(&transport.frames[4], OtaMessage::BinaryData(d) if d.len() == 128));
        assert!(matches!(&transport.frames[5], OtaMessage::BinaryData(d) if d.len() == 44));
    }

    #[test]
    fn test_multi_package_order() {
        let first = vec![0x11; 130];
        let second = vec![0x22; 40];
        let buf = build_distribution(
            SERIAL,
            &[(BinaryKind::CnMcu, &first), (BinaryKind::DrMcu, &second)],
        );
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let mut transport = MockTransport::new(acking_mainboard(&signals, 170));
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), test_config());
        sender.send(&dist).unwrap();

        use crate::protocol::frame::OtaCommand::*;
        let commands: Vec<_> = transport.frames.iter().map(OtaMessage::command).collect();
        assert_eq!(
            commands,
            vec![
                FileHeaderInfo,
                PackageHeaderInfo,
                CryptoInfo,
                BinaryData,
                BinaryData,
                PackageHeaderInfo,
                CryptoInfo,
                BinaryData,
            ]
        );
    }

    #[test]
    fn test_restart_resends_from_file_info() {
        let payload = vec![0x42; 200];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let hook = {
            let signals = Arc::clone(&signals);
            let mut received = 0;
            let mut restarted = false;
            move |msg: &OtaMessage| {
                if let OtaMessage::BinaryData(data) = msg {
                    // Ask for a restart exactly once, mid-payload.
                    if !restarted {
                        restarted = true;
                        signals.notify_restart();
                        return;
                    }
                    received += data.len();
                    if received == 200 {
                        signals.mailbox.post(OtaStatus::Success);
                    }
                }
                signals.notify_ack(false);
            }
        };
        let mut transport = MockTransport::new(hook);
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), test_config());
        sender.send(&dist).unwrap();

        // The restart threw the machine back to the announcement.
        assert_eq!(transport.file_info_frames(), 2);
        // First run got one data frame out, second run all two.
        assert_eq!(transport.data_frames(), 3);
    }

    #[test]
    fn test_gate_timeout_restarts_until_session_deadline() {
        let payload = vec![0x42; 64];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        // Mainboard is silent: no acks at all.
        let mut transport = MockTransport::new(|_: &OtaMessage| {});
        let config = SenderConfig {
            gate_timeout: Duration::from_millis(5),
            session_timeout: Duration::from_millis(60),
            ..test_config()
        };
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), config);
        let err = sender.send(&dist).unwrap_err();
        assert!(matches!(err, Error::SaveTimeout));

        // Each gate timeout re-announced the distribution.
        assert!(transport.file_info_frames() >= 2);
        assert_eq!(transport.data_frames(), 0);
    }

    #[test]
    fn test_missing_verdict_is_save_failure() {
        let payload = vec![0x42; 32];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let hook = {
            let signals = Arc::clone(&signals);
            // Acks everything but never reports success.
            move |_: &OtaMessage| signals.notify_ack(false)
        };
        let mut transport = MockTransport::new(hook);
        let config = SenderConfig {
            verdict_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), config);
        assert!(matches!(sender.send(&dist).unwrap_err(), Error::Save));
    }

    #[test]
    fn test_error_verdict_is_save_failure() {
        let payload = vec![0x42; 32];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let hook = {
            let signals = Arc::clone(&signals);
            let mut received = 0;
            move |msg: &OtaMessage| {
                if let OtaMessage::BinaryData(data) = msg {
                    received += data.len();
                    if received == 32 {
                        signals.mailbox.post(OtaStatus::Error);
                    }
                }
                signals.notify_ack(false);
            }
        };
        let mut transport = MockTransport::new(hook);
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), test_config());
        assert!(matches!(sender.send(&dist).unwrap_err(), Error::Save));
    }

    #[test]
    fn test_link_error_aborts() {
        let payload = vec![0x42; 32];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let hook = {
            let signals = Arc::clone(&signals);
            move |msg: &OtaMessage| {
                if matches!(msg, OtaMessage::PackageHeaderInfo(_)) {
                    signals.report_link_error();
                } else {
                    signals.notify_ack(false);
                }
            }
        };
        let mut transport = MockTransport::new(hook);
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), test_config());
        assert!(matches!(sender.send(&dist).unwrap_err(), Error::Link));
    }

    #[test]
    fn test_bundling_self_releases_at_most_six_frames() {
        // 12 full chunks so the transfer outlives the bundling window.
        let payload = vec![0x42; 128 * 12];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let hook = {
            let signals = Arc::clone(&signals);
            let mut announcements = 0;
            let mut data_seen = 0u32;
            let mut received = 0;
            move |msg: &OtaMessage| {
                match msg {
                    OtaMessage::FileHeaderInfo { .. } => {
                        announcements += 1;
                        data_seen = 0;
                        received = 0;
                        signals.notify_ack(true);
                    },
                    OtaMessage::BinaryData(data) => {
                        data_seen += 1;
                        // First run: go silent after data frame 4 and
                        // let bundling carry the burst. Second run:
                        // behave.
                        if announcements > 1 || data_seen <= 4 {
                            received += data.len();
                            if received == 128 * 12 {
                                signals.mailbox.post(OtaStatus::Success);
                            }
                            signals.notify_ack(false);
                        }
                    },
                    _ => signals.notify_ack(true),
                }
            }
        };
        let mut transport = MockTransport::new(hook);
        let config = SenderConfig {
            // Slow peer over the mesh: bundling on.
            peer_version: FirmwareVersion::new(2, 4),
            session_timeout: Duration::from_secs(10),
            ..test_config()
        };
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), config);
        sender.send(&dist).unwrap();

        // The silent stretch was carried by exactly 6 self-released
        // frames (the control-MCU bound), then the gate timed out and
        // the distribution was re-announced.
        assert_eq!(transport.file_info_frames(), 2);
        let second_announce = transport
            .frames
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m, OtaMessage::FileHeaderInfo { .. }))
            .nth(1)
            .unwrap()
            .0;
        let first_run_data = transport.frames[..second_announce]
            .iter()
            .filter(|m| matches!(m, OtaMessage::BinaryData(_)))
            .count();
        // 4 acked frames + 6 bundled ones.
        assert_eq!(first_run_data, 10);
    }

    #[test]
    fn test_bundling_off_on_direct_wired_link() {
        let payload = vec![0x42; 128 * 8];
        let buf = build_distribution(SERIAL, &[(BinaryKind::CnMcu, &payload)]);
        let dist = Distribution::parse(&buf).unwrap();

        let signals = Arc::new(OtaSignals::new());
        let hook = {
            let signals = Arc::clone(&signals);
            let mut data_seen = 0u32;
            move |msg: &OtaMessage| {
                if let OtaMessage::BinaryData(_) = msg {
                    data_seen += 1;
                    // Go silent after 4 data frames, like above.
                    if data_seen > 4 {
                        return;
                    }
                }
                signals.notify_ack(false);
            }
        };
        let mut transport = MockTransport::new(hook);
        let config = SenderConfig {
            peer_version: FirmwareVersion::new(2, 4),
            transport_class: TransportClass::DirectWired,
            gate_timeout: Duration::from_millis(5),
            session_timeout: Duration::from_millis(80),
            ..test_config()
        };
        let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), config);
        assert!(matches!(sender.send(&dist).unwrap_err(), Error::SaveTimeout));

        // No self-releases: the run stalled right after the silence.
        let data_before_reannounce = transport
            .frames
            .iter()
            .skip(1)
            .take_while(|m| !matches!(m, OtaMessage::FileHeaderInfo { .. }))
            .filter(|m| matches!(m, OtaMessage::BinaryData(_)))
            .count();
        assert_eq!(data_before_reannounce, 5);
    }
}
