//! Per-peer bitrate and resolution control
//!
//! ## Bitrate
//! - Congested (`RTT > 0.5 s` or `loss > 5 %`): bitrate × 0.8, floored at the minimum
//! - Otherwise: bitrate × 1.05, capped at the maximum
//!
//! The new bitrate is cached on the peer record before it is applied, so a
//! failed application is simply retried from there on the next tick.
//!
//! ## Resolution
//! A separate ladder of RTT/loss bands picks a downscale tier (1×, 1.5×, 2×, 3×).
//! The downscale is only sent when the tier changes, and only recorded once
//! the engine has accepted it.

use playtogether_core::metrics::QUALITY_ADJUSTMENTS;
use playtogether_core::models::{
    EncodingProfile, EncodingUpdate, PeerId, PeerRecord, ProfileSelection, QualityMode, ResolutionTier,
};
use playtogether_core::service::SessionRegistry;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::engine::{EncoderControl, EngineError, Result};
use crate::stats::NetworkSample;

/// Frame rate used while the loop is in charge.
const AUTO_FRAMERATE_FPS: u32 = 60;

/// One rung of the resolution ladder: entered when either limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderBand {
    pub rtt_secs: f64,
    pub loss_percent: f64,
    pub tier: ResolutionTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionLadder {
    /// Checked in order; the first band exceeded wins.
    bands: Vec<LadderBand>,
}

impl Default for ResolutionLadder {
    fn default() -> Self {
        Self::new(vec![
            LadderBand {
                rtt_secs: 0.5,
                loss_percent: 10.0,
                tier: ResolutionTier::Third,
            },
            LadderBand {
                rtt_secs: 0.3,
                loss_percent: 5.0,
                tier: ResolutionTier::Half,
            },
            LadderBand {
                rtt_secs: 0.15,
                loss_percent: 2.0,
                tier: ResolutionTier::TwoThirds,
            },
        ])
    }
}

impl ResolutionLadder {
    #[must_use]
    pub const fn new(bands: Vec<LadderBand>) -> Self {
        Self { bands }
    }

    #[must_use]
    pub fn select(&self, sample: &NetworkSample) -> ResolutionTier {
        self.bands
            .iter()
            .find(|band| sample.rtt_secs > band.rtt_secs || sample.loss_percent > band.loss_percent)
            .map_or(ResolutionTier::Full, |band| band.tier)
    }
}

/// What one control tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub decreased: usize,
    pub increased: usize,
    pub tier_changes: usize,
    pub failures: usize,
    /// Auto peers with no usable statistics this tick.
    pub skipped: usize,
}

pub struct QualityController {
    config: ControllerConfig,
    ladder: ResolutionLadder,
}

impl QualityController {
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            ladder: ResolutionLadder::default(),
        }
    }

    #[must_use]
    pub fn with_ladder(mut self, ladder: ResolutionLadder) -> Self {
        self.ladder = ladder;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Parameters a peer starts with once media is offered to it.
    #[must_use]
    pub const fn initial_encoding(&self) -> EncodingProfile {
        EncodingProfile {
            max_bitrate_bps: self.config.initial_bitrate_bps,
            max_framerate_fps: AUTO_FRAMERATE_FPS,
            downscale_factor: 1.0,
        }
    }

    #[must_use]
    pub fn is_congested(&self, sample: &NetworkSample) -> bool {
        sample.rtt_secs > self.config.rtt_threshold_secs
            || sample.loss_percent > self.config.loss_threshold_percent
    }

    /// Next bitrate for a peer currently at `current_bps`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn next_bitrate(&self, current_bps: u64, sample: &NetworkSample) -> u64 {
        let (min, max) = (self.config.min_bitrate_bps, self.config.max_bitrate_bps);
        let current = current_bps.clamp(min, max) as f64;
        let factor = if self.is_congested(sample) {
            self.config.decrease_factor
        } else {
            self.config.increase_factor
        };
        ((current * factor).round() as u64).clamp(min, max)
    }

    /// Run one control step over every peer in auto mode.
    ///
    /// `samples` holds this tick's link conditions; peers without one are left alone.
    pub async fn tick(
        &self,
        registry: &mut SessionRegistry,
        samples: &HashMap<PeerId, NetworkSample>,
        encoder: &dyn EncoderControl,
    ) -> TickReport {
        let mut report = TickReport::default();

        for peer_id in registry.peer_ids_where(PeerRecord::is_auto_controlled) {
            let Some(sample) = samples.get(&peer_id) else {
                report.skipped += 1;
                continue;
            };
            let Some((current, framerate, current_tier)) = registry
                .get(&peer_id)
                .map(|r| (r.encoding.max_bitrate_bps, r.encoding.max_framerate_fps, r.resolution_tier))
            else {
                continue;
            };

            let next = self.next_bitrate(current, sample);
            let tier = self.ladder.select(sample);
            registry.update(&peer_id, |record| record.encoding.max_bitrate_bps = next);

            match next.cmp(&current) {
                std::cmp::Ordering::Less => {
                    report.decreased += 1;
                    QUALITY_ADJUSTMENTS.with_label_values(&["decrease"]).inc();
                }
                std::cmp::Ordering::Greater => {
                    report.increased += 1;
                    QUALITY_ADJUSTMENTS.with_label_values(&["increase"]).inc();
                }
                std::cmp::Ordering::Equal => {}
            }

            let tier_changed = tier != current_tier;
            if next == current && !tier_changed {
                continue;
            }

            let update = EncodingUpdate {
                max_bitrate_bps: next,
                max_framerate_fps: framerate,
                downscale_factor: tier_changed.then(|| tier.downscale_factor()),
            };
            match encoder.apply_encoding(&peer_id, update).await {
                Ok(()) => {
                    if tier_changed {
                        registry.update(&peer_id, |record| {
                            record.encoding.downscale_factor = tier.downscale_factor();
                            record.resolution_tier = tier;
                        });
                        report.tier_changes += 1;
                        QUALITY_ADJUSTMENTS.with_label_values(&["tier"]).inc();
                        debug!(peer_id = %peer_id, ?tier, "Resolution tier changed");
                    }
                }
                Err(EngineError::PeerClosed(_)) => {
                    debug!(peer_id = %peer_id, "Peer closed during encoder update");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(peer_id = %peer_id, error = %e, "Encoder update failed, retrying next tick");
                }
            }
        }

        report
    }

    /// Pin a peer to a fixed profile, or hand it back to the loop.
    ///
    /// A fixed profile is applied to the sender first; the cloned, constrained
    /// track is requested only after that succeeds.
    pub async fn select_profile(
        &self,
        registry: &mut SessionRegistry,
        peer_id: &PeerId,
        selection: ProfileSelection,
        encoder: &dyn EncoderControl,
    ) -> Result<()> {
        let mode = match selection {
            ProfileSelection::Auto => QualityMode::Auto,
            ProfileSelection::Fixed(profile) => QualityMode::Manual(profile),
        };
        if !registry.update(peer_id, |record| record.quality_mode = mode) {
            return Err(EngineError::PeerClosed(peer_id.clone()));
        }

        let ProfileSelection::Fixed(profile) = selection else {
            info!(peer_id = %peer_id, "Peer returned to adaptive quality");
            return Ok(());
        };

        let encoding = profile.encoding();
        encoder.apply_encoding(peer_id, encoding.into()).await?;
        registry.update(peer_id, |record| {
            record.encoding = encoding;
            record.resolution_tier = ResolutionTier::Full;
        });
        encoder
            .apply_track_constraints(peer_id, profile.track_constraints())
            .await?;

        QUALITY_ADJUSTMENTS.with_label_values(&["manual"]).inc();
        info!(peer_id = %peer_id, ?profile, "Quality profile pinned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEncoderControl;
    use chrono::Utc;
    use playtogether_core::models::{ApprovalState, QualityProfile};

    fn controller() -> QualityController {
        QualityController::new(ControllerConfig::default())
    }

    fn active(registry: &mut SessionRegistry, id: &str, bitrate: u64) -> PeerId {
        let peer_id = PeerId::from(id);
        let mut record = PeerRecord::new(peer_id.clone(), id, Utc::now());
        record.approval = ApprovalState::Active;
        record.encoding.max_bitrate_bps = bitrate;
        registry.upsert(record);
        peer_id
    }

    #[test]
    fn test_either_condition_decreases() {
        let c = controller();
        assert_eq!(c.next_bitrate(10_000_000, &NetworkSample::new(0.6, 2.0)), 8_000_000);
        assert_eq!(c.next_bitrate(10_000_000, &NetworkSample::new(0.1, 6.0)), 8_000_000);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let c = controller();
        assert!(!c.is_congested(&NetworkSample::new(0.5, 5.0)));
        assert!(c.is_congested(&NetworkSample::new(0.51, 0.0)));
    }

    #[test]
    fn test_decrease_floors_at_minimum() {
        let c = controller();
        assert_eq!(c.next_bitrate(550_000, &NetworkSample::new(1.0, 50.0)), 500_000);
        assert_eq!(c.next_bitrate(500_000, &NetworkSample::new(1.0, 50.0)), 500_000);
    }

    #[test]
    fn test_good_link_increases_monotonically_to_ceiling() {
        let c = controller();
        let good = NetworkSample::new(0.1, 0.5);
        let mut bitrate = 1_000_000;
        for _ in 0..100 {
            let next = c.next_bitrate(bitrate, &good);
            assert!(next >= bitrate);
            assert!(next <= 12_000_000);
            bitrate = next;
        }
        assert_eq!(bitrate, 12_000_000);
    }

    #[test]
    fn test_ladder_bands() {
        let ladder = ResolutionLadder::default();
        assert_eq!(ladder.select(&NetworkSample::new(0.05, 0.0)), ResolutionTier::Full);
        assert_eq!(ladder.select(&NetworkSample::new(0.2, 0.0)), ResolutionTier::TwoThirds);
        assert_eq!(ladder.select(&NetworkSample::new(0.1, 6.0)), ResolutionTier::Half);
        assert_eq!(ladder.select(&NetworkSample::new(0.6, 0.0)), ResolutionTier::Third);
    }

    #[tokio::test]
    async fn test_tick_applies_and_caches() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 10_000_000);
        let samples = HashMap::from([(peer.clone(), NetworkSample::new(0.6, 0.0))]);

        let mut encoder = MockEncoderControl::new();
        encoder
            .expect_apply_encoding()
            .withf(|id, enc| {
                id.as_str() == "w"
                    && enc.max_bitrate_bps == 8_000_000
                    && enc.downscale_factor.is_some_and(|f| (f - 3.0).abs() < f64::EPSILON)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let report = controller().tick(&mut registry, &samples, &encoder).await;
        assert_eq!(report.decreased, 1);
        assert_eq!(report.tier_changes, 1);

        let record = registry.get(&peer).unwrap();
        assert_eq!(record.encoding.max_bitrate_bps, 8_000_000);
        assert_eq!(record.resolution_tier, ResolutionTier::Third);
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_cached_bitrate_and_retries_tier() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 10_000_000);
        let samples = HashMap::from([(peer.clone(), NetworkSample::new(0.6, 0.0))]);

        let mut encoder = MockEncoderControl::new();
        encoder
            .expect_apply_encoding()
            .times(1)
            .returning(|_, _| Err(EngineError::Unavailable("sender busy".to_string())));

        let report = controller().tick(&mut registry, &samples, &encoder).await;
        assert_eq!(report.failures, 1);

        let record = registry.get(&peer).unwrap();
        assert_eq!(record.encoding.max_bitrate_bps, 8_000_000);
        assert_eq!(record.resolution_tier, ResolutionTier::Full);
    }

    #[tokio::test]
    async fn test_tick_skips_manual_and_unsampled_peers() {
        let mut registry = SessionRegistry::new();
        let pinned = active(&mut registry, "pinned", 6_000_000);
        registry.update(&pinned, |r| r.quality_mode = QualityMode::Manual(QualityProfile::Low));
        active(&mut registry, "silent", 6_000_000);
        let samples = HashMap::from([(pinned.clone(), NetworkSample::new(2.0, 90.0))]);

        let mut encoder = MockEncoderControl::new();
        encoder.expect_apply_encoding().never();

        let report = controller().tick(&mut registry, &samples, &encoder).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(registry.get(&pinned).unwrap().encoding.max_bitrate_bps, 6_000_000);
    }

    #[tokio::test]
    async fn test_at_ceiling_with_same_tier_sends_nothing() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 12_000_000);
        let samples = HashMap::from([(peer, NetworkSample::new(0.01, 0.0))]);

        let mut encoder = MockEncoderControl::new();
        encoder.expect_apply_encoding().never();

        let report = controller().tick(&mut registry, &samples, &encoder).await;
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn test_unchanged_tier_sends_bitrate_only() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 10_000_000);
        let samples = HashMap::from([(peer.clone(), NetworkSample::new(0.01, 0.0))]);

        let mut encoder = MockEncoderControl::new();
        encoder
            .expect_apply_encoding()
            .withf(|_, enc| enc.max_bitrate_bps == 10_500_000 && enc.downscale_factor.is_none())
            .times(1)
            .returning(|_, _| Ok(()));

        let report = controller().tick(&mut registry, &samples, &encoder).await;
        assert_eq!(report.increased, 1);
        assert_eq!(report.tier_changes, 0);
        let record = registry.get(&peer).unwrap();
        assert_eq!(record.resolution_tier, ResolutionTier::Full);
        assert!((record.encoding.downscale_factor - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_closed_peer_during_apply_is_noop() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 10_000_000);
        let samples = HashMap::from([(peer.clone(), NetworkSample::new(0.6, 0.0))]);

        let mut encoder = MockEncoderControl::new();
        encoder
            .expect_apply_encoding()
            .returning(|id, _| Err(EngineError::PeerClosed(id.clone())));

        let report = controller().tick(&mut registry, &samples, &encoder).await;
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn test_select_fixed_profile() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 10_000_000);

        let mut encoder = MockEncoderControl::new();
        encoder
            .expect_apply_encoding()
            .withf(|_, enc| enc.max_bitrate_bps == 6_000_000 && enc.max_framerate_fps == 60)
            .times(1)
            .returning(|_, _| Ok(()));
        encoder
            .expect_apply_track_constraints()
            .withf(|_, c| c.width == 1280 && c.height == 720 && c.frame_rate == 60)
            .times(1)
            .returning(|_, _| Ok(()));

        controller()
            .select_profile(&mut registry, &peer, ProfileSelection::Fixed(QualityProfile::Low), &encoder)
            .await
            .unwrap();

        let record = registry.get(&peer).unwrap();
        assert_eq!(record.quality_mode, QualityMode::Manual(QualityProfile::Low));
        assert_eq!(record.encoding, QualityProfile::Low.encoding());
        assert!(!record.is_auto_controlled());
    }

    #[tokio::test]
    async fn test_failed_fixed_profile_skips_track_swap() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 10_000_000);

        let mut encoder = MockEncoderControl::new();
        encoder
            .expect_apply_encoding()
            .returning(|_, _| Err(EngineError::Unavailable("rejected".to_string())));
        encoder.expect_apply_track_constraints().never();

        let result = controller()
            .select_profile(&mut registry, &peer, ProfileSelection::Fixed(QualityProfile::Min), &encoder)
            .await;
        assert!(result.is_err());
        assert_eq!(registry.get(&peer).unwrap().encoding.max_bitrate_bps, 10_000_000);
    }

    #[tokio::test]
    async fn test_select_auto_returns_to_loop() {
        let mut registry = SessionRegistry::new();
        let peer = active(&mut registry, "w", 3_000_000);
        registry.update(&peer, |r| r.quality_mode = QualityMode::Manual(QualityProfile::Min));

        let encoder = MockEncoderControl::new();
        controller()
            .select_profile(&mut registry, &peer, ProfileSelection::Auto, &encoder)
            .await
            .unwrap();
        assert!(registry.get(&peer).unwrap().is_auto_controlled());
    }

    #[tokio::test]
    async fn test_select_for_unknown_peer() {
        let mut registry = SessionRegistry::new();
        let encoder = MockEncoderControl::new();
        let err = controller()
            .select_profile(&mut registry, &PeerId::from("ghost"), ProfileSelection::Auto, &encoder)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::PeerClosed(PeerId::from("ghost")));
    }
}
