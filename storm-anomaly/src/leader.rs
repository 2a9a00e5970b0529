use storm_core::{FeatureView, LeaderState};

const BASIS: &str = "basis_now";
const PREMIUM_TWAP_LONG: &str = "premium_TWAP_120m";
const PREMIUM_TWAP_SHORT: &str = "premium_TWAP_60m";
const CVD_SPOT: &str = "cvd_spot_15m";
const CVD_PERP: &str = "cvd_perp_15m";
const PERP_SHARE_DELTA: &str = "dperp_share_60m";

/// The signed inputs of one leadership vote. `None` abstains.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeaderIndicators {
    pub basis: Option<f64>,
    pub premium_twap_long: Option<f64>,
    pub premium_twap_short: Option<f64>,
    pub cvd_spot: Option<f64>,
    pub cvd_perp: Option<f64>,
    pub perp_share_delta: Option<f64>,
}

impl LeaderIndicators {
    pub fn from_row(row: &FeatureView<'_>) -> Self {
        Self {
            basis: row.get(BASIS),
            premium_twap_long: row.get(PREMIUM_TWAP_LONG),
            premium_twap_short: row.get(PREMIUM_TWAP_SHORT),
            cvd_spot: row.get(CVD_SPOT),
            cvd_perp: row.get(CVD_PERP),
            perp_share_delta: row.get(PERP_SHARE_DELTA),
        }
    }

    pub fn votes(&self) -> i32 {
        let up_or_down = |positive: bool| if positive { 1 } else { -1 };

        let basis = self.basis.map_or(0, |b| up_or_down(b > 0.0));

        let premium = match (self.premium_twap_long, self.premium_twap_short) {
            (Some(long), Some(short)) => up_or_down(long - short > 0.0),
            _ => 0,
        };

        // spot buying ahead of perp points at spot leadership
        let flow = match (self.cvd_spot, self.cvd_perp) {
            (Some(spot), Some(perp)) => -up_or_down(spot - perp > 0.0),
            _ => 0,
        };

        let share = self.perp_share_delta.map_or(0, |d| up_or_down(d > 0.0));

        basis + premium + flow + share
    }
}

/// Stateless vote over basis, premium slope, flow imbalance and perp volume
/// share.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaderStateClassifier;

impl LeaderStateClassifier {
    pub fn classify_row(row: &FeatureView<'_>) -> LeaderState {
        Self::classify(&LeaderIndicators::from_row(row))
    }

    pub fn classify(indicators: &LeaderIndicators) -> LeaderState {
        Self::from_votes(indicators.votes())
    }

    pub fn from_votes(votes: i32) -> LeaderState {
        match votes {
            v if v >= 2 => LeaderState::PerpLed,
            v if v <= -2 => LeaderState::SpotLed,
            0 => LeaderState::Confluence,
            _ => LeaderState::Divergence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use storm_core::{FeatureFrame, FeatureRow, TimeSeries};

    #[test]
    fn test_all_missing_is_confluence() {
        let indicators = LeaderIndicators::default();
        assert_eq!(indicators.votes(), 0);
        assert_eq!(LeaderStateClassifier::classify(&indicators), LeaderState::Confluence);
    }

    #[test]
    fn test_vote_thresholds() {
        assert_eq!(LeaderStateClassifier::from_votes(4), LeaderState::PerpLed);
        assert_eq!(LeaderStateClassifier::from_votes(2), LeaderState::PerpLed);
        assert_eq!(LeaderStateClassifier::from_votes(1), LeaderState::Divergence);
        assert_eq!(LeaderStateClassifier::from_votes(0), LeaderState::Confluence);
        assert_eq!(LeaderStateClassifier::from_votes(-1), LeaderState::Divergence);
        assert_eq!(LeaderStateClassifier::from_votes(-2), LeaderState::SpotLed);
        assert_eq!(LeaderStateClassifier::from_votes(-4), LeaderState::SpotLed);
    }

    #[test]
    fn test_every_indicator_combination_is_classified() {
        let options = [None, Some(-1.0), Some(0.0), Some(1.0)];
        let valid = [
            LeaderState::PerpLed,
            LeaderState::SpotLed,
            LeaderState::Divergence,
            LeaderState::Confluence,
        ];

        for basis in options {
            for long in options {
                for short in options {
                    for spot in options {
                        for perp in options {
                            for share in options {
                                let indicators = LeaderIndicators {
                                    basis,
                                    premium_twap_long: long,
                                    premium_twap_short: short,
                                    cvd_spot: spot,
                                    cvd_perp: perp,
                                    perp_share_delta: share,
                                };
                                let votes = indicators.votes();
                                assert!((-4..=4).contains(&votes));
                                assert!(valid.contains(&LeaderStateClassifier::classify(&indicators)));
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_perp_led_vote() {
        let indicators = LeaderIndicators {
            basis: Some(0.002),
            premium_twap_long: Some(0.3),
            premium_twap_short: Some(0.1),
            cvd_spot: Some(-50.0),
            cvd_perp: Some(120.0),
            perp_share_delta: Some(0.01),
        };
        assert_eq!(indicators.votes(), 4);
        assert_eq!(LeaderStateClassifier::classify(&indicators), LeaderState::PerpLed);
    }

    #[test]
    fn test_flow_vote_is_inverted() {
        let spot_heavy = LeaderIndicators {
            cvd_spot: Some(200.0),
            cvd_perp: Some(10.0),
            ..Default::default()
        };
        assert_eq!(spot_heavy.votes(), -1);

        // a lone premium leg abstains
        let half_premium = LeaderIndicators {
            premium_twap_long: Some(1.0),
            ..Default::default()
        };
        assert_eq!(half_premium.votes(), 0);
    }

    #[test]
    fn test_non_positive_basis_votes_down() {
        let flat = LeaderIndicators {
            basis: Some(0.0),
            perp_share_delta: Some(-0.2),
            ..Default::default()
        };
        assert_eq!(LeaderStateClassifier::classify(&flat), LeaderState::SpotLed);
    }

    #[test]
    fn test_classify_row_reads_named_fields() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = TimeSeries::new(
            vec![t0],
            vec![FeatureRow::new(vec![Some(0.01), Some(f64::NAN), Some(0.5)])],
        )
        .unwrap();
        let frame = FeatureFrame::new(
            vec![BASIS.into(), PREMIUM_TWAP_LONG.into(), PERP_SHARE_DELTA.into()],
            rows,
        )
        .unwrap();

        assert_eq!(LeaderStateClassifier::classify_row(&frame.row(0)), LeaderState::PerpLed);
    }
}
