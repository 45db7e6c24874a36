//! Derived indicators computed from per-ring aggregates rather than
//! aggregated directly from raw samples (§4.5 step 5).
//!
//! Every formula here returns `None` rather than a default or sentinel when
//! a divisor is zero or a required input is missing, per §4.5's explicit
//! instruction and (P8)'s boundary behavior ("divisor of zero ... result
//! null, not NaN, not 0").

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use ringcore_config::AlignerConfig;
use ringcore_model::IndicatorStats;

/// Computes `specific_energy`, `ground_loss_rate`, and `volume_loss_ratio`
/// for one ring, keyed by indicator name for [`RingSummary::derived_indicators`](ringcore_model::RingSummary::derived_indicators).
pub fn compute(
    config: &AlignerConfig,
    aggregate_indicators: &BTreeMap<String, IndicatorStats>,
    mean_torque: Option<f64>,
    revolutions: Option<f64>,
    advance_distance: Option<f64>,
    settlement_value: Option<f64>,
) -> BTreeMap<String, Option<f64>> {
    let mut derived = BTreeMap::new();

    let _ = derived.insert(
        "specific_energy".to_string(),
        specific_energy(mean_torque, revolutions, advance_distance, config.specific_energy.cross_section_area),
    );

    if let Some(ground_loss) = &config.ground_loss {
        let grout_volume = aggregate_indicators.get(&ground_loss.grout_volume_indicator).and_then(|stats| stats.mean);
        let _ = derived.insert("volume_loss_ratio".to_string(), volume_loss_ratio(grout_volume, ground_loss.theoretical_volume_per_ring));
        let _ = derived.insert(
            "ground_loss_rate".to_string(),
            ground_loss_rate(settlement_value, ground_loss.settlement_area_factor, ground_loss.theoretical_volume_per_ring),
        );
    }

    derived
}

/// `specific_energy = (mean_torque * 2π * revolutions) / (advance_distance * cross_section_area)`.
fn specific_energy(mean_torque: Option<f64>, revolutions: Option<f64>, advance_distance: Option<f64>, cross_section_area: f64) -> Option<f64> {
    let mean_torque = mean_torque?;
    let revolutions = revolutions?;
    let advance_distance = advance_distance?;
    let divisor = advance_distance * cross_section_area;
    if divisor == 0.0 {
        return None;
    }
    Some((mean_torque * TAU * revolutions) / divisor)
}

/// `volume_loss_ratio = (theoretical_volume_per_ring - actual_grout_volume) / theoretical_volume_per_ring`:
/// the fraction of the theoretical excavated volume not accounted for by
/// grout injection.
fn volume_loss_ratio(grout_volume: Option<f64>, theoretical_volume_per_ring: f64) -> Option<f64> {
    let grout_volume = grout_volume?;
    if theoretical_volume_per_ring == 0.0 {
        return None;
    }
    Some((theoretical_volume_per_ring - grout_volume) / theoretical_volume_per_ring)
}

/// `ground_loss_rate = (settlement_value * settlement_area_factor) / theoretical_volume_per_ring`:
/// an estimated ground-loss volume, derived from the settlement reading,
/// expressed as a fraction of the ring's theoretical volume.
fn ground_loss_rate(settlement_value: Option<f64>, settlement_area_factor: f64, theoretical_volume_per_ring: f64) -> Option<f64> {
    let settlement_value = settlement_value?;
    if theoretical_volume_per_ring == 0.0 {
        return None;
    }
    Some((settlement_value * settlement_area_factor) / theoretical_volume_per_ring)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn specific_energy_zero_divisor_is_null() {
        assert_eq!(specific_energy(Some(100.0), Some(10.0), Some(0.0), 50.0), None);
        assert_eq!(specific_energy(Some(100.0), Some(10.0), Some(5.0), 0.0), None);
    }

    #[test]
    fn specific_energy_missing_input_is_null() {
        assert_eq!(specific_energy(None, Some(10.0), Some(5.0), 50.0), None);
    }

    #[test]
    fn specific_energy_matches_hand_computation() {
        let got = specific_energy(Some(300.0), Some(2.0), Some(1.2), 50.0).unwrap();
        let expected = (300.0 * TAU * 2.0) / (1.2 * 50.0);
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn volume_loss_ratio_zero_theoretical_volume_is_null() {
        assert_eq!(volume_loss_ratio(Some(10.0), 0.0), None);
    }

    #[test]
    fn ground_loss_rate_missing_settlement_is_null() {
        assert_eq!(ground_loss_rate(None, 0.01, 100.0), None);
    }
}
