use std::sync::Arc;

use super::AnimationDefinition;

/// One velocity variant of a (channel, note) slot.
#[derive(Debug, Clone)]
pub struct Variant {
    pub threshold: u8,
    pub definition: Arc<AnimationDefinition>,
}

/// Index of the greatest threshold <= `velocity` in an ascending slice, or
/// `None` when the velocity is below the lowest threshold.
pub fn select_index(thresholds: &[u8], velocity: u8) -> Option<usize> {
    select_by(thresholds, velocity, |t| *t)
}

/// Greatest-threshold-at-or-below lookup over any ascending-sorted items.
pub fn select_by<T>(items: &[T], velocity: u8, threshold: impl Fn(&T) -> u8) -> Option<usize> {
    items
        .partition_point(|item| threshold(item) <= velocity)
        .checked_sub(1)
}

/// Pick the variant for `velocity` from variants sorted by threshold.
pub fn select(variants: &[Variant], velocity: u8) -> Option<&Variant> {
    select_by(variants, velocity, |v| v.threshold).map(|i| &variants[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::test_support::rate_def;

    #[test]
    fn thresholds_forty_eighty() {
        let t = [40, 80];
        assert_eq!(select_index(&t, 30), None);
        assert_eq!(select_index(&t, 40), Some(0));
        assert_eq!(select_index(&t, 60), Some(0));
        assert_eq!(select_index(&t, 80), Some(1));
        assert_eq!(select_index(&t, 127), Some(1));
    }

    #[test]
    fn zero_threshold_catches_everything() {
        assert_eq!(select_index(&[0], 0), Some(0));
        assert_eq!(select_index(&[0, 100], 99), Some(0));
    }

    #[test]
    fn empty_set_never_matches() {
        assert_eq!(select_index(&[], 127), None);
    }

    #[test]
    fn select_returns_variant() {
        let variants = vec![
            Variant {
                threshold: 1,
                definition: Arc::new(rate_def(2, 10.0)),
            },
            Variant {
                threshold: 64,
                definition: Arc::new(rate_def(5, 10.0)),
            },
        ];
        assert!(select(&variants, 0).is_none());
        assert_eq!(select(&variants, 63).unwrap().threshold, 1);
        let hard = select(&variants, 100).unwrap();
        assert_eq!(hard.threshold, 64);
        assert_eq!(hard.definition.frame_count(), 5);
    }
}
