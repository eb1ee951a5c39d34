use super::{even_positions, sort_along_dominant_axis, Representative, StrategyKind, SummarizationStrategy};

/// Evenly spaced picks through the axis-ordered set, ignoring intensity.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformStriding;

impl SummarizationStrategy for UniformStriding {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UniformStriding
    }

    fn reduce(&self, mut points: Vec<Representative>, target: usize) -> Vec<Representative> {
        if points.len() <= target {
            return points;
        }
        if target == 0 {
            return Vec::new();
        }

        sort_along_dominant_axis(&mut points);
        even_positions(points.len(), target)
            .map(|pos| points[pos])
            .collect()
    }

    fn needs_payload(&self) -> bool {
        false
    }
}
