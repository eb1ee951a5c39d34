use super::{by_intensity_desc, Representative, StrategyKind, SummarizationStrategy};

/// Keeps the `target` most intense points.
///
/// Peaks survive at every zoom level but low-intensity regions vanish
/// entirely, so this suits peak-picking previews rather than overviews.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntensityCutoff;

impl SummarizationStrategy for IntensityCutoff {
    fn kind(&self) -> StrategyKind {
        StrategyKind::IntensityCutoff
    }

    fn reduce(&self, mut points: Vec<Representative>, target: usize) -> Vec<Representative> {
        if points.len() <= target {
            return points;
        }

        points.sort_by(by_intensity_desc);
        points.truncate(target);
        points.sort_by_key(|p| p.id);
        points
    }
}
