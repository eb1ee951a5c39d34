use super::{even_positions, sort_along_dominant_axis, Representative, StrategyKind, SummarizationStrategy};

/// Distance between consecutive visits within one striding pass
pub const DEFAULT_STRIDE: usize = 43;

const THRESHOLD_EPSILON: f64 = 1.0e-5;

/// Intensity-weighted striding.
///
/// Points are ordered along the dominant axis and visited with a fixed
/// stride. Intensity accumulates as points are visited; whenever the
/// accumulation reaches `total / target` the visited point is selected and
/// the threshold is subtracted. Intense regions therefore cross the
/// threshold more often and keep more representatives, while the stride
/// keeps picks spread across the whole extent. Points skipped in one pass
/// are revisited in the next until `target` points are selected.
#[derive(Debug, Clone, Copy)]
pub struct WeightedStriding {
    stride: usize,
}

impl WeightedStriding {
    pub fn with_stride(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl Default for WeightedStriding {
    fn default() -> Self {
        Self::with_stride(DEFAULT_STRIDE)
    }
}

impl SummarizationStrategy for WeightedStriding {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WeightedStriding
    }

    fn reduce(&self, mut points: Vec<Representative>, target: usize) -> Vec<Representative> {
        if points.len() <= target {
            return points;
        }
        if target == 0 {
            return Vec::new();
        }

        sort_along_dominant_axis(&mut points);

        let total: f64 = points.iter().map(Representative::weight).sum();
        let threshold = total / target as f64;

        let mut picked: Vec<usize> = Vec::with_capacity(target);
        let mut pending: Vec<usize> = (0..points.len()).collect();
        let mut accumulation = 0.0f64;

        while picked.len() < target {
            let picked_before = picked.len();
            let mut skipped = Vec::with_capacity(pending.len());

            'pass: for start in 0..self.stride.min(pending.len()) {
                let mut i = start;
                while i < pending.len() {
                    let idx = pending[i];
                    accumulation += points[idx].weight();
                    if accumulation >= threshold - THRESHOLD_EPSILON {
                        picked.push(idx);
                        accumulation -= threshold;
                        if picked.len() == target {
                            break 'pass;
                        }
                    } else {
                        skipped.push(idx);
                    }
                    i += self.stride;
                }
            }

            if picked.len() == target {
                break;
            }

            if picked.len() == picked_before {
                // no intensity left to accumulate; spread the rest evenly
                skipped.sort_unstable();
                let need = target - picked.len();
                let len = skipped.len();
                picked.extend(even_positions(len, need).map(|pos| skipped[pos]));
                break;
            }

            pending = skipped;
        }

        picked.sort_unstable();
        picked.into_iter().map(|idx| points[idx]).collect()
    }
}
