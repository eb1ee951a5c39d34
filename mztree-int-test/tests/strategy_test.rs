use mztree::StrategyKind;
use mztree_int_test::test_util::{cleanup, create_context_with, generate_points, run_test};
use std::collections::HashSet;

#[ctor::ctor]
fn init() {
    colog::init();
}

const STRATEGIES: [StrategyKind; 3] = [
    StrategyKind::WeightedStriding,
    StrategyKind::UniformStriding,
    StrategyKind::IntensityCutoff,
];

#[test]
fn test_every_strategy_samples_real_points() {
    for strategy in STRATEGIES {
        run_test(
            move || create_context_with(strategy, generate_points(5_000, 17)),
            |ctx| {
                let tree = ctx.tree();
                let exact: HashSet<u64> = tree
                    .query(100.0, 2000.0, 0.0, 60.0, 0)?
                    .iter()
                    .map(|p| p.id)
                    .collect();
                let sample = tree.query(100.0, 2000.0, 0.0, 60.0, 200)?;
                assert!(!sample.is_empty());
                assert!(sample.len() <= 200);
                assert!(sample.iter().all(|p| exact.contains(&p.id)));
                assert!(tree.check_integrity()?.is_valid);
                Ok(())
            },
            cleanup,
        );
    }
}

#[test]
fn test_intensity_cutoff_keeps_most_intense() {
    run_test(
        || create_context_with(StrategyKind::IntensityCutoff, generate_points(5_000, 23)),
        |ctx| {
            let tree = ctx.tree();
            let mut intensities: Vec<f32> = ctx.points().iter().map(|p| p.intensity).collect();
            intensities.sort_by(|a, b| b.total_cmp(a));

            // with a budget of one the root answers with its own representatives
            let sample = tree.query(0.0, 1.0e4, -10.0, 100.0, 1)?;
            let representative_size = tree.config().representative_size();
            assert_eq!(sample.len(), representative_size);

            let mut sampled: Vec<f32> = sample.iter().map(|p| p.intensity).collect();
            sampled.sort_by(|a, b| b.total_cmp(a));
            assert_eq!(sampled, intensities[..representative_size].to_vec());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_striding_spreads_over_the_window() {
    for strategy in [StrategyKind::WeightedStriding, StrategyKind::UniformStriding] {
        run_test(
            move || create_context_with(strategy, generate_points(5_000, 29)),
            |ctx| {
                let tree = ctx.tree();
                let bounds = tree.data_bounds()?;
                let sample = tree.query(bounds.mz_min, bounds.mz_max, bounds.rt_min, bounds.rt_max, 1)?;
                let low = sample.iter().map(|p| p.mz).fold(f64::INFINITY, f64::min);
                let high = sample.iter().map(|p| p.mz).fold(f64::NEG_INFINITY, f64::max);
                assert!(
                    high - low > bounds.mz_span() / 2.0,
                    "{} sampled only {}..{}",
                    strategy,
                    low,
                    high
                );
                Ok(())
            },
            cleanup,
        );
    }
}
