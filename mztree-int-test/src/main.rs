use mztree::{MzTree, MzTreeResult, StrategyKind};
use mztree_int_test::test_util::{generate_points, random_path};
use std::convert::Infallible;
use std::time::Instant;

fn main() -> MzTreeResult<()> {
    colog::init();
    println!("Starting stress test...");
    let dir = random_path();
    std::fs::create_dir_all(&dir)?;

    let count = 2_000_000;
    let points = generate_points(count, 1);
    let tree = MzTree::builder()
        .visualization_preset()
        .partition_points(250_000)
        .strategy(StrategyKind::WeightedStriding)
        .build()?;

    let start = Instant::now();
    tree.build_from(dir.join("stress"), points.into_iter().map(Ok::<_, Infallible>))?;
    println!("Indexed {} points in {:?}", count, start.elapsed());

    let start = Instant::now();
    let mut returned = 0;
    for i in 0..1_000 {
        let mz = 150.0 + (i % 100) as f64 * 16.0;
        returned += tree.query(mz, mz + 25.0, 0.0, 60.0, 0)?.len();
    }
    println!("1000 exact window queries returned {} points in {:?}", returned, start.elapsed());

    let start = Instant::now();
    for _ in 0..100 {
        returned = tree.query(100.0, 2000.0, 0.0, 60.0, 5_000)?.len();
    }
    println!("100 overview queries of {} points in {:?}", returned, start.elapsed());

    let start = Instant::now();
    let mut channel = tree.annotation_channel()?;
    for label in 0..1_000u32 {
        if let Some(point) = tree.highest_unlabeled()? {
            channel.write_label(point.id, label)?;
        }
    }
    drop(channel);
    println!(
        "Labeled 1000 most intense points in {:?} (progress {:.4})",
        start.elapsed(),
        tree.labeling_progress()?
    );

    let stats = tree.stats()?;
    println!("{:?} (hit ratio {:.2})", stats, stats.cache_hit_ratio());

    tree.close()?;
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
