use mztree::{MsPoint, MzTree, MzTreeError, MzTreeResult, Rect, StrategyKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Points in the standard test data set.
pub const TEST_POINTS: usize = 10_000;

/// Runs a test with retry logic and error handling.
/// `after` always runs, also when the test fails, so index files never leak.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> MzTreeResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> MzTreeResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> MzTreeResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 2;
    let mut last_error: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx)
                        .map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();
        let failure = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                if !bt.is_empty() && !bt.contains("disabled") {
                    format!("{}\nBacktrace:\n{}", e, bt)
                } else {
                    e
                }
            }
            Err(panic_err) => {
                let msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                format!("Panic: {}", msg)
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("{}", failure);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(failure);
    }

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

#[derive(Clone)]
pub struct TestContext {
    dir: PathBuf,
    tree: Arc<MzTree>,
    points: Arc<Vec<MsPoint>>,
}

impl TestContext {
    pub fn new(dir: PathBuf, tree: MzTree, points: Vec<MsPoint>) -> Self {
        Self {
            dir,
            tree: Arc::new(tree),
            points: Arc::new(points),
        }
    }

    /// Directory holding every file of this test.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base path of the index files.
    pub fn base(&self) -> PathBuf {
        self.dir.join("index")
    }

    pub fn tree(&self) -> Arc<MzTree> {
        Arc::clone(&self.tree)
    }

    /// The points the index was built from, in input order.
    pub fn points(&self) -> &[MsPoint] {
        &self.points
    }
}

pub fn random_path() -> PathBuf {
    env::temp_dir().join(format!("mztree-{}", uuid::Uuid::new_v4()))
}

/// Small nodes so that even the test data set builds a multi-level tree.
pub fn test_tree(strategy: StrategyKind) -> MzTreeResult<MzTree> {
    MzTree::builder()
        .leaf_capacity(256)
        .fan_out(8)
        .representative_size(64)
        .partition_points(2_048)
        .cache_pages(128)
        .strategy(strategy)
        .build()
}

/// Index of [`TEST_POINTS`] generated points with weighted striding.
pub fn create_test_context() -> MzTreeResult<TestContext> {
    create_context_with(StrategyKind::WeightedStriding, generate_points(TEST_POINTS, 42))
}

pub fn create_context_with(strategy: StrategyKind, points: Vec<MsPoint>) -> MzTreeResult<TestContext> {
    let dir = random_path();
    fs::create_dir_all(&dir)?;
    let tree = test_tree(strategy)?;
    tree.build_from(dir.join("index"), points.iter().copied().map(Ok::<_, Infallible>))?;
    Ok(TestContext::new(dir, tree, points))
}

/// A context whose tree is not loaded yet.
pub fn create_unloaded_context() -> MzTreeResult<TestContext> {
    let dir = random_path();
    fs::create_dir_all(&dir)?;
    let tree = test_tree(StrategyKind::WeightedStriding)?;
    Ok(TestContext::new(dir, tree, generate_points(TEST_POINTS, 42)))
}

pub fn cleanup(ctx: TestContext) -> MzTreeResult<()> {
    if let Err(e) = ctx.tree().close() {
        eprintln!("Warning: Failed to close index: {:?}", e);
    }

    let mut delay_ms = 20u64;
    for retry in 0..5 {
        if !ctx.dir().exists() {
            return Ok(());
        }
        match fs::remove_dir_all(ctx.dir()) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if retry == 4 => {
                eprintln!("Warning: Failed to remove test directory {:?}: {:?}", ctx.dir(), e);
            }
            Err(_) => {
                thread::sleep(Duration::from_millis(delay_ms));
                delay_ms *= 2;
            }
        }
    }
    Ok(())
}

/// LC-MS-like synthetic data: chromatographic peaks with isotope traces
/// over a sparse noise floor. Deterministic per seed.
pub fn generate_points(n: usize, seed: u64) -> Vec<MsPoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(n);

    while points.len() < n * 3 / 4 {
        let mz = rng.random_range(150.0..1800.0);
        let apex_rt: f32 = rng.random_range(1.0..58.0);
        let apex: f32 = rng.random_range(1.0e3..1.0e7);
        let width: f32 = rng.random_range(0.1..0.6);
        for isotope in 0..3 {
            let iso_mz = mz + isotope as f64 * 1.00335;
            let iso_scale = 1.0 / (1.0 + isotope as f32);
            for scan in -10..=10 {
                let rt = apex_rt + scan as f32 * width / 5.0;
                let falloff = (-((scan * scan) as f32) / 32.0).exp();
                let jitter = rng.random_range(-0.002..0.002);
                points.push(MsPoint::new(iso_mz + jitter, rt, apex * iso_scale * falloff));
            }
        }
    }
    points.truncate(n * 3 / 4);
    while points.len() < n {
        points.push(MsPoint::new(
            rng.random_range(100.0..2000.0),
            rng.random_range(0.0..60.0),
            rng.random_range(1.0..500.0),
        ));
    }
    points
}

/// Multiset of point geometries, independent of point ids.
pub fn geometry_counts<'a>(points: impl IntoIterator<Item = &'a MsPoint>) -> HashMap<(u64, u32, u32), usize> {
    let mut counts = HashMap::new();
    for point in points {
        *counts.entry(point.geometry_key()).or_insert(0) += 1;
    }
    counts
}

/// Points of `points` inside `rect`, by linear scan.
pub fn brute_force(points: &[MsPoint], rect: &Rect) -> Vec<MsPoint> {
    points
        .iter()
        .filter(|p| rect.contains_point(p.mz, p.rt))
        .copied()
        .collect()
}

pub fn write_csv(path: &Path, points: &[MsPoint], header: bool) -> MzTreeResult<()> {
    let mut text = String::new();
    if header {
        text.push_str("mz,rt,intensity,label\n");
    }
    for p in points {
        let label = p.label.map(|l| l.to_string()).unwrap_or_default();
        let _ = writeln!(text, "{},{},{},{}", p.mz, p.rt, p.intensity, label);
    }
    fs::write(path, text).map_err(MzTreeError::from)
}
