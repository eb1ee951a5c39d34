use mztree::{MzTree, MzTreeError, StrategyKind};
use mztree_int_test::test_util::{
    cleanup, create_context_with, create_test_context, generate_points, run_test, test_tree,
};
use std::convert::Infallible;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_label_most_intense_first() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let mut intensities: Vec<f32> = ctx.points().iter().map(|p| p.intensity).collect();
            intensities.sort_by(|a, b| b.total_cmp(a));

            assert_eq!(tree.labeling_progress()?, 0.0);
            let mut channel = tree.annotation_channel()?;
            for expected in intensities.iter().take(25) {
                let top = tree.highest_unlabeled()?.expect("unlabeled point left");
                assert_eq!(top.intensity, *expected);
                assert_eq!(top.label, None);
                channel.write_label(top.id, 1)?;
            }
            let progress = tree.labeling_progress()?;
            assert!(progress > 0.0 && progress < 1.0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unlabeling_brings_points_back() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let mut channel = tree.annotation_channel()?;

            let first = tree.highest_unlabeled()?.expect("unlabeled point left");
            channel.write_label(first.id, 3)?;
            let second = tree.highest_unlabeled()?.expect("unlabeled point left");
            assert_ne!(second.id, first.id);

            assert_eq!(channel.clear_label(3)?, 1);
            let again = tree.highest_unlabeled()?.expect("unlabeled point left");
            assert_eq!(again.id, first.id);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_fully_labeled_index() {
    run_test(
        || create_context_with(StrategyKind::WeightedStriding, generate_points(600, 3)),
        |ctx| {
            let tree = ctx.tree();
            let mut channel = tree.annotation_channel()?;
            let batch: Vec<_> = (0..600u64).map(|id| (id, Some((id % 5) as u32))).collect();
            channel.write_labels(&batch)?;

            assert_eq!(tree.highest_unlabeled()?, None);
            assert_eq!(tree.labeling_progress()?, 1.0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_labels_persist_across_reopen() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let window = tree.query(400.0, 500.0, 0.0, 60.0, 0)?;
            assert!(!window.is_empty());
            {
                let mut channel = tree.annotation_channel()?;
                let batch: Vec<_> = window.iter().map(|p| (p.id, Some(11))).collect();
                channel.write_labels(&batch)?;
            }
            tree.close()?;

            let reopened = MzTree::open(ctx.base())?;
            let labeled = reopened.query(400.0, 500.0, 0.0, 60.0, 0)?;
            assert_eq!(labeled.len(), window.len());
            assert!(labeled.iter().all(|p| p.label == Some(11)));

            let elsewhere = reopened.query(600.0, 700.0, 0.0, 60.0, 0)?;
            assert!(elsewhere.iter().all(|p| p.label.is_none()));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_labels_do_not_change_geometry() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let before = tree.query(100.0, 2000.0, 0.0, 60.0, 300)?;
            let mut channel = tree.annotation_channel()?;
            let batch: Vec<_> = before.iter().map(|p| (p.id, Some(2))).collect();
            channel.write_labels(&batch)?;

            let after = tree.query(100.0, 2000.0, 0.0, 60.0, 300)?;
            assert_eq!(before.len(), after.len());
            for (b, a) in before.iter().zip(&after) {
                assert_eq!((b.id, b.mz, b.rt, b.intensity), (a.id, a.mz, a.rt, a.intensity));
                assert_eq!(a.label, Some(2));
            }
            assert!(tree.check_integrity()?.is_valid);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_annotation_requires_payload() {
    let dir = mztree_int_test::test_util::random_path();
    let tree = MzTree::builder()
        .leaf_capacity(64)
        .partition_points(512)
        .strategy(StrategyKind::UniformStriding)
        .store_payload(false)
        .track_intensity_ranking(false)
        .build()
        .unwrap();
    std::fs::create_dir_all(&dir).unwrap();
    tree.build_from(dir.join("index"), generate_points(500, 1).into_iter().map(Ok::<_, Infallible>))
        .unwrap();

    assert!(matches!(tree.annotation_channel(), Err(MzTreeError::InvalidOperation(_))));
    assert!(matches!(tree.labeling_progress(), Err(MzTreeError::InvalidOperation(_))));
    tree.close().unwrap();
    std::fs::remove_dir_all(&dir).unwrap();

    // the default test tree keeps both
    assert!(test_tree(StrategyKind::IntensityCutoff).unwrap().config().store_payload());
}
