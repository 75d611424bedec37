use slbrin::{
    IndexConfig, IoCost, LearnedModel, MlpTrainer, ModelSnapshotStore, PartitionModel, Point,
    RELATION_ALL, Region, Slbrin, SlbrinError, TrainError, TrainOutcome, Trainer, TrainerConfig,
    UpdateConfig,
};
use tempfile::TempDir;

fn trainer() -> MlpTrainer {
    MlpTrainer::new(TrainerConfig::default().with_epochs(15))
}

fn grid_points(side: u64) -> Vec<(Point<f64>, u64)> {
    (0..side * side)
        .map(|i| {
            let x = (i % side) as f64 + 0.5;
            let y = (i / side) as f64 + 0.5;
            (Point::new(x, y), i)
        })
        .collect()
}

fn grid_config(side: f64) -> IndexConfig {
    IndexConfig::new(Region::new(0.0, 0.0, side, side))
        .with_threshold_number(16)
        .with_threshold_length(10)
        .with_data_precision(1)
}

/// Test 1: Malformed thresholds are rejected at build
#[test]
fn test_invalid_build_configs() {
    let points = grid_points(4);
    let cases = [
        grid_config(4.0).with_threshold_number(0),
        grid_config(4.0).with_threshold_length(0),
        grid_config(4.0).with_threshold_length(64),
        grid_config(4.0).with_block_size(0),
        grid_config(4.0).with_data_precision(12),
        IndexConfig::new(Region::new(1.0, 1.0, 1.0, 5.0)),
    ];
    for config in cases {
        let result = Slbrin::build(points.clone(), &config, &trainer());
        assert!(
            matches!(result, Err(SlbrinError::InvalidConfig(_))),
            "accepted {config:?}"
        );
    }
}

/// Test 2: Queries on an empty index return nothing
#[test]
fn test_empty_index_queries() {
    let index = Slbrin::build(Vec::new(), &grid_config(8.0), &trainer()).unwrap();
    let mut io = IoCost::new();
    assert!(index.point_query(&Point::new(1.0, 1.0), &mut io).is_empty());
    assert!(index.range_query(&Region::new(0.0, 0.0, 8.0, 8.0), &mut io).is_empty());
    assert!(index.knn_query(&Point::new(1.0, 1.0), 3, &mut io).is_empty());
    assert_eq!(index.model_err(), 0.0);
}

/// Test 3: Query points outside the region are clamped, not rejected
#[test]
fn test_out_of_region_queries() {
    let index = Slbrin::build(grid_points(8), &grid_config(8.0), &trainer()).unwrap();
    let mut io = IoCost::new();

    let nearest = index.knn_query(&Point::new(-100.0, -100.0), 1, &mut io);
    assert_eq!(nearest.len(), 1);
    assert_eq!(nearest[0].id, 0);

    let far = Region::new(100.0, 100.0, 200.0, 200.0);
    assert!(index.range_query(&far, &mut io).is_empty());

    let overlapping = Region::new(-5.0, -5.0, 1.0, 1.0);
    assert_eq!(index.range_query(&overlapping, &mut io), vec![0]);
}

/// Test 4: Duplicate points are all returned
#[test]
fn test_duplicate_points() {
    let mut points = grid_points(6);
    for id in 100..110 {
        points.push((Point::new(2.5, 3.5), id));
    }
    let index = Slbrin::build(points, &grid_config(6.0), &trainer()).unwrap();
    let mut io = IoCost::new();

    let mut ids = index.point_query(&Point::new(2.5, 3.5), &mut io).to_vec();
    ids.sort_unstable();
    let mut expected: Vec<u64> = (100..110).collect();
    expected.insert(0, 20);
    assert_eq!(ids, expected);

    let nearest: Vec<_> = index
        .knn_query(&Point::new(2.5, 3.5), 4, &mut io)
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(nearest, vec![20, 100, 101, 102]);
}

/// Test 5: Window edges are inclusive
#[test]
fn test_window_edges_inclusive() {
    let index = Slbrin::build(grid_points(8), &grid_config(8.0), &trainer()).unwrap();
    let mut io = IoCost::new();
    let mut ids = index.range_query(&Region::new(1.5, 1.5, 2.5, 2.5), &mut io);
    ids.sort_unstable();
    assert_eq!(ids, vec![9, 10, 17, 18]);
}

/// Test 6: A window inside one partition flags every edge
#[test]
fn test_small_window_single_partition() {
    let index = Slbrin::build(grid_points(8), &grid_config(8.0), &trainer()).unwrap();
    let map = index.range_partitions(&Region::new(0.1, 0.1, 0.2, 0.2));
    assert_eq!(map.len(), 1);
    assert_eq!(map.values().copied().next(), Some(RELATION_ALL));
}

/// Test 7: Zero k and oversized k
#[test]
fn test_knn_k_limits() {
    let index = Slbrin::build(grid_points(3), &grid_config(3.0), &trainer()).unwrap();
    let mut io = IoCost::new();
    assert!(index.knn_query(&Point::new(1.0, 1.0), 0, &mut io).is_empty());
    let all = index.knn_query(&Point::new(1.5, 1.5), 100, &mut io);
    assert_eq!(all.len(), 9);
    assert_eq!(all[0].id, 4);
    assert_eq!(all[0].distance, 0.0);
}

/// Test 8: Snapshot with a different partition count is rejected before merging
#[test]
fn test_snapshot_mismatch() {
    let dir = TempDir::new().unwrap();
    ModelSnapshotStore::new(dir.path())
        .save(1, &[PartitionModel::Untrained])
        .unwrap();

    let mut index = Slbrin::build(grid_points(8), &grid_config(8.0), &trainer()).unwrap();
    assert!(index.partitions().len() > 1);
    index
        .build_append(
            UpdateConfig::new(0, 0, 10)
                .with_retrain(false, -1, 1)
                .with_snapshots(dir.path(), false),
        )
        .unwrap();

    let mut io = IoCost::new();
    index.insert(Point::new(0.7, 0.7), 500, 3, &trainer(), &mut io).unwrap();
    let err = index.insert(Point::new(0.8, 0.8), 501, 10, &trainer(), &mut io);
    assert!(matches!(
        err,
        Err(SlbrinError::SnapshotMismatch { time_id: 1, found: 1, .. })
    ));
    assert_eq!(index.deltas()[0].len(), 1);
}

/// Test 9: Replaying without a snapshot directory is a configuration error
#[test]
fn test_replay_without_snapshot_dir() {
    let mut index = Slbrin::build(grid_points(4), &grid_config(4.0), &trainer()).unwrap();
    index
        .build_append(UpdateConfig::new(0, 0, 10).with_retrain(false, -1, 1))
        .unwrap();
    let mut io = IoCost::new();
    assert!(matches!(
        index.update(&trainer(), &mut io),
        Err(SlbrinError::InvalidConfig(_))
    ));
}

/// Test 10: Invalid update configs are rejected by build_append
#[test]
fn test_invalid_update_configs() {
    let mut index = Slbrin::build(grid_points(4), &grid_config(4.0), &trainer()).unwrap();
    assert!(index.build_append(UpdateConfig::new(0, 10, 0)).is_err());
    assert!(
        index
            .build_append(UpdateConfig::new(0, 10, 5).with_initial_length(0))
            .is_err()
    );
    assert!(index.append_state().is_none());
}

/// Test 11: A trainer failing at build surfaces the partition
#[test]
fn test_build_training_failure() {
    struct Rejecting;
    impl Trainer for Rejecting {
        fn train(
            &self,
            inputs: &[f64],
            _targets: &[usize],
            _initial: Option<&LearnedModel>,
        ) -> Result<TrainOutcome, TrainError> {
            Err(TrainError::InvalidConfig(format!("{} samples", inputs.len())))
        }
    }

    let err = Slbrin::build(grid_points(4), &grid_config(4.0), &Rejecting);
    match err {
        Err(SlbrinError::Training { partition, source }) => {
            assert!(partition < 4);
            assert_eq!(source, TrainError::InvalidConfig("4 samples".to_string()));
        }
        other => panic!("expected training failure, got {other:?}"),
    }
}

/// Test 12: Inserts before the build window count toward the first bucket
#[test]
fn test_insert_with_past_timestamp() {
    let mut index = Slbrin::build(grid_points(4), &grid_config(4.0), &trainer()).unwrap();
    index.build_append(UpdateConfig::new(100, 200, 50)).unwrap();
    let mut io = IoCost::new();
    let reports = index
        .insert(Point::new(1.2, 1.2), 99, 10, &trainer(), &mut io)
        .unwrap();
    assert!(reports.is_empty());
    assert_eq!(index.time_id(), Some(2));
    assert_eq!(index.len(), 17);
}
