//! Adaptive quadrant splitting of key-sorted records into partitions.

use super::meta::Partition;
use crate::geohash::Geohash;
use crate::model::PartitionModel;
use slbrin_types::{Record, Region};
use std::ops::Range;

pub(crate) struct SplitParams {
    pub threshold_number: usize,
    pub threshold_length: u32,
    pub data_precision: u32,
    pub pages_per_range: usize,
}

struct Candidate {
    value: u64,
    length: u32,
    range: Range<usize>,
    region: Region,
}

/// Split `records` (sorted by key) into ascending partitions.
///
/// A candidate cell is split into its four quadrants while it holds at least
/// `threshold_number` records and its prefix is shorter than
/// `threshold_length`. Returned key ranges index into `records`.
pub(crate) fn split_partitions(
    records: &[Record],
    geohash: &Geohash,
    params: &SplitParams,
) -> Vec<Partition> {
    let sum_bits = geohash.sum_bits();
    let scope_margin = 10f64.powi(-(params.data_precision as i32 + 1));
    let mut partitions: Vec<Partition> = Vec::new();
    let mut stack = vec![Candidate {
        value: 0,
        length: 0,
        range: 0..records.len(),
        region: *geohash.region(),
    }];

    while let Some(cand) = stack.pop() {
        let count = cand.range.len();
        if count >= params.threshold_number && cand.length < params.threshold_length {
            let length = cand.length + 2;
            let shift = sum_bits - length;
            let slice = &records[cand.range.clone()];
            let mut bounds = [cand.range.start; 5];
            for (i, bound) in bounds.iter_mut().enumerate().skip(1).take(3) {
                let split_key = cand.value + ((i as u64) << shift);
                *bound = cand.range.start + slice.partition_point(|r| r.key < split_key);
            }
            bounds[4] = cand.range.end;

            let quadrants = cand.region.split();
            for i in (0..4).rev() {
                stack.push(Candidate {
                    value: cand.value + ((i as u64) << shift),
                    length,
                    range: bounds[i]..bounds[i + 1],
                    region: quadrants[i],
                });
            }
            continue;
        }

        let index = partitions.len();
        partitions.push(Partition {
            item_offset: index + 1,
            block_number: index * params.pages_per_range,
            value: cand.value,
            next_value: 0,
            length: cand.length,
            count,
            model: PartitionModel::Untrained,
            scope: cand.region.inflate(scope_margin),
            key_range: cand.range,
        });
    }

    let mut next_value = geohash.key_space();
    for partition in partitions.iter_mut().rev() {
        partition.next_value = next_value;
        next_value = partition.value;
    }
    partitions
}
