//! Property tests for batch partitioning

use batchflow::batch::{batch_count, chunk, BatchOptions, BatchProcessor};
use proptest::prelude::*;

proptest! {
    #[test]
    fn chunk_count_and_sizes(items in prop::collection::vec(any::<u16>(), 0..200), size in 1usize..40) {
        let batches = chunk(&items, size).unwrap();

        prop_assert_eq!(batches.len(), items.len().div_ceil(size));
        prop_assert_eq!(batches.len(), batch_count(items.len(), size).unwrap());

        if let Some((last, full)) = batches.split_last() {
            prop_assert!(full.iter().all(|batch| batch.len() == size));
            let expected_last = if items.len() % size == 0 { size } else { items.len() % size };
            prop_assert_eq!(last.len(), expected_last);
        }
    }

    #[test]
    fn chunk_concatenation_restores_input(items in prop::collection::vec(any::<i32>(), 0..200), size in 1usize..40) {
        let batches = chunk(&items, size).unwrap();
        let flattened: Vec<i32> = batches.into_iter().flatten().collect();
        prop_assert_eq!(flattened, items);
    }

    #[test]
    fn sequential_run_preserves_order(items in prop::collection::vec(any::<u8>(), 0..60), size in 1usize..10) {
        let processor = BatchProcessor::new(
            |item: u8, _index: usize| async move { Ok::<_, String>(u32::from(item) + 1) },
            BatchOptions::new(size),
        )
        .unwrap();

        let results = tokio_test::block_on(processor.process(&items)).unwrap();
        let expected: Vec<u32> = items.iter().map(|&i| u32::from(i) + 1).collect();
        prop_assert_eq!(results, expected);
    }
}
