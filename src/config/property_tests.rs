//! Property tests for configuration records and provisioning

#[cfg(test)]
mod tests {
    use crate::config::dirs::create_directories;
    use crate::config::entity::*;
    use crate::config::store::ConfigTree;
    use crate::config::validate::{validate_training, ValidationError};
    use proptest::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    // ============================================================
    // Arbitrary Generators
    // ============================================================

    fn arb_relative_dir() -> impl Strategy<Value = PathBuf> {
        prop::string::string_regex("[a-z][a-z0-9_]{0,8}(/[a-z][a-z0-9_]{0,8}){0,3}")
            .unwrap()
            .prop_map(PathBuf::from)
    }

    fn arb_training_config() -> impl Strategy<Value = TrainingConfig> {
        (
            1usize..100,
            1usize..256,
            any::<bool>(),
            proptest::collection::vec(1usize..512, 3),
            0.0f64..0.99,
            any::<u64>(),
        )
            .prop_map(
                |(epochs, batch_size, augmentation, image_size, split, seed)| TrainingConfig {
                    root_dir: PathBuf::from("artifacts/training"),
                    trained_model_path: PathBuf::from("artifacts/training/model.json"),
                    updated_base_model_path: PathBuf::from(
                        "artifacts/prepare_base_model/base_model_updated.json",
                    ),
                    training_data: PathBuf::from("artifacts/data_ingestion/kidney-ct-scan-image"),
                    params_epochs: epochs,
                    params_batch_size: batch_size,
                    params_is_augmentation: augmentation,
                    params_image_size: image_size,
                    params_validation_split: split,
                    params_seed: seed,
                },
            )
    }

    // ============================================================
    // Provisioning
    // ============================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_create_directories_idempotent(
            dirs in proptest::collection::vec(arb_relative_dir(), 1..6)
        ) {
            let tmp = TempDir::new().unwrap();
            let paths: Vec<PathBuf> = dirs.iter().map(|d| tmp.path().join(d)).collect();

            create_directories(&paths, false).unwrap();
            create_directories(&paths, true).unwrap();

            for path in &paths {
                prop_assert!(path.is_dir());
            }
        }
    }

    // ============================================================
    // Records
    // ============================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_generated_training_config_is_valid(config in arb_training_config()) {
            prop_assert!(validate_training(&config).is_ok());
        }

        #[test]
        fn prop_zero_batch_always_rejected(mut config in arb_training_config()) {
            config.params_batch_size = 0;
            prop_assert_eq!(
                validate_training(&config),
                Err(ValidationError::InvalidBatchSize(0))
            );
        }

        #[test]
        fn prop_freeze_till_keeps_last_n_trainable(total in 0usize..40, n in 0usize..50) {
            let policy = FreezePolicy::AllButLast(n);
            let trainable = (0..total).filter(|&i| !policy.freezes(i, total)).count();
            prop_assert_eq!(trainable, n.min(total));
        }

        #[test]
        fn prop_freeze_all_freezes_everything(total in 0usize..40, till in proptest::option::of(0usize..40)) {
            let policy = FreezePolicy::from_params(true, till);
            prop_assert!((0..total).all(|i| policy.freezes(i, total)));
        }

        #[test]
        fn prop_image_size_survives_yaml(size in proptest::collection::vec(1usize..4096, 3)) {
            let doc = format!("IMAGE_SIZE: [{}, {}, {}]\n", size[0], size[1], size[2]);
            let tree = ConfigTree::parse("params.yaml", &doc).unwrap();
            prop_assert_eq!(tree.root().usize_list("IMAGE_SIZE").unwrap(), size);
        }

        #[test]
        fn prop_weight_path_is_kept_verbatim(path in "[a-z][a-z0-9_/]{0,20}\\.json") {
            prop_assert_eq!(
                WeightSource::from_param(Some(&path)),
                WeightSource::File(PathBuf::from(&path))
            );
        }
    }
}
