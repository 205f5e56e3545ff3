use proptest::prelude::*;
use sdk::errors::{EngineError, EngineErrorExt};
use sdk::types::{AppId, Strategy};

// Every variant must produce a non-empty static hint and a stable code,
// whatever text the failure carried.
proptest! {
    #[test]
    fn test_error_hint_and_code_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Validation(error_str.clone()),
            EngineError::NotFound(error_str.clone()),
            EngineError::Forbidden(error_str.clone()),
            EngineError::Routing(error_str.clone()),
            EngineError::Generation(error_str.clone()),
            EngineError::BuildFailed(error_str.clone()),
            EngineError::Publish(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::PathDenied(std::path::PathBuf::from(&error_str)),
        ];

        for err in errs {
            prop_assert!(!err.user_hint().is_empty());
            prop_assert!(!err.code().is_empty());
            prop_assert!(err.code().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }
}

proptest! {
    #[test]
    fn test_artifact_dir_name_is_prefixed_by_strategy(id in 1i64..i64::MAX) {
        for strategy in Strategy::ALL {
            let name = strategy.artifact_dir_name(AppId(id));
            let prefix = format!("{}_", strategy.as_str());
            prop_assert!(name.starts_with(&prefix));
            prop_assert_eq!(name[prefix.len()..].parse::<i64>().unwrap(), id);
        }
    }

    #[test]
    fn test_non_positive_app_ids_rejected(id in i64::MIN..=0i64) {
        prop_assert!(AppId(id).validate().is_err());
    }
}
