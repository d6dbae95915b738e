//! Integration tests for the `validate` command.
use lakecal::cli::handle_validate_command;
use lakecal::log::is_logger_initialised;
use lakecal::settings::Settings;
use tempfile::tempdir;

mod lake;
use lake::write_lake;

/// An integration test for the `validate` command.
///
/// We also check that the logger is initialised after it is run and that nothing is written to
/// the calibration folder.
#[test]
fn test_handle_validate_command() {
    unsafe { std::env::set_var("LAKECAL_LOG_LEVEL", "off") };

    assert!(!is_logger_initialised());

    let dir = tempdir().unwrap();
    let arg_file = write_lake(dir.path(), "scipy");
    handle_validate_command(&arg_file, Some(Settings::default())).unwrap();

    assert!(is_logger_initialised());
    assert!(!dir.path().join("calibration").exists());

    // Second time will fail because the logging is already initialised
    let err = handle_validate_command(&arg_file, Some(Settings::default())).unwrap_err();
    assert_eq!(err.chain().next().unwrap().to_string(), "Failed to initialise logging.");
}
