// ABOUTME: Tests for escalation secret resolution: file, environment, absence.

use marionette::auth::{
    CredentialError, Credentials, ROOT_PASSWORD_ENV, USER_PASSWORD_ENV,
};
use tempfile::TempDir;

#[test]
fn environment_variables_supply_missing_secrets() {
    temp_env::with_vars(
        [
            (USER_PASSWORD_ENV, Some("sudo-pw")),
            (ROOT_PASSWORD_ENV, Some("su-pw")),
        ],
        || {
            let creds = Credentials::load(None).unwrap();
            assert_eq!(creds.user_password(), Some("sudo-pw"));
            assert_eq!(creds.root_password(), Some("su-pw"));
        },
    );
}

#[test]
fn password_file_wins_over_environment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("passwords.yaml");
    std::fs::write(&path, "user_password: from-file\n").unwrap();

    temp_env::with_vars(
        [
            (USER_PASSWORD_ENV, Some("from-env")),
            (ROOT_PASSWORD_ENV, Some("root-env")),
        ],
        || {
            let creds = Credentials::load(Some(&path)).unwrap();
            assert_eq!(creds.user_password(), Some("from-file"));
            // Kinds absent from the file still fall back to the environment.
            assert_eq!(creds.root_password(), Some("root-env"));
        },
    );
}

#[test]
fn absence_is_deferred_until_a_secret_is_required() {
    temp_env::with_vars(
        [(USER_PASSWORD_ENV, None::<&str>), (ROOT_PASSWORD_ENV, None)],
        || {
            let creds = Credentials::load(None).unwrap();
            assert_eq!(creds.user_password(), None);

            let err = creds.require_user_password().unwrap_err();
            assert!(matches!(err, CredentialError::MissingUserPassword));
            assert!(err.to_string().contains(USER_PASSWORD_ENV));

            let err = creds.require_root_password().unwrap_err();
            assert!(err.to_string().contains(ROOT_PASSWORD_ENV));
        },
    );
}

#[test]
fn unreadable_password_file_is_an_error() {
    let err = Credentials::load(Some(std::path::Path::new("no/such/passwords.yaml")))
        .unwrap_err();
    assert!(matches!(err, CredentialError::PasswordFile { .. }));
}

#[test]
fn malformed_password_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("passwords.yaml");
    std::fs::write(&path, "user_password: [not, a, string\n").unwrap();
    let err = Credentials::load(Some(&path)).unwrap_err();
    assert!(matches!(err, CredentialError::PasswordFile { .. }));
}

#[test]
fn debug_output_redacts_secrets() {
    let creds = Credentials::from_secrets(Some("hunter2".into()), None);
    let rendered = format!("{creds:?}");
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
}
