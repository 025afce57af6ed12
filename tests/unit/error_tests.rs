//! Unit tests for `AppError` display formatting and conversions.
//!
//! Every variant renders as `<category>: <detail>` without a trailing
//! period so messages compose cleanly into log lines.

use std::path::PathBuf;

use agent_fleet::plugins::PluginSlot;
use agent_fleet::AppError;

#[test]
fn display_prefixes_identify_category() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Metadata("torn".into()), "metadata: torn"),
        (AppError::NotFound("session x".into()), "not found: session x"),
        (AppError::UnknownProject("ghost".into()), "unknown project: ghost"),
        (AppError::Tracker("auth".into()), "tracker: auth"),
        (AppError::Runtime("gone".into()), "runtime: gone"),
        (AppError::Agent("probe".into()), "agent: probe"),
        (AppError::Workspace("git".into()), "workspace: git"),
        (AppError::Scm("rate".into()), "scm: rate"),
        (AppError::Notifier("502".into()), "notifier: 502"),
        (AppError::Timeout("slow".into()), "timeout: slow"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn plugin_not_found_names_slot_and_plugin() {
    let err = AppError::PluginNotFound {
        slot: PluginSlot::Tracker,
        name: "linear".into(),
    };
    assert_eq!(err.to_string(), "plugin: tracker plugin 'linear' not found");
}

#[test]
fn issue_not_found_is_distinct_from_tracker_failure() {
    let err = AppError::IssueNotFound("INT-9".into());
    assert_eq!(err.to_string(), "tracker: issue INT-9 does not exist in tracker");
    assert!(!matches!(err, AppError::Tracker(_)));
}

#[test]
fn restore_errors_carry_session_context() {
    let not_restorable = AppError::SessionNotRestorable {
        session_id: "app-1".into(),
        reason: "is merged".into(),
    };
    assert!(not_restorable.to_string().contains("app-1"));

    let missing = AppError::WorkspaceMissing {
        session_id: "app-2".into(),
        path: PathBuf::from("/wt/app/app-2"),
    };
    let rendered = missing.to_string();
    assert!(rendered.starts_with("workspace missing:"));
    assert!(rendered.contains("/wt/app/app-2"));
}

#[test]
fn messages_have_no_trailing_period() {
    let errors = [
        AppError::Config("x".into()),
        AppError::PluginNotFound {
            slot: PluginSlot::Scm,
            name: "github".into(),
        },
        AppError::IssueNotFound("1".into()),
    ];
    for err in errors {
        assert!(!err.to_string().ends_with('.'), "{err}");
    }
}

// ── conversions ───────────────────────────────────────────────────────────────

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("denied")));
}

#[test]
fn json_error_converts_to_metadata_variant() {
    let json = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
    let err: AppError = json.into();
    assert!(matches!(err, AppError::Metadata(_)));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("a = ").expect_err("invalid toml");
    let err: AppError = toml_err.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}
