//! Mode changes, loads and disables through the helper.

use std::path::Path;

use armature::caller::{ChangeError, CommandCaller, HelperCommand};
use armature::profile::ProfileMode;

use crate::scripted_runner::{Reply, ScriptedRunner};

fn caller(runner: ScriptedRunner) -> CommandCaller<ScriptedRunner> {
    CommandCaller::with_runner(runner, HelperCommand::default())
}

#[tokio::test]
async fn execute_change_builds_helper_argv() {
    let caller = caller(ScriptedRunner::new().ok("Setting /usr/bin/foo to complain mode.\n"));

    let output = caller
        .execute_change("/usr/bin/foo", ProfileMode::Enforce, ProfileMode::Complain)
        .await
        .expect("change should succeed");

    assert_eq!(output, "Setting /usr/bin/foo to complain mode.\n");
    assert_eq!(
        caller.runner().calls(),
        vec![vec!["pkexec", "aa-caller", "-c", "/usr/bin/foo", "enforce", "complain"]]
    );
}

#[tokio::test]
async fn disabled_mode_is_spelled_disable_for_the_helper() {
    let caller = caller(ScriptedRunner::new().ok(""));
    caller
        .execute_change("firefox", ProfileMode::Disabled, ProfileMode::Enforce)
        .await
        .expect("change should succeed");
    assert_eq!(
        caller.runner().calls(),
        vec![vec!["pkexec", "aa-caller", "-c", "firefox", "disable", "enforce"]]
    );
}

#[tokio::test]
async fn identical_modes_are_passed_through() {
    let caller = caller(ScriptedRunner::new().ok("nothing to do\n"));
    let output = caller
        .execute_change("firefox", ProfileMode::Complain, ProfileMode::Complain)
        .await
        .expect("change should succeed");
    assert_eq!(output, "nothing to do\n");
    assert_eq!(caller.runner().calls().len(), 1);
}

#[tokio::test]
async fn rejected_change_carries_stderr_verbatim() {
    let stderr = "ERROR: Profile doesn't conform to protocol\n";
    let caller = caller(ScriptedRunner::new().fail(1, stderr));

    let err = caller
        .execute_change("firefox", ProfileMode::Enforce, ProfileMode::Complain)
        .await
        .expect_err("change should be rejected");

    assert_eq!(err.to_string(), stderr);
    assert!(matches!(err, ChangeError::Rejected { exit_status: 1, .. }));
}

#[tokio::test]
async fn rejected_change_without_stderr_uses_stdout() {
    let runner = ScriptedRunner::new().reply(Reply::Exit(armature::executor::CommandResult {
        exit_status: 2,
        stdout: "usage: aa-caller ...\n".to_owned(),
        stderr: String::new(),
    }));
    let err = caller(runner)
        .execute_change("firefox", ProfileMode::Enforce, ProfileMode::Complain)
        .await
        .expect_err("change should be rejected");
    assert_eq!(err.to_string(), "usage: aa-caller ...\n");
}

#[tokio::test]
async fn unsupported_mode_runs_nothing() {
    let caller = caller(ScriptedRunner::new());
    let err = caller
        .execute_change("firefox", ProfileMode::Enforce, ProfileMode::Kill)
        .await
        .expect_err("kill is not a helper mode");

    assert!(matches!(
        err,
        ChangeError::UnsupportedMode {
            mode: ProfileMode::Kill,
            ..
        }
    ));
    assert!(caller.runner().calls().is_empty());
}

#[tokio::test]
async fn spawn_failure_is_an_executor_error() {
    let caller = caller(ScriptedRunner::new().reply(Reply::SpawnFailure));
    let err = caller
        .disable_profile("firefox")
        .await
        .expect_err("spawn should fail");
    assert!(matches!(err, ChangeError::Executor(_)));
}

#[tokio::test]
async fn load_profile_passes_path() {
    let caller = caller(ScriptedRunner::new().ok(""));
    caller
        .load_profile(Path::new("/etc/apparmor.d/usr.bin.foo"))
        .await
        .expect("load should succeed");
    assert_eq!(
        caller.runner().calls(),
        vec![vec!["pkexec", "aa-caller", "-a", "/etc/apparmor.d/usr.bin.foo"]]
    );
}

#[tokio::test]
async fn disable_profile_passes_name() {
    let caller = caller(ScriptedRunner::new().ok("Disabled.\n"));
    let output = caller
        .disable_profile("usr.bin.foo")
        .await
        .expect("disable should succeed");
    assert_eq!(output, "Disabled.\n");
    assert_eq!(
        caller.runner().calls(),
        vec![vec!["pkexec", "aa-caller", "-d", "usr.bin.foo"]]
    );
}
