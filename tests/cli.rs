use assert_cmd::Command;
use predicates::prelude::*;

fn aethctl() -> Command {
    Command::cargo_bin("aetheriumd").unwrap()
}

#[test]
fn test_help_exits_successfully() {
    aethctl().arg("--help").assert().success();
}

#[test]
fn test_version_exits_successfully() {
    aethctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("aethctl"));
}

#[test]
fn test_no_args_shows_usage() {
    aethctl()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_subcommand_fails() {
    aethctl()
        .arg("nonexistent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_help_lists_all_subcommands() {
    let assert = aethctl().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for cmd in ["serve", "migrate", "status", "vm", "workspace"] {
        assert!(output.contains(cmd), "help output should list '{}' subcommand", cmd);
    }
}

#[test]
fn test_help_lists_global_flags() {
    let assert = aethctl().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for flag in ["--config", "--json-logs", "--redis-url"] {
        assert!(output.contains(flag), "help output should list '{}' flag", flag);
    }
}

#[test]
fn test_serve_help() {
    aethctl()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--in-memory"));
}

#[test]
fn test_migrate_help() {
    aethctl().args(["migrate", "--help"]).assert().success();
}

#[test]
fn test_status_help() {
    aethctl().args(["status", "--help"]).assert().success();
}

#[test]
fn test_vm_help_lists_actions() {
    let assert = aethctl().args(["vm", "--help"]).assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for action in ["list", "create", "exec", "delete"] {
        assert!(output.contains(action), "vm help should list '{}' action", action);
    }
}

#[test]
fn test_vm_create_help_shows_vm_options() {
    aethctl()
        .args(["vm", "create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--vcpu-count"))
        .stdout(predicate::str::contains("--mem-size-mib"));
}

#[test]
fn test_workspace_help_lists_actions() {
    let assert = aethctl().args(["workspace", "--help"]).assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for action in ["list", "prompt"] {
        assert!(output.contains(action), "workspace help should list '{}' action", action);
    }
}

#[test]
fn test_vm_without_subcommand_fails() {
    aethctl().arg("vm").assert().failure();
}

#[test]
fn test_vm_create_without_redis_url_fails_with_helpful_message() {
    // Without a running daemon, --config pointing anywhere real, or a
    // reachable queue, this fails before ever touching Postgres — at the
    // point where the CLI would have had to enqueue the task.
    aethctl()
        .args(["vm", "create", "some-vm"])
        .env_remove("AETH_REDIS_URL")
        .assert()
        .failure();
}
