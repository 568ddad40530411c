//! Destroy command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn destroy_with_no_state_succeeds() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .arg("destroy")
    .arg("--force")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to destroy"));
}

#[test]
fn destroy_is_idempotent() {
  let env = TestEnv::new();

  for _ in 0..2 {
    env
      .stagecraft_cmd()
      .arg("destroy")
      .arg("--force")
      .assert()
      .success()
      .stdout(predicate::str::contains("Nothing to destroy"));
  }
}

#[test]
fn destroy_without_force_refuses_non_interactive() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .arg("destroy")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
}

#[test]
fn destroy_without_password_fails() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .env_remove("STAGECRAFT_PASSWORD")
    .arg("destroy")
    .arg("--force")
    .assert()
    .failure()
    .stderr(predicate::str::contains("STAGECRAFT_PASSWORD"));
}

#[test]
fn destroy_json_output() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .args(["destroy", "--force", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"deleted\": []"));
}
