//! State command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn state_before_first_deploy_reports_nothing() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .arg("state")
    .assert()
    .success()
    .stdout(predicate::str::contains("No state recorded for react-router-app/dev"));
}

#[test]
fn state_does_not_need_the_password() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .env_remove("STAGECRAFT_PASSWORD")
    .arg("state")
    .assert()
    .success();
}

#[test]
fn state_json_is_null_before_first_deploy() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .args(["state", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("null"));
}

#[test]
fn state_reads_a_recorded_document_with_secrets_redacted() {
  let env = TestEnv::new();
  let stage_dir = env.state_path().join("react-router-app").join("dev");
  std::fs::create_dir_all(&stage_dir).unwrap();
  std::fs::write(
    stage_dir.join("state.json"),
    r#"{
  "version": 1,
  "app": "react-router-app",
  "stage": "dev",
  "updated_at": 1700000000,
  "resources": {
    "site": {
      "kind": "cloudflare::Worker",
      "status": "created",
      "seq": 0,
      "depends_on": [],
      "config": {},
      "outputs": {
        "name": { "string": "site-dev" },
        "token": { "secret": { "ciphertext": "AAAA" } }
      }
    }
  }
}"#,
  )
  .unwrap();

  env
    .stagecraft_cmd()
    .arg("state")
    .arg("--verbose")
    .assert()
    .success()
    .stdout(predicate::str::contains("site (cloudflare::Worker, created)"))
    .stdout(predicate::str::contains("name = site-dev"))
    .stdout(predicate::str::contains("[REDACTED]"))
    .stdout(predicate::str::contains("2023-11-14T22:13:20Z"));
}
