//! Deploy command integration tests.
//!
//! Every case here fails before any network call is made.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn deploy_without_cloudflare_credentials_fails() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .arg("deploy")
    .arg("--skip-build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("CLOUDFLARE_ACCOUNT_ID"));

  assert!(
    std::fs::read_dir(env.state_path()).unwrap().next().is_none(),
    "no state should be written"
  );
}

#[test]
fn deploy_without_password_fails() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .env_remove("STAGECRAFT_PASSWORD")
    .env("CLOUDFLARE_ACCOUNT_ID", "acc")
    .env("CLOUDFLARE_API_TOKEN", "token")
    .arg("deploy")
    .arg("--skip-build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("STAGECRAFT_PASSWORD"));
}

#[test]
fn deploy_to_prod_without_state_token_fails() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .env("STAGE", "prod")
    .env("STAGECRAFT_STATE_URL", "https://state.example")
    .env("CLOUDFLARE_ACCOUNT_ID", "acc")
    .env("CLOUDFLARE_API_TOKEN", "token")
    .arg("deploy")
    .arg("--skip-build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("STAGECRAFT_STATE_TOKEN"));
}

#[test]
fn deploy_with_missing_binding_input_fails() {
  let env = TestEnv::with_settings(
    r#"
[app]
name = "react-router-app"

[worker]
main = "build/index.js"

[worker.bindings]
API_KEY = { env = "STAGECRAFT_TEST_UNSET_INPUT" }
"#,
  );

  env
    .stagecraft_cmd()
    .env_remove("STAGECRAFT_TEST_UNSET_INPUT")
    .arg("deploy")
    .arg("--skip-build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("STAGECRAFT_TEST_UNSET_INPUT"));
}

#[test]
fn invalid_pull_request_number_fails() {
  let env = TestEnv::new();

  env
    .stagecraft_cmd()
    .env("PULL_REQUEST", "seven")
    .arg("deploy")
    .arg("--skip-build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("PULL_REQUEST"));
}
