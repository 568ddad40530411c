//! Names shared across the crate: environment inputs, defaults and file names.

pub const APP_NAME: &str = "stagecraft";

/// Stage used when `STAGE` is not set. Selects the local state store.
pub const DEFAULT_STAGE: &str = "dev";

pub const STAGE_ENV: &str = "STAGE";
pub const PASSWORD_ENV: &str = "STAGECRAFT_PASSWORD";
pub const STATE_TOKEN_ENV: &str = "STAGECRAFT_STATE_TOKEN";
pub const STATE_URL_ENV: &str = "STAGECRAFT_STATE_URL";
pub const STATE_DIR_ENV: &str = "STAGECRAFT_STATE_DIR";
pub const PULL_REQUEST_ENV: &str = "PULL_REQUEST";
pub const COMMIT_SHA_ENV: &str = "GITHUB_SHA";
pub const CLOUDFLARE_TOKEN_ENV: &str = "CLOUDFLARE_API_TOKEN";
pub const CLOUDFLARE_ACCOUNT_ENV: &str = "CLOUDFLARE_ACCOUNT_ID";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Default local state root, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".stagecraft";

pub const STATE_FILENAME: &str = "state.json";
pub const LOCK_FILENAME: &str = ".lock";

/// Version of the persisted state document format.
pub const STATE_VERSION: u32 = 1;

/// Logical name of the preview comment declared for pull requests.
pub const PREVIEW_COMMENT_NAME: &str = "preview-comment";

/// Number of commit characters rendered in the preview comment.
pub const SHORT_SHA_LEN: usize = 7;

/// Marker printed in place of secret values.
pub const REDACTED: &str = "[REDACTED]";
