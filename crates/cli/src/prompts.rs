//! Interactive confirmation for destructive commands.

use anyhow::{Result, bail};
use std::io::{self, IsTerminal, Write};

/// Ask before deleting deployed resources. `force` answers yes without asking.
pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }

  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Refusing to delete deployed resources without a terminal to confirm on. Pass --force to proceed.");
  }

  write!(io::stderr(), "{} Deployed resources cannot be restored. [y/N] ", message)?;
  io::stderr().flush()?;

  let mut answer = String::new();
  io::stdin().read_line(&mut answer)?;

  Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
