use anyhow::{bail, Result};
use std::io::{BufRead, Write};

/// Gate in front of any pass which writes to the target
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Fail unless the operator agreed to [prompt]
pub fn require(confirm: &dyn Confirm, prompt: &str) -> Result<()> {
    if !confirm.confirm(prompt)? {
        bail!("Cancelled by operator");
    }
    Ok(())
}

/// Ask on the terminal, only an empty line or `y`/`yes` continues
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", prompt)?;
        writeln!(stdout, "Press Enter or type 'y' to continue, anything else cancels...")?;
        stdout.flush()?;

        let mut line = String::new();
        // closed stdin never counts as consent
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(false);
        }
        Ok(answer_is_yes(&line))
    }
}

/// `--yes` on the command line
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

fn answer_is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}
