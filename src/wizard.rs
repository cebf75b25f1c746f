//! Interactive generator for a starter configuration file.

use anyhow::{Context, Result, bail};
use std::io::{BufRead, Write};

/// Runs the prompt loop against the given reader/writer, so tests can
/// drive it with a script.
pub fn generate<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<String> {
    let kind = prompt(
        input,
        output,
        "Job kind (exec/run/local/service-run/compose)",
        "local",
    )?;
    let section = match kind.as_str() {
        "exec" => "job-exec",
        "run" => "job-run",
        "local" => "job-local",
        "service-run" => "job-service-run",
        "compose" => "job-compose",
        other => bail!("unknown job kind '{other}'"),
    };

    let name = prompt(input, output, "Job name", "cleanup")?;
    if !crate::core::job::valid_name(&name) {
        bail!("job names may only contain letters, digits, '-' and '_'");
    }
    let schedule = prompt(input, output, "Schedule", "@daily")?;
    schedule
        .parse::<crate::core::schedule::ScheduleExpr>()
        .with_context(|| format!("schedule '{schedule}'"))?;
    let command = prompt(input, output, "Command", "echo hello")?;

    let mut text = String::new();
    text.push_str(&format!("[{section} \"{name}\"]\n"));
    text.push_str(&format!("schedule = {schedule}\n"));
    text.push_str(&format!("command = {command}\n"));

    match section {
        "job-exec" => {
            let container = prompt(input, output, "Target container", "my-container")?;
            text.push_str(&format!("container = {container}\n"));
        }
        "job-run" | "job-service-run" => {
            let image = prompt(input, output, "Image", "alpine:latest")?;
            text.push_str(&format!("image = {image}\n"));
        }
        "job-compose" => {
            let file = prompt(input, output, "Compose file", "docker-compose.yml")?;
            let service = prompt(input, output, "Service", "app")?;
            text.push_str(&format!("file = {file}\n"));
            text.push_str(&format!("service = {service}\n"));
        }
        _ => {}
    }

    Ok(text)
}

pub fn run(output_path: &str) -> Result<()> {
    if std::path::Path::new(output_path).exists() {
        bail!("{output_path} already exists, refusing to overwrite");
    }

    let stdin = std::io::stdin();
    let mut reader = stdin.lock();
    let mut writer = std::io::stdout();
    let text = generate(&mut reader, &mut writer)?;

    std::fs::write(output_path, &text).with_context(|| format!("write {output_path}"))?;
    writeln!(writer, "wrote {output_path}")?;
    Ok(())
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
    default: &str,
) -> Result<String> {
    write!(output, "{question} [{default}]: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    Ok(if answer.is_empty() { default.to_string() } else { answer.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ini;

    #[test]
    fn scripted_session_produces_parseable_config() {
        let script = "local\nnightly\n@daily\necho done\n";
        let mut input = script.as_bytes();
        let mut output = Vec::new();
        let text = generate(&mut input, &mut output).unwrap();

        let doc = ini::parse(&text).unwrap();
        assert_eq!(doc.sections.len(), 1);
        assert_eq!(doc.sections[0].kind, "job-local");
        assert_eq!(doc.sections[0].name.as_deref(), Some("nightly"));
    }

    #[test]
    fn defaults_apply_on_empty_answers() {
        let script = "\n\n\n\n";
        let mut input = script.as_bytes();
        let mut output = Vec::new();
        let text = generate(&mut input, &mut output).unwrap();
        assert!(text.contains("[job-local \"cleanup\"]"));
        assert!(text.contains("schedule = @daily"));
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let script = "local\njob\nnever\ncmd\n";
        let mut input = script.as_bytes();
        let mut output = Vec::new();
        assert!(generate(&mut input, &mut output).is_err());
    }
}
