use anyhow::Context;
use std::io::Write;

pub fn ask(question: &str) -> anyhow::Result<String> {
    print!("{question}");
    std::io::stdout()
        .flush()
        .context("Failed to flush stdout")?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read operator input")?;
    Ok(answer.trim().to_string())
}

pub fn confirm(question: &str) -> anyhow::Result<bool> {
    Ok(ask(question)? == "y")
}
