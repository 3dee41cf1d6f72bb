mod arguments;
mod bootstrap;
mod decrypt;
mod drift;
mod prompt;
mod vars;

fn main() -> anyhow::Result<()> {
    arguments::execute()
}
