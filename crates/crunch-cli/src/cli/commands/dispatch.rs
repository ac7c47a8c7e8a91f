use super::super::args::{Cli, Command};

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Local(args) => super::local::run(args).await,
        Command::Cloud(args) => super::cloud::run(args).await,
        Command::Child(args) => super::child::run(args).await,
    }
}
