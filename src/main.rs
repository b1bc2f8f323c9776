use clap::Parser;
use imclassify::Opts;
use imclassify::cli::SubCommandExtend;
use imclassify::config::SubCommand;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts),
        SubCommand::Match(config) => config.run(&opts),
        SubCommand::Vocab(config) => config.run(&opts),
        SubCommand::Train(config) => config.run(&opts),
        SubCommand::Classify(config) => config.run(&opts),
        SubCommand::Show(config) => config.run(&opts),
    }
}
