use sots_cli::run;

fn main() -> anyhow::Result<()> {
    run()
}
