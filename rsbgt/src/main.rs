use clap::Parser;
use rsbgt::app::BgtApp;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = BgtApp::parse();
    args.op.run()
}
