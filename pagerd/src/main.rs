//! pagerd 入口：在宿主上启动 pager 并运行自检

use std::process::ExitCode;

use pagerd::{PagerConfig, logging, selftest};

fn main() -> ExitCode {
    let config = match PagerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("pagerd: {}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logging::init(config.log_level) {
        eprintln!("pagerd: {}", err);
        return ExitCode::FAILURE;
    }

    match selftest::run(config) {
        Ok(shutdown) => {
            let frames = shutdown.stats.frames;
            println!(
                "pagerd: selftest passed, {} requests served, frames total={} allocated={} free={}",
                shutdown.served, frames.total, frames.allocated, frames.free
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("pagerd: {}", err);
            ExitCode::FAILURE
        }
    }
}
